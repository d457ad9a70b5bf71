// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::collections::HashMap;

use interval::Interval;
use trace_model::{MarkerTag, MarkerWrite, TraceEvent};
use tracing::warn;

use crate::index::{CounterSample, Entry, IntervalIndex, Span};

/// Routes each marker write to the correlator owning its tag and tears all
/// three down once the stream is exhausted. Consuming `finalize` makes the
/// teardown single-shot by construction.
pub(crate) struct TagDispatcher<'t> {
    sections: SectionCorrelator<'t>,
    asyncs: AsyncCorrelator<'t>,
    counters: CounterCorrelator<'t>,
}

impl<'t> TagDispatcher<'t> {
    pub fn new() -> Self {
        TagDispatcher {
            sections: SectionCorrelator::default(),
            asyncs: AsyncCorrelator::default(),
            counters: CounterCorrelator::default(),
        }
    }

    pub fn feed(&mut self, event: &'t TraceEvent, index: &mut IntervalIndex<'t>) {
        let Some(data) = event.data.as_ref() else {
            warn!(
                timestamp = event.timestamp,
                task = %event.task.name,
                "marker write carries no payload, skipping"
            );
            return;
        };
        match data.tag {
            MarkerTag::SectionBegin | MarkerTag::SectionEnd => {
                self.sections.feed(event, data, index)
            }
            MarkerTag::AsyncBegin | MarkerTag::AsyncEnd => self.asyncs.feed(event, data, index),
            MarkerTag::Counter => self.counters.feed(event, data, index),
        }
    }

    /// Flush everything still pending as trailing entries bounded by the
    /// total trace duration.
    pub fn finalize(self, trace_duration: f64, index: &mut IntervalIndex<'t>) {
        self.sections.finalize(trace_duration, index);
        self.asyncs.finalize(trace_duration, index);
        self.counters.finalize(trace_duration, index);
    }
}

struct PendingBegin<'t> {
    pid: i32,
    name: &'t str,
    event: &'t TraceEvent,
}

impl<'t> PendingBegin<'t> {
    fn close(&self, end: f64) -> Entry<'t> {
        Entry::Span(Span {
            pid: self.pid,
            name: self.name,
            interval: Interval::new(self.event.timestamp, end),
            begin: self.event,
        })
    }
}

/// Nested begin/end sections, one LIFO stack per task. The tracing API
/// always closes the innermost open section first, so a stack reproduces
/// the nesting exactly.
#[derive(Default)]
struct SectionCorrelator<'t> {
    pending: HashMap<i32, Vec<PendingBegin<'t>>>,
}

impl<'t> SectionCorrelator<'t> {
    fn feed(&mut self, event: &'t TraceEvent, data: &'t MarkerWrite, index: &mut IntervalIndex<'t>) {
        match data.tag {
            MarkerTag::SectionBegin => {
                let (Some(pid), Some(name)) = (data.pid, data.section_name.as_deref()) else {
                    warn!(
                        timestamp = event.timestamp,
                        "section begin marker missing pid or name, skipping"
                    );
                    return;
                };
                self.pending
                    .entry(event.task.pid)
                    .or_default()
                    .push(PendingBegin { pid, name, event });
            }
            MarkerTag::SectionEnd => {
                match self.pending.get_mut(&event.task.pid).and_then(Vec::pop) {
                    Some(begin) => index.insert(begin.close(event.timestamp)),
                    None => warn!(
                        timestamp = event.timestamp,
                        pid = event.task.pid,
                        "section end without a matching begin, dropping"
                    ),
                }
            }
            _ => {}
        }
    }

    fn finalize(self, trace_duration: f64, index: &mut IntervalIndex<'t>) {
        for (_, stack) in sorted(self.pending) {
            for begin in stack {
                index.insert(begin.close(trace_duration));
            }
        }
    }
}

/// Async begin/end pairs, which may start and end on different tasks and
/// are disambiguated only by (payload pid, cookie).
#[derive(Default)]
struct AsyncCorrelator<'t> {
    pending: HashMap<(i32, i64), Vec<PendingBegin<'t>>>,
}

impl<'t> AsyncCorrelator<'t> {
    fn feed(&mut self, event: &'t TraceEvent, data: &'t MarkerWrite, index: &mut IntervalIndex<'t>) {
        let (Some(pid), Some(cookie)) = (data.pid, data.cookie) else {
            warn!(
                timestamp = event.timestamp,
                "async marker missing pid or cookie, skipping"
            );
            return;
        };
        match data.tag {
            MarkerTag::AsyncBegin => {
                let Some(name) = data.section_name.as_deref() else {
                    warn!(
                        timestamp = event.timestamp,
                        pid, cookie, "async begin marker missing name, skipping"
                    );
                    return;
                };
                self.pending
                    .entry((pid, cookie))
                    .or_default()
                    .push(PendingBegin { pid, name, event });
            }
            MarkerTag::AsyncEnd => {
                match self.pending.get_mut(&(pid, cookie)).and_then(Vec::pop) {
                    Some(begin) => index.insert(begin.close(event.timestamp)),
                    None => warn!(
                        timestamp = event.timestamp,
                        pid, cookie, "async end without a matching begin, dropping"
                    ),
                }
            }
            _ => {}
        }
    }

    fn finalize(self, trace_duration: f64, index: &mut IntervalIndex<'t>) {
        for (_, stack) in sorted(self.pending) {
            for begin in stack {
                index.insert(begin.close(trace_duration));
            }
        }
    }
}

struct PendingReading<'t> {
    timestamp: f64,
    value: f64,
    event: Option<&'t TraceEvent>,
}

impl<'t> PendingReading<'t> {
    /// Sentinel state for a counter nothing has been observed for yet.
    fn initial() -> Self {
        PendingReading {
            timestamp: 0.0,
            value: -1.0,
            event: None,
        }
    }
}

/// Counter readings chained per (payload pid, counter name). A counter's
/// instantaneous value is only known retroactively once the next reading
/// arrives, so each emitted sample carries the previous reading held over
/// the interval up to the new one.
#[derive(Default)]
struct CounterCorrelator<'t> {
    pending: HashMap<(i32, &'t str), PendingReading<'t>>,
}

impl<'t> CounterCorrelator<'t> {
    fn feed(&mut self, event: &'t TraceEvent, data: &'t MarkerWrite, index: &mut IntervalIndex<'t>) {
        let (Some(pid), Some(name), Some(value)) =
            (data.pid, data.counter_name.as_deref(), data.value)
        else {
            warn!(
                timestamp = event.timestamp,
                "counter marker missing pid, name, or value, skipping"
            );
            return;
        };
        let slot = self
            .pending
            .entry((pid, name))
            .or_insert_with(PendingReading::initial);
        index.insert(Entry::Counter(CounterSample {
            pid,
            name,
            value: slot.value,
            interval: Interval::new(slot.timestamp, event.timestamp),
            event: slot.event,
        }));
        *slot = PendingReading {
            timestamp: event.timestamp,
            value,
            event: Some(event),
        };
    }

    fn finalize(self, trace_duration: f64, index: &mut IntervalIndex<'t>) {
        for ((pid, name), slot) in sorted(self.pending) {
            index.insert(Entry::Counter(CounterSample {
                pid,
                name,
                value: slot.value,
                interval: Interval::new(slot.timestamp, trace_duration),
                event: slot.event,
            }));
        }
    }
}

/// Drain a pending map in sorted key order so trailing entries with equal
/// start times land in the index deterministically.
fn sorted<K: Ord, V>(map: HashMap<K, V>) -> Vec<(K, V)> {
    let mut pairs: Vec<(K, V)> = map.into_iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    pairs
}
