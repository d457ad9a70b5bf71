use std::collections::HashMap;

use bon::Builder;
use interval::{Interval, IntervalList, Spanned};
use serde::Serialize;
use trace_model::{Task, TraceEvent};

/// A closed begin/end section, nested or asynchronous.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Span<'t> {
    pub pid: i32,
    pub name: &'t str,
    pub interval: Interval,
    /// The marker-write event that opened the section.
    pub begin: &'t TraceEvent,
}

/// One counter reading held over an interval. The value and originating
/// event are those of the *previous* reading for the same counter; the
/// first sample of a series carries the sentinel value -1.0 and no event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CounterSample<'t> {
    pub pid: i32,
    pub name: &'t str,
    pub value: f64,
    pub interval: Interval,
    pub event: Option<&'t TraceEvent>,
}

/// An entry in the interval index: either a section span or a counter
/// sample, both addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum Entry<'t> {
    Span(Span<'t>),
    Counter(CounterSample<'t>),
}

impl<'t> Entry<'t> {
    pub fn name(&self) -> &'t str {
        match self {
            Entry::Span(span) => span.name,
            Entry::Counter(sample) => sample.name,
        }
    }

    pub fn pid(&self) -> i32 {
        match self {
            Entry::Span(span) => span.pid,
            Entry::Counter(sample) => sample.pid,
        }
    }

    pub fn interval(&self) -> Interval {
        match self {
            Entry::Span(span) => span.interval,
            Entry::Counter(sample) => sample.interval,
        }
    }

    /// The originating event: a span's begin marker, a counter sample's
    /// previous reading. None for the first sample of a counter series.
    pub fn event(&self) -> Option<&'t TraceEvent> {
        match self {
            Entry::Span(span) => Some(span.begin),
            Entry::Counter(sample) => sample.event,
        }
    }

    pub fn task(&self) -> Option<&'t Task> {
        self.event().map(|event| &event.task)
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Entry::Span(_) => None,
            Entry::Counter(sample) => Some(sample.value),
        }
    }
}

impl<'t> Spanned for Entry<'t> {
    fn interval(&self) -> Interval {
        Entry::interval(self)
    }

    fn with_interval(&self, interval: Interval) -> Self {
        match self {
            Entry::Span(span) => Entry::Span(Span { interval, ..*span }),
            Entry::Counter(sample) => Entry::Counter(CounterSample { interval, ..*sample }),
        }
    }
}

/// Parameters for an interval-index lookup.
#[derive(Debug, Clone, Builder)]
pub struct EventQuery<'q> {
    /// Section/counter name. Omitted: all series merged in start order.
    pub name: Option<&'q str>,
    /// Keep only entries whose originating event belongs to this task.
    pub task: Option<&'q Task>,
    /// Clip surviving entries to this window.
    pub window: Option<Interval>,
    /// With false, `name` is a substring match over all series names.
    #[builder(default = true)]
    pub match_exact: bool,
}

/// Hashable form of a query, used as the memoization key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct QueryKey {
    name: Option<String>,
    task: Option<(i32, String)>,
    window: Option<(u64, u64)>,
    match_exact: bool,
}

impl QueryKey {
    pub fn from_query(query: &EventQuery<'_>) -> Self {
        QueryKey {
            name: query.name.map(str::to_string),
            task: query.task.map(|task| (task.pid, task.name.clone())),
            window: window_key(query.window),
            match_exact: query.match_exact,
        }
    }
}

pub(crate) fn window_key(window: Option<Interval>) -> Option<(u64, u64)> {
    window.map(|w| (w.start.to_bits(), w.end.to_bits()))
}

/// Name-keyed store of every span and counter sample produced by the
/// correlation pass. Per-name series stay in ascending start order no
/// matter which order their closing events arrived in.
#[derive(Debug, Default)]
pub(crate) struct IntervalIndex<'t> {
    by_name: HashMap<&'t str, IntervalList<Entry<'t>>>,
}

impl<'t> IntervalIndex<'t> {
    pub fn insert(&mut self, entry: Entry<'t>) {
        self.by_name.entry(entry.name()).or_default().push(entry);
    }

    pub fn names(&self) -> impl Iterator<Item = &'t str> + '_ {
        self.by_name.keys().copied()
    }

    /// Series selection, then window clipping, then task filtering, in
    /// that order. Multi-series results merge over sorted names so ties on
    /// start time are reproducible.
    pub fn query(&self, query: &EventQuery<'_>) -> IntervalList<Entry<'t>> {
        let mut selected = match query.name {
            Some(name) if query.match_exact => {
                self.by_name.get(name).cloned().unwrap_or_default()
            }
            Some(name) => self.merged_over(|key| key.contains(name)),
            None => self.merged_over(|_| true),
        };

        if let Some(window) = query.window {
            selected = selected.slice(window, true);
        }
        if let Some(task) = query.task {
            selected = selected
                .iter()
                .filter(|entry| entry.task() == Some(task))
                .copied()
                .collect();
        }
        selected
    }

    fn merged_over(&self, keep: impl Fn(&str) -> bool) -> IntervalList<Entry<'t>> {
        let mut keys: Vec<&str> = self.by_name.keys().filter(|key| keep(key)).copied().collect();
        keys.sort_unstable();
        IntervalList::merged(keys.iter().map(|key| &self.by_name[key]))
    }
}
