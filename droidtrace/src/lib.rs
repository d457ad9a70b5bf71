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

//! Performance analysis of mobile OS traces.
//!
//! One linear pass correlates the interleaved `tracing_mark_write` markers
//! of a [`Trace`] into closed spans and counter samples, indexed by name.
//! Three derivations then query that index: display frame rate with jank
//! intervals, touch-input-to-display latency, and application cold-launch
//! latency. Every query and derivation is memoized for the lifetime of the
//! [`Analyzer`].
//!
//! ```
//! use droidtrace::{Analyzer, EventQuery};
//! use trace_model::{MarkerWrite, Task, Trace};
//!
//! let sf = Task::new(200, "surfaceflinger");
//! let trace = Trace::builder()
//!     .marker(0.010, sf.clone(), MarkerWrite::section_begin(200, "postFramebuffer"))
//!     .marker(0.012, sf.clone(), MarkerWrite::section_end())
//!     .duration(1.0)
//!     .build();
//!
//! let analyzer = Analyzer::new(&trace);
//! let posts = analyzer
//!     .event_intervals(EventQuery::builder().name("postFramebuffer").build())
//!     .unwrap();
//! assert_eq!(posts.len(), 1);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use trace_model::{Task, Trace, MARKER_TRACEPOINT};
use tracing::debug;

mod correlate;
mod error;
mod frame;
mod index;
mod input;
mod launch;

pub use error::{AnalysisError, Result};
pub use frame::{FrameStats, VSYNC_PERIOD};
pub use index::{CounterSample, Entry, EventQuery, EventQueryBuilder, Span};
pub use input::InputLatency;
pub use launch::LaunchLatency;

use correlate::TagDispatcher;
use index::{IntervalIndex, QueryKey};

/// Compositor vsync sections; open while the compositor has work to do.
pub const SURFACEFLINGER_VSYNC: &str = "VSYNC-sf";
/// Compositor framebuffer posts, one per presented frame.
pub const POST_FRAMEBUFFER: &str = "postFramebuffer";
/// Input dispatch handing an event to the consuming window.
pub const DELIVER_INPUT_EVENT: &str = "deliverInputEvent";
/// Application bind during process launch.
pub const BIND_APPLICATION: &str = "bindApplication";
/// View-system UI traversals (measure/layout/draw).
pub const PERFORM_TRAVERSALS: &str = "performTraversals";
/// Surface state handed to the compositor.
pub const SET_TRANSACTION_STATE: &str = "setTransactionState";
/// Window-manager focus updates.
pub const WM_UPDATE_FOCUS: &str = "wmUpdateFocus";
/// Name of the task that drains and decodes input device events.
pub const INPUT_READER_TASK: &str = "InputReader";

type WindowKey = Option<(u64, u64)>;

#[derive(Default)]
struct Caches<'t> {
    queries: RefCell<HashMap<QueryKey, Arc<[Entry<'t>]>>>,
    frames: RefCell<HashMap<WindowKey, Arc<FrameStats>>>,
    input: RefCell<HashMap<(String, WindowKey), Arc<Vec<InputLatency>>>>,
    launches: RefCell<HashMap<Option<Task>, Arc<Vec<LaunchLatency>>>>,
}

/// Analysis session over one immutable [`Trace`].
///
/// Construction runs the correlation pass (when the trace contains the
/// marker tracepoint at all); afterwards the analyzer is read-only and
/// every query is cached by its full argument set.
pub struct Analyzer<'t> {
    trace: &'t Trace,
    index: IntervalIndex<'t>,
    caches: Caches<'t>,
}

impl<'t> Analyzer<'t> {
    pub fn new(trace: &'t Trace) -> Self {
        let mut index = IntervalIndex::default();
        if trace.has_tracepoint(MARKER_TRACEPOINT) {
            let mut dispatcher = TagDispatcher::new();
            for event in trace.events_for(MARKER_TRACEPOINT) {
                dispatcher.feed(event, &mut index);
            }
            dispatcher.finalize(trace.duration(), &mut index);
            debug!(names = index.names().count(), "correlated marker writes");
        }
        Analyzer {
            trace,
            index,
            caches: Caches::default(),
        }
    }

    pub fn trace(&self) -> &'t Trace {
        self.trace
    }

    /// Every distinct section/counter name observed in the trace.
    pub fn event_names(&self) -> Result<BTreeSet<String>> {
        self.require(MARKER_TRACEPOINT)?;
        Ok(self.index.names().map(str::to_string).collect())
    }

    /// Spans and counter samples matching `query`, in ascending start
    /// order.
    pub fn event_intervals(&self, query: EventQuery<'_>) -> Result<Arc<[Entry<'t>]>> {
        self.require(MARKER_TRACEPOINT)?;

        let key = QueryKey::from_query(&query);
        if let Some(entries) = self.caches.queries.borrow().get(&key) {
            return Ok(entries.clone());
        }

        let entries: Arc<[Entry<'t>]> =
            self.index.query(&query).into_iter().collect::<Vec<_>>().into();
        self.caches.queries.borrow_mut().insert(key, entries.clone());
        Ok(entries)
    }

    fn require(&self, tracepoint: &'static str) -> Result<()> {
        if self.trace.has_tracepoint(tracepoint) {
            Ok(())
        } else {
            Err(AnalysisError::MissingTracepoint(tracepoint))
        }
    }
}
