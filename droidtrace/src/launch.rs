use std::sync::Arc;

use interval::Interval;
use serde::Serialize;
use trace_model::{
    Task, TraceEvent, MARKER_TRACEPOINT, SCHED_SWITCH_TRACEPOINT, SCHED_WAKEUP_TRACEPOINT,
};

use crate::{
    Analyzer, Entry, EventQuery, Result, BIND_APPLICATION, PERFORM_TRAVERSALS,
    SET_TRANSACTION_STATE, WM_UPDATE_FOCUS,
};

/// One cold-launch measurement: from the task's first scheduling to the
/// last UI traversal that produced a surface transaction not attributable
/// to a focus-only adjustment. Complex apps showing a welcome screen
/// before the first user-interactable window are measured up to the first
/// displayed window only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaunchLatency {
    pub task: Task,
    pub interval: Interval,
    pub latency: f64,
}

impl<'t> Analyzer<'t> {
    /// Cold-launch latencies, one per application bind seen in the trace,
    /// optionally restricted to `task`.
    ///
    /// A launching app is forked, bound, then runs its lifecycle
    /// callbacks; the bind marker is the reliable anchor for which app is
    /// launching. Launches where either endpoint cannot be resolved are
    /// omitted.
    pub fn app_launch_latencies(&self, task: Option<&Task>) -> Result<Arc<Vec<LaunchLatency>>> {
        self.require(MARKER_TRACEPOINT)?;
        self.require(SCHED_SWITCH_TRACEPOINT)?;
        self.require(SCHED_WAKEUP_TRACEPOINT)?;

        let key = task.cloned();
        if let Some(latencies) = self.caches.launches.borrow().get(&key) {
            return Ok(latencies.clone());
        }

        let binds = self.event_intervals(EventQuery::builder().name(BIND_APPLICATION).build())?;

        let mut latencies = Vec::new();
        for (position, bind) in binds.iter().enumerate() {
            let Some(event) = bind.event() else {
                continue;
            };
            if let Some(task) = task {
                if event.task != *task {
                    continue;
                }
            }
            let next_event = binds.get(position + 1).and_then(Entry::event);

            let Some(start) = self.first_scheduled(&event.task, event.timestamp) else {
                continue;
            };
            let bound = next_event
                .and_then(|next| self.first_scheduled(&next.task, next.timestamp))
                .unwrap_or_else(|| self.trace.duration());
            let Some(end) = self.launch_end(event, bound)? else {
                continue;
            };

            let interval = Interval::new(start, end);
            latencies.push(LaunchLatency {
                task: event.task.clone(),
                interval,
                latency: interval.duration(),
            });
        }

        let latencies = Arc::new(latencies);
        self.caches
            .launches
            .borrow_mut()
            .insert(key, latencies.clone());
        Ok(latencies)
    }

    /// The first time `task` was ever scheduled on a CPU before `before`.
    fn first_scheduled(&self, task: &Task, before: f64) -> Option<f64> {
        self.trace
            .cpu()
            .for_task(task)
            .slice(Interval::new(0.0, before), true)
            .first()
            .map(|slice| slice.interval.start)
    }

    /// Launch end for the app bound by `bind`, searched up to `bound`.
    ///
    /// Walks UI traversals of the launching task in reverse chronological
    /// order, looking for the latest one whose sub-window up to the
    /// previous cursor contains a surface transaction and no window-
    /// manager focus update (a focus update means the transaction came
    /// from an app close or focus switch, not the launch). A sub-window
    /// whose end coincides exactly with the outer bound is rejected and
    /// the scan moves to the next-earlier traversal.
    fn launch_end(&self, bind: &TraceEvent, bound: f64) -> Result<Option<f64>> {
        if bound < bind.timestamp {
            return Ok(None);
        }
        let search = Interval::new(bind.timestamp, bound);
        let traversals = self.event_intervals(
            EventQuery::builder()
                .name(PERFORM_TRAVERSALS)
                .task(&bind.task)
                .window(search)
                .match_exact(false)
                .build(),
        )?;

        let mut cursor = bound;
        for traversal in traversals.iter().rev() {
            let sub = Interval::new(traversal.interval().start, cursor);
            let transactions = self.event_intervals(
                EventQuery::builder()
                    .name(SET_TRANSACTION_STATE)
                    .window(sub)
                    .build(),
            )?;
            let focus_updates = self.event_intervals(
                EventQuery::builder().name(WM_UPDATE_FOCUS).window(sub).build(),
            )?;
            if !transactions.is_empty() && focus_updates.is_empty() && sub.end != bound {
                return Ok(Some(sub.end));
            }
            cursor = traversal.interval().start;
        }
        Ok(None)
    }
}
