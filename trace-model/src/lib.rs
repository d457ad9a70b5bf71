//! Event model for mobile OS traces.
//!
//! A [`Trace`] is a finite, time-ordered sequence of [`TraceEvent`]s plus
//! the total capture duration, the set of tracepoints the capture
//! contained, and a [`CpuTimeline`] of per-task scheduling slices. Marker
//! writes carry a decoded [`MarkerWrite`] payload; everything else carries
//! none.

use std::collections::HashSet;

use interval::{Interval, IntervalList, Spanned};
use serde::{Deserialize, Serialize};

mod marker;

pub use marker::{MarkerError, MarkerTag, MarkerWrite};

pub const MARKER_TRACEPOINT: &str = "tracing_mark_write";
pub const SCHED_SWITCH_TRACEPOINT: &str = "sched_switch";
pub const SCHED_WAKEUP_TRACEPOINT: &str = "sched_wakeup";

/// A kernel task identity. Two tasks are the same only when both pid and
/// name match; pids get recycled, names alone collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    pub pid: i32,
    pub name: String,
}

impl Task {
    pub fn new(pid: i32, name: impl Into<String>) -> Self {
        Task {
            pid,
            name: name.into(),
        }
    }
}

/// One event from the capture. Timestamps are monotonic seconds from the
/// start of the trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub timestamp: f64,
    pub task: Task,
    pub tracepoint: String,
    pub data: Option<MarkerWrite>,
}

/// A contiguous stretch of CPU time a task was scheduled for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSlice {
    pub task: Task,
    pub interval: Interval,
}

impl Spanned for TaskSlice {
    fn interval(&self) -> Interval {
        self.interval
    }

    fn with_interval(&self, interval: Interval) -> Self {
        TaskSlice {
            task: self.task.clone(),
            interval,
        }
    }
}

/// When each task was actually running, reconstructed from the scheduler
/// tracepoints by the capture layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CpuTimeline {
    slices: IntervalList<TaskSlice>,
}

impl CpuTimeline {
    pub fn slices(&self) -> &IntervalList<TaskSlice> {
        &self.slices
    }

    pub fn for_task(&self, task: &Task) -> IntervalList<TaskSlice> {
        self.slices
            .iter()
            .filter(|slice| slice.task == *task)
            .cloned()
            .collect()
    }

    pub fn for_task_name(&self, name: &str) -> IntervalList<TaskSlice> {
        self.slices
            .iter()
            .filter(|slice| slice.task.name == name)
            .cloned()
            .collect()
    }
}

/// A complete captured trace, immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    events: Vec<TraceEvent>,
    duration: f64,
    tracepoints: HashSet<String>,
    cpu: CpuTimeline,
}

impl Trace {
    pub fn builder() -> TraceBuilder {
        TraceBuilder::default()
    }

    /// Total capture duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Whether the capture contained `tracepoint` at all, as opposed to
    /// containing it but recording no events for it.
    pub fn has_tracepoint(&self, tracepoint: &str) -> bool {
        self.tracepoints.contains(tracepoint)
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn events_for<'a>(
        &'a self,
        tracepoint: &'a str,
    ) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events
            .iter()
            .filter(move |event| event.tracepoint == tracepoint)
    }

    pub fn cpu(&self) -> &CpuTimeline {
        &self.cpu
    }
}

/// Assembles a [`Trace`], sorting events into timestamp order on build so
/// consumers always see a time-ordered stream.
#[derive(Debug, Default)]
pub struct TraceBuilder {
    events: Vec<TraceEvent>,
    duration: Option<f64>,
    tracepoints: HashSet<String>,
    sched: Vec<TaskSlice>,
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Register a tracepoint as present in the capture even if no event
    /// for it was recorded.
    pub fn tracepoint(mut self, name: impl Into<String>) -> Self {
        self.tracepoints.insert(name.into());
        self
    }

    pub fn event(mut self, event: TraceEvent) -> Self {
        self.tracepoints.insert(event.tracepoint.clone());
        self.events.push(event);
        self
    }

    /// Add one marker write emitted by `task` at `timestamp`.
    pub fn marker(self, timestamp: f64, task: Task, data: MarkerWrite) -> Self {
        self.event(TraceEvent {
            timestamp,
            task,
            tracepoint: MARKER_TRACEPOINT.to_string(),
            data: Some(data),
        })
    }

    /// Add a scheduling slice for `task`. Implies the scheduler
    /// tracepoints were captured.
    pub fn sched(mut self, task: Task, start: f64, end: f64) -> Self {
        self.tracepoints.insert(SCHED_SWITCH_TRACEPOINT.to_string());
        self.tracepoints.insert(SCHED_WAKEUP_TRACEPOINT.to_string());
        self.sched.push(TaskSlice {
            task,
            interval: Interval::new(start, end),
        });
        self
    }

    pub fn build(self) -> Trace {
        let mut events = self.events;
        events.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));

        let observed_end = events
            .last()
            .map(|event| event.timestamp)
            .into_iter()
            .chain(self.sched.iter().map(|slice| slice.interval.end))
            .fold(0.0_f64, f64::max);
        let duration = self.duration.unwrap_or(observed_end);

        let cpu = CpuTimeline {
            slices: self.sched.into_iter().collect(),
        };

        Trace {
            events,
            duration,
            tracepoints: self.tracepoints,
            cpu,
        }
    }
}
