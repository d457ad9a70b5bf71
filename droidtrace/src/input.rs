use std::sync::Arc;

use interval::Interval;
use serde::Serialize;
use trace_model::{MARKER_TRACEPOINT, SCHED_SWITCH_TRACEPOINT, SCHED_WAKEUP_TRACEPOINT};

use crate::index::window_key;
use crate::{
    Analyzer, EventQuery, Result, DELIVER_INPUT_EVENT, INPUT_READER_TASK, POST_FRAMEBUFFER,
};

/// One input-to-display measurement: from the touch IRQ handler running to
/// the framebuffer post reflecting the input. Delays between the physical
/// touch and the IRQ are not accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InputLatency {
    pub interval: Interval,
    pub latency: f64,
}

impl<'t> Analyzer<'t> {
    /// Input-to-display latencies for the IRQ line named `irq_name`.
    ///
    /// The input reader drains several hardware events per wakeup, so the
    /// trace is cut into windows between successive reader scheduling
    /// slices. The first IRQ slice inside a window marks the latency
    /// start; the first input delivery after the window followed by the
    /// first framebuffer post after that delivery marks the end. When no
    /// downstream stage is found the record degenerates to zero duration
    /// and is kept in the output.
    pub fn input_latency(
        &self,
        irq_name: &str,
        window: Option<Interval>,
    ) -> Result<Arc<Vec<InputLatency>>> {
        self.require(MARKER_TRACEPOINT)?;
        self.require(SCHED_SWITCH_TRACEPOINT)?;
        self.require(SCHED_WAKEUP_TRACEPOINT)?;

        let key = (irq_name.to_string(), window_key(window));
        if let Some(latencies) = self.caches.input.borrow().get(&key) {
            return Ok(latencies.clone());
        }

        let mut latencies = self.trace_input_latencies(irq_name)?;
        if let Some(window) = window {
            latencies.retain(|latency| latency.interval.overlaps(&window));
        }

        let latencies = Arc::new(latencies);
        self.caches.input.borrow_mut().insert(key, latencies.clone());
        Ok(latencies)
    }

    fn trace_input_latencies(&self, irq_name: &str) -> Result<Vec<InputLatency>> {
        let cpu = self.trace.cpu();
        let irq_slices = cpu.for_task_name(irq_name);

        let mut latencies = Vec::new();
        let mut last_end = 0.0;
        for reader in cpu.for_task_name(INPUT_READER_TASK).iter() {
            let window = Interval::new(last_end, reader.interval.end);
            last_end = reader.interval.end;

            let irqs = irq_slices.slice(window, false);
            let Some(first_irq) = irqs.first() else {
                continue;
            };
            let start = first_irq.interval.start;
            let mut end = start;

            let after_reader = Interval::new(window.end, self.trace.duration());
            let deliveries = self.event_intervals(
                EventQuery::builder()
                    .name(DELIVER_INPUT_EVENT)
                    .window(after_reader)
                    .build(),
            )?;
            if let Some(delivery) = deliveries.first() {
                let after_delivery =
                    Interval::new(delivery.interval().start, self.trace.duration());
                let posts = self.event_intervals(
                    EventQuery::builder()
                        .name(POST_FRAMEBUFFER)
                        .window(after_delivery)
                        .build(),
                )?;
                if let Some(post) = posts.first() {
                    end = post.interval().end;
                }
            }

            let interval = Interval::new(start, end);
            latencies.push(InputLatency {
                interval,
                latency: interval.duration(),
            });
        }
        Ok(latencies)
    }
}
