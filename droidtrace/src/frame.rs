use std::sync::Arc;

use interval::Interval;
use serde::Serialize;
use trace_model::MARKER_TRACEPOINT;

use crate::index::window_key;
use crate::{AnalysisError, Analyzer, EventQuery, Result, POST_FRAMEBUFFER, SURFACEFLINGER_VSYNC};

/// Nominal display refresh period at 60 Hz.
pub const VSYNC_PERIOD: f64 = 1.0 / 60.0;

/// Frame statistics for one window of the trace.
#[derive(Debug, Clone, Serialize)]
pub struct FrameStats {
    pub frame_rate: f64,
    pub presented_frames: u64,
    /// Accumulated duration of vsync intervals that had work to present.
    pub active_time: f64,
    /// Vsync intervals in which no framebuffer was posted.
    pub jank: Vec<Interval>,
}

impl<'t> Analyzer<'t> {
    /// Presented frames per second of active vsync time.
    ///
    /// The compositor only updates the framebuffer when there is work to
    /// do, so frames divided by wall-clock time would count idle screen
    /// time against the app. A vsync interval lasting at least twice the
    /// nominal period means nothing was scheduled for presentation; those
    /// intervals are excluded from the denominator and from jank
    /// detection.
    pub fn frame_rate(&self, window: Option<Interval>) -> Result<f64> {
        Ok(self.frame_stats(window)?.frame_rate)
    }

    /// Vsync intervals in which the compositor failed to present.
    pub fn jank_intervals(&self, window: Option<Interval>) -> Result<Vec<Interval>> {
        Ok(self.frame_stats(window)?.jank.clone())
    }

    /// The shared computation behind [`Analyzer::frame_rate`] and
    /// [`Analyzer::jank_intervals`], cached per window so both accessors
    /// observe one consistent result.
    pub fn frame_stats(&self, window: Option<Interval>) -> Result<Arc<FrameStats>> {
        self.require(MARKER_TRACEPOINT)?;

        let key = window_key(window);
        if let Some(stats) = self.caches.frames.borrow().get(&key) {
            return Ok(stats.clone());
        }

        let vsyncs = self.event_intervals(
            EventQuery::builder()
                .name(SURFACEFLINGER_VSYNC)
                .maybe_window(window)
                .build(),
        )?;

        let mut active_time = 0.0;
        let mut presented_frames = 0u64;
        let mut jank = Vec::new();
        for vsync in vsyncs.iter() {
            let interval = vsync.interval();
            if interval.duration() >= 2.0 * VSYNC_PERIOD {
                continue;
            }
            active_time += interval.duration();
            let frames = self
                .event_intervals(
                    EventQuery::builder()
                        .name(POST_FRAMEBUFFER)
                        .window(interval)
                        .build(),
                )?
                .len();
            presented_frames += frames as u64;
            if frames == 0 {
                jank.push(interval);
            }
        }

        if active_time == 0.0 {
            return Err(AnalysisError::UndefinedMetric(
                "no active vsync time in the requested window",
            ));
        }

        let stats = Arc::new(FrameStats {
            frame_rate: presented_frames as f64 / active_time,
            presented_frames,
            active_time,
            jank,
        });
        self.caches.frames.borrow_mut().insert(key, stats.clone());
        Ok(stats)
    }
}
