// crates/player-pipeline/src/sinks.rs
//
// The platform audio/video sink boundaries, modeled as traits so the crate
// is unit-testable against fakes without linking a concrete SDL/ALSA/etc
// backend (spec.md scopes these as external collaborators named only by
// the interfaces they expose).

use anyhow::Result;

pub trait AudioSink: Send {
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;
    fn pause(&mut self);
    fn play(&mut self);
    fn flush(&mut self);
    fn stop(&mut self);
    fn set_volume(&mut self, volume: f32);
    fn num_channels(&self) -> u16;
    fn sample_rate(&self) -> u32;
    /// Seconds of buffered-but-not-yet-audible audio, queried through
    /// whichever of the sink's two latency APIs is currently trusted (see
    /// [`LatencyTracker`]).
    fn latency_secs(&self) -> Option<f64>;
}

/// A locked writable pixel buffer, released on drop. The `lock`/`unlock`
/// dance on the real video sink is a scoped acquisition with guaranteed
/// release on every exit path (spec.md §9) — this guard is exactly that:
/// it borrows the sink for its lifetime and calls `unlock_and_post` in
/// `Drop`, so an early return or panic during a write can never leak a
/// locked surface.
pub struct LockedBuffer<'a> {
    sink: &'a mut dyn VideoSink,
    pub bits: *mut u8,
    pub stride: usize,
    pub width: u32,
    pub height: u32,
    posted: bool,
}

impl<'a> LockedBuffer<'a> {
    pub fn post(mut self) {
        self.sink.unlock_and_post();
        self.posted = true;
    }
}

impl<'a> Drop for LockedBuffer<'a> {
    fn drop(&mut self) {
        if !self.posted {
            self.sink.unlock_and_post();
        }
    }
}

pub trait VideoSink: Send {
    /// # Safety
    /// The returned pointer is valid only until the matching
    /// `unlock_and_post` call (performed by the `LockedBuffer`'s `Drop` or
    /// explicit `post`).
    fn lock(&mut self, width: u32, height: u32) -> Result<(*mut u8, usize)>;
    fn unlock_and_post(&mut self);
    /// Re-posts the most recently written buffer without a fresh lock —
    /// used when the surface is recreated while paused.
    fn render_last_frame(&mut self);
}

pub fn lock_buffer<'a>(sink: &'a mut dyn VideoSink, width: u32, height: u32) -> Result<LockedBuffer<'a>> {
    let (bits, stride) = sink.lock(width, height)?;
    Ok(LockedBuffer {
        sink,
        bits,
        stride,
        width,
        height,
        posted: false,
    })
}

/// Stabilization policy for the sink's two latency-query paths: a precise
/// timestamp API that may spuriously repeat or regress while ramping up
/// after a pause, and an integer-millisecond fallback. Poll no more often
/// than every 500 ms while stabilizing, else every 20s; fall back to the
/// coarse API after 5 consecutive non-monotonic polls.
pub struct LatencyTracker {
    last_poll_wall: f64,
    last_value: Option<f64>,
    non_monotonic_streak: u32,
    using_fallback: bool,
}

impl LatencyTracker {
    const STABILIZING_INTERVAL: f64 = 0.5;
    const STEADY_INTERVAL: f64 = 20.0;
    const FALLBACK_THRESHOLD: u32 = 5;

    pub fn new() -> Self {
        Self {
            last_poll_wall: f64::NEG_INFINITY,
            last_value: None,
            non_monotonic_streak: 0,
            using_fallback: false,
        }
    }

    pub fn should_poll(&self, now: f64) -> bool {
        let interval = if self.using_fallback {
            Self::STEADY_INTERVAL
        } else {
            Self::STABILIZING_INTERVAL
        };
        now - self.last_poll_wall >= interval
    }

    /// Feed a fresh reading from the precise timestamp API. Tracks
    /// monotonicity and switches to the fallback path after 5 straight
    /// regressions/repeats.
    pub fn record_precise(&mut self, now: f64, value: f64) {
        self.last_poll_wall = now;
        if let Some(prev) = self.last_value {
            if value <= prev {
                self.non_monotonic_streak += 1;
                if self.non_monotonic_streak >= Self::FALLBACK_THRESHOLD {
                    self.using_fallback = true;
                }
            } else {
                self.non_monotonic_streak = 0;
            }
        }
        self.last_value = Some(value);
    }

    pub fn record_fallback(&mut self, now: f64, value: f64) {
        self.last_poll_wall = now;
        self.last_value = Some(value);
    }

    pub fn is_using_fallback(&self) -> bool {
        self.using_fallback
    }

    pub fn latest(&self) -> Option<f64> {
        self.last_value
    }
}

impl Default for LatencyTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switches_to_fallback_after_five_non_monotonic_polls() {
        let mut t = LatencyTracker::new();
        t.record_precise(0.0, 1.0);
        for i in 1..=5 {
            t.record_precise(i as f64 * 0.5, 1.0); // repeats, never advances
        }
        assert!(t.is_using_fallback());
    }

    #[test]
    fn stays_precise_when_monotonic() {
        let mut t = LatencyTracker::new();
        t.record_precise(0.0, 1.0);
        t.record_precise(0.5, 1.1);
        t.record_precise(1.0, 1.2);
        assert!(!t.is_using_fallback());
    }

    #[test]
    fn poll_interval_widens_once_on_fallback() {
        let mut t = LatencyTracker::new();
        assert!(t.should_poll(0.0));
        t.record_precise(0.0, 1.0);
        assert!(!t.should_poll(0.1));
        assert!(t.should_poll(0.6));
    }
}
