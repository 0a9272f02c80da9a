// crates/player-core/src/sync.rs
//
// Pure A/V synchronization math shared by the video render thread, the
// audio render thread, and the external-clock speed controller. Kept free
// of any stream/clock plumbing so it can be unit-tested against concrete
// scenario numbers without a decoder or a real Clock in the loop.

/// No A/V correction is applied if the two clocks disagree by this much or
/// more (a genuine discontinuity, not drift worth smoothing).
pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;

/// Clamp bounds for the sync threshold derived from the last frame-to-frame
/// duration.
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;

/// `syncThres = clamp(lastDuration, 0.04, 0.1)`.
pub fn sync_threshold(last_duration: f64) -> f64 {
    last_duration.clamp(AV_SYNC_THRESHOLD_MIN, AV_SYNC_THRESHOLD_MAX)
}

/// Outcome of [`video_frame_delay`] — distinguishes "duplicate this frame"
/// from "lengthen/shorten the delay", since the video render loop treats
/// duplication differently (it does not consume the next queued frame).
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DelayDecision {
    Shorten(f64),
    AsIs(f64),
    Lengthen(f64),
    Duplicate(f64),
}

impl DelayDecision {
    pub fn delay(self) -> f64 {
        match self {
            DelayDecision::Shorten(d)
            | DelayDecision::AsIs(d)
            | DelayDecision::Lengthen(d)
            | DelayDecision::Duplicate(d) => d,
        }
    }
}

/// Video render-thread delay computation. `diff` is
/// `video_pts - (master_pts - audio_latency)`; `last_duration` is the
/// frame-to-frame pts delta already clamped to `[0, max_frame_duration]`.
///
/// When this stream *is* the master clock, pass `diff = 0.0` — the caller
/// should do so explicitly rather than calling this at all, since the
/// "is not master" condition gates entry to this logic in the original.
pub fn video_frame_delay(diff: f64, last_duration: f64) -> DelayDecision {
    let sync_thres = sync_threshold(last_duration);
    if diff <= -sync_thres {
        DelayDecision::Shorten((last_duration + diff).max(0.0))
    } else if diff >= sync_thres && last_duration > 0.1 {
        DelayDecision::Lengthen(last_duration + diff)
    } else if diff >= sync_thres {
        DelayDecision::Duplicate(2.0 * last_duration)
    } else {
        DelayDecision::AsIs(last_duration)
    }
}

/// Clamp a raw frame-to-frame pts delta into `[0, max]`, falling back to
/// `fallback` (the frame's own declared duration) when the delta is
/// NaN, non-positive, or exceeds `max` (the `lastDuration` term).
pub fn clamp_frame_duration(delta: f64, max: f64, fallback: f64) -> f64 {
    if delta.is_nan() || delta <= 0.0 || delta > max {
        fallback
    } else {
        delta
    }
}

/// `maxFrameDuration`: 10s if the container may have
/// timestamp discontinuities, else 3600s.
pub fn max_frame_duration(may_have_discontinuities: bool) -> f64 {
    if may_have_discontinuities {
        10.0
    } else {
        3600.0
    }
}

/// The per-frame exponential-average accumulator driving audio sample-count
/// elasticity (the `syncClocks` accumulator). `alpha = exp(ln(0.01)/20)` — the
/// weight that makes a constant input fully "settle" to `acc*(1-alpha)`
/// after ~20 samples.
pub struct AudioDiffAccumulator {
    alpha: f64,
    accumulator: f64,
    count: u32,
}

impl Default for AudioDiffAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioDiffAccumulator {
    const SETTLE_SAMPLES: u32 = 20;

    pub fn new() -> Self {
        Self {
            alpha: (0.01f64.ln() / Self::SETTLE_SAMPLES as f64).exp(),
            accumulator: 0.0,
            count: 0,
        }
    }

    /// Feed one frame's `diff = audio_clock - master_clock`. Returns the
    /// settled average once at least 20 samples have accumulated since the
    /// last reset, else `None` (not enough history yet to trust it).
    pub fn feed(&mut self, diff: f64) -> Option<f64> {
        if diff.abs() >= AV_NOSYNC_THRESHOLD {
            self.accumulator = 0.0;
            self.count = 0;
            return None;
        }
        self.accumulator = diff + self.alpha * self.accumulator;
        self.count += 1;
        if self.count < Self::SETTLE_SAMPLES {
            return None;
        }
        Some(self.accumulator * (1.0 - self.alpha))
    }
}

/// Computes the elasticity-adjusted sample count for one audio frame
/// (the `syncClocks` elasticity rule): if `|avg_diff|` is at least the per-frame
/// threshold (`nb_samples / sample_rate`), nudge the sample count by
/// `diff * sample_rate`, clamped to ±10% of `nb_samples`.
pub fn wanted_samples(nb_samples: u32, sample_rate: u32, diff: f64, avg_diff: Option<f64>) -> u32 {
    let per_frame_threshold = nb_samples as f64 / sample_rate as f64;
    let avg_diff = match avg_diff {
        Some(a) if a.abs() >= per_frame_threshold => a,
        _ => return nb_samples,
    };
    let raw = nb_samples as f64 + diff * sample_rate as f64;
    let lo = nb_samples as f64 * 0.9;
    let hi = nb_samples as f64 * 1.1;
    raw.clamp(lo, hi).round() as u32
}

/// The external clock speed controller. Preserves the
/// source's own arithmetic verbatim, including the "dual slowdown" quirk
/// flagged there as an open question (see DESIGN.md): both the
/// starved-buffers branch and the over-full-buffers branch slow the clock
/// down by the same step, rather than one speeding it up. A "from first
/// principles" redesign would likely have the over-full branch speed up
/// instead; this function preserves the original's observed behavior.
pub fn external_clock_speed_step(
    video_packet_count: Option<u32>,
    audio_packet_count: Option<u32>,
    current_speed: f64,
) -> f64 {
    const STEP: f64 = 0.001;
    const MIN_SPEED: f64 = 0.900;
    const MAX_SPEED: f64 = 1.010;

    let starved = [video_packet_count, audio_packet_count]
        .into_iter()
        .flatten()
        .any(|c| c < 2);
    let both_abundant = video_packet_count.map(|c| c > 10).unwrap_or(true)
        && audio_packet_count.map(|c| c > 10).unwrap_or(true);

    if starved {
        (current_speed - STEP).max(MIN_SPEED)
    } else if both_abundant {
        (current_speed - STEP).max(MAX_SPEED).min(MAX_SPEED)
    } else if current_speed < 1.0 {
        (current_speed + STEP).min(1.0)
    } else if current_speed > 1.0 {
        (current_speed - STEP).max(1.0)
    } else {
        current_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_threshold_clamps_to_bounds() {
        assert_eq!(sync_threshold(0.01), AV_SYNC_THRESHOLD_MIN);
        assert_eq!(sync_threshold(0.5), AV_SYNC_THRESHOLD_MAX);
        assert_eq!(sync_threshold(0.06), 0.06);
    }

    #[test]
    fn video_frame_delay_shortens_when_far_behind() {
        let d = video_frame_delay(-0.2, 0.04);
        assert!(matches!(d, DelayDecision::Shorten(v) if (v - 0.0).abs() < 1e-9 || v >= 0.0));
    }

    #[test]
    fn video_frame_delay_duplicates_when_far_ahead_and_duration_small() {
        let d = video_frame_delay(0.2, 0.04);
        assert_eq!(d, DelayDecision::Duplicate(0.08));
    }

    #[test]
    fn video_frame_delay_lengthens_when_ahead_and_duration_large() {
        let d = video_frame_delay(0.2, 0.2);
        assert_eq!(d, DelayDecision::Lengthen(0.4));
    }

    #[test]
    fn video_frame_delay_as_is_within_threshold() {
        let d = video_frame_delay(0.01, 0.04);
        assert_eq!(d, DelayDecision::AsIs(0.04));
    }

    #[test]
    fn clamp_frame_duration_falls_back_on_nan_or_out_of_range() {
        assert_eq!(clamp_frame_duration(f64::NAN, 10.0, 0.04), 0.04);
        assert_eq!(clamp_frame_duration(-1.0, 10.0, 0.04), 0.04);
        assert_eq!(clamp_frame_duration(20.0, 10.0, 0.04), 0.04);
        assert_eq!(clamp_frame_duration(0.05, 10.0, 0.04), 0.05);
    }

    // S5: audio clock 1.000s, master 1.070s -> diff = -0.070;
    // nb_samples=1024 @ 48kHz, per-frame threshold ~= 0.0213.
    // After 21 feed cycles of constant diff, wantedSamples == 922.
    #[test]
    fn s5_av_sync_correction() {
        let mut acc = AudioDiffAccumulator::new();
        let diff = 1.000 - 1.070;
        let mut avg = None;
        for _ in 0..21 {
            avg = acc.feed(diff);
        }
        let samples = wanted_samples(1024, 48_000, diff, avg);
        assert_eq!(samples, 922);
    }

    #[test]
    fn wanted_samples_unchanged_below_per_frame_threshold() {
        // avg_diff present but tiny compared to per-frame threshold.
        let samples = wanted_samples(1024, 48_000, 0.0001, Some(0.0001));
        assert_eq!(samples, 1024);
    }

    #[test]
    fn wanted_samples_clamped_to_ten_percent() {
        // Huge diff should clamp at +10%.
        let samples = wanted_samples(1024, 48_000, 5.0, Some(5.0));
        assert_eq!(samples, (1024.0 * 1.1).round() as u32);
    }

    #[test]
    fn external_clock_slows_when_starved() {
        let s = external_clock_speed_step(Some(1), Some(5), 1.0);
        assert!(s < 1.0);
    }

    #[test]
    fn external_clock_drifts_back_to_one_otherwise() {
        let s = external_clock_speed_step(Some(5), Some(5), 0.95);
        assert!(s > 0.95 && s <= 1.0);
    }
}
