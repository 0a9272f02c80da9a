// crates/player-pipeline/src/clock_set.rs
//
// Master-clock selection across the three Clocks a Player owns (audio,
// video, external). Normally the audio clock; becomes the video clock in
// frame-step mode; becomes the external clock when no audio/video stream
// is available.

use player_core::Clock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MasterClockKind {
    Audio,
    Video,
    External,
}

pub struct ClockSet {
    pub audio: Mutex<Clock>,
    pub video: Mutex<Clock>,
    pub external: Mutex<Clock>,
    has_audio: bool,
    has_video: bool,
    /// Cached audio-sink output latency in seconds (spec §4.6/§4.7), stored
    /// as bits of an f64 so cross-thread reads stay lock-free like the
    /// clocks' own cross-stream reads (spec §5: "may observe a slightly
    /// stale value... sync thresholds absorb it"). Updated by the audio
    /// render thread via `LatencyTracker`, read by the video render thread
    /// when computing its sync diff against the audio master clock.
    audio_latency_bits: AtomicU64,
}

impl ClockSet {
    pub fn new(now: f64, has_audio: bool, has_video: bool) -> Self {
        Self {
            audio: Mutex::new(Clock::new(now)),
            video: Mutex::new(Clock::new(now)),
            external: Mutex::new(Clock::new(now)),
            has_audio,
            has_video,
            audio_latency_bits: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn set_audio_latency(&self, secs: f64) {
        self.audio_latency_bits.store(secs.to_bits(), Ordering::Relaxed);
    }

    pub fn audio_latency(&self) -> f64 {
        f64::from_bits(self.audio_latency_bits.load(Ordering::Relaxed))
    }

    /// Master pts as the video render thread should compare against:
    /// `master_pts − audio_latency` when audio is master (spec §4.6 step 2
    /// and the render-thread delay bullet), otherwise the plain master pts.
    pub fn master_pts_for_video_sync(&self, now: f64, frame_step_mode: bool) -> f64 {
        let pts = self.master_pts(now, frame_step_mode);
        if self.master_kind(frame_step_mode) == MasterClockKind::Audio {
            pts - self.audio_latency()
        } else {
            pts
        }
    }

    /// Which clock is master: audio when available, else video, else
    /// external; frame-step mode forces video regardless of audio
    /// availability (the stepping stream defines "now" while stepping).
    pub fn master_kind(&self, frame_step_mode: bool) -> MasterClockKind {
        if frame_step_mode && self.has_video {
            MasterClockKind::Video
        } else if self.has_audio {
            MasterClockKind::Audio
        } else if self.has_video {
            MasterClockKind::Video
        } else {
            MasterClockKind::External
        }
    }

    pub fn master_pts(&self, now: f64, frame_step_mode: bool) -> f64 {
        match self.master_kind(frame_step_mode) {
            MasterClockKind::Audio => {
                let c = self.audio.lock().unwrap();
                c.pts_at_checked(now, c.serial())
            }
            MasterClockKind::Video => {
                let c = self.video.lock().unwrap();
                c.pts_at_checked(now, c.serial())
            }
            MasterClockKind::External => {
                let c = self.external.lock().unwrap();
                c.pts_at_checked(now, c.serial())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_is_master_when_present() {
        let cs = ClockSet::new(0.0, true, true);
        assert_eq!(cs.master_kind(false), MasterClockKind::Audio);
    }

    #[test]
    fn video_is_master_during_frame_step() {
        let cs = ClockSet::new(0.0, true, true);
        assert_eq!(cs.master_kind(true), MasterClockKind::Video);
    }

    #[test]
    fn external_is_master_with_no_streams() {
        let cs = ClockSet::new(0.0, false, false);
        assert_eq!(cs.master_kind(false), MasterClockKind::External);
    }

    #[test]
    fn video_sync_pts_subtracts_audio_latency_when_audio_is_master() {
        let cs = ClockSet::new(1.0, true, true);
        cs.audio.lock().unwrap().set_pts(1.0, 0.0, 0);
        cs.set_audio_latency(0.05);
        assert!((cs.master_pts_for_video_sync(0.0, false) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn video_sync_pts_ignores_audio_latency_when_video_is_master() {
        let cs = ClockSet::new(1.0, false, true);
        cs.video.lock().unwrap().set_pts(1.0, 0.0, 0);
        cs.set_audio_latency(0.05);
        assert!((cs.master_pts_for_video_sync(0.0, false) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn video_is_master_with_no_audio() {
        let cs = ClockSet::new(0.0, false, true);
        assert_eq!(cs.master_kind(false), MasterClockKind::Video);
    }
}
