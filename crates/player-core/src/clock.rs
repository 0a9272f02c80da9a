// crates/player-core/src/clock.rs
//
// Presentation-timestamp tracker with adjustable speed and a pause flag.
// One Clock per audio/video stream, plus one external Clock owned by the
// Player. Wall-time source is injected via the `Clock::new_at` / explicit
// `now` parameters so tests don't depend on a real monotonic clock.

/// No A/V correction is applied if the two clocks disagree by more than this
/// (a genuine discontinuity, not drift worth smoothing).
use crate::serial_queue::Serial;

pub const NO_SYNC_THRESHOLD_SECS: f64 = 10.0;

/// A monotonic presentation-timestamp tracker.
///
/// `serial` is compared against the owning stream's packet-queue serial on
/// every read; a mismatch means the clock is stale across a seek and
/// `pts_at` returns NaN rather than a misleading value.
pub struct Clock {
    base_pts: f64,
    /// `base_pts - wall_time_at_base`, or NaN if `base_pts` is NaN.
    drift: f64,
    last_updated: f64,
    pub speed: f64,
    pub paused: bool,
    serial: Serial,
}

impl Clock {
    /// A fresh clock with an unknown (NaN) pts, as if just constructed.
    ///
    /// `now` is the wall-clock reading (seconds) at construction time.
    pub fn new(now: f64) -> Self {
        let mut c = Self {
            base_pts: f64::NAN,
            drift: f64::NAN,
            last_updated: now,
            speed: 1.0,
            paused: false,
            serial: 0,
        };
        c.set_time_at(f64::NAN, now, 0);
        c
    }

    pub fn serial(&self) -> Serial {
        self.serial
    }

    /// Rebase to `pts` as observed at wall-time `now`.
    pub fn set_pts(&mut self, pts: f64, now: f64, serial: Serial) {
        self.set_time_at(pts, now, serial);
    }

    /// Rebase to `pts` as observed at wall-time `time`, optionally moving to
    /// a new serial epoch. `serial == 0` means "keep current epoch" — the
    /// original source reserves 0 for "don't touch mSerial" at construction.
    pub fn set_time_at(&mut self, pts: f64, time: f64, serial: Serial) {
        self.base_pts = pts;
        self.drift = if pts.is_nan() { f64::NAN } else { pts - time };
        self.last_updated = time;
        if serial != 0 {
            self.serial = serial;
        }
    }

    /// Snapshot the current pts, then change the playback speed.
    ///
    /// Must snapshot first: the drift term bakes in the *old* speed, so
    /// changing speed without rebasing would retroactively apply the new
    /// speed to time that already elapsed under the old one.
    pub fn set_speed(&mut self, speed: f64, now: f64) {
        self.update_pts(now);
        self.speed = speed;
    }

    /// Adopt `other`'s pts if this clock's pts is NaN or the two differ by
    /// more than [`NO_SYNC_THRESHOLD_SECS`].
    pub fn sync_to_clock(&mut self, other: &Clock, now: f64) {
        let pts = self.pts_at(now);
        let their_pts = other.pts_at(now);
        if !their_pts.is_nan() && (pts.is_nan() || (pts - their_pts).abs() > NO_SYNC_THRESHOLD_SECS)
        {
            self.set_pts(their_pts, now, other.serial);
        }
    }

    /// Rebase to the currently-computed pts, collapsing drift/speed history
    /// into a fresh base. Used before `set_speed` and by the caller-facing
    /// `update_pts` that mirrors the original's no-arg `updatePts()`.
    pub fn update_pts(&mut self, now: f64) {
        let pts = self.pts_at(now);
        self.set_pts(pts, now, 0);
    }

    pub fn time_since_last_update(&self, now: f64) -> f64 {
        now - self.last_updated
    }

    /// Current presentation timestamp in seconds, or NaN if `current_queue_serial`
    /// differs from the epoch this clock was last set under (a post-seek stale
    /// read) or if no pts has ever been set.
    pub fn pts_at_checked(&self, now: f64, current_queue_serial: Serial) -> f64 {
        if current_queue_serial != self.serial {
            return f64::NAN;
        }
        self.pts_at(now)
    }

    /// Current pts ignoring serial staleness (internal use / single-clock tests).
    fn pts_at(&self, now: f64) -> f64 {
        if self.paused {
            self.base_pts
        } else {
            self.drift + now - (now - self.last_updated) * (1.0 - self.speed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_clock_pts_is_nan() {
        let c = Clock::new(0.0);
        assert!(c.pts_at_checked(0.0, 0).is_nan());
    }

    #[test]
    fn stale_serial_returns_nan() {
        let mut c = Clock::new(0.0);
        c.set_pts(1.0, 0.0, 5);
        assert!(c.pts_at_checked(0.0, 6).is_nan());
    }

    #[test]
    fn matching_serial_unpaused_tracks_wall_time() {
        let mut c = Clock::new(0.0);
        c.set_pts(1.0, 0.0, 5);
        let got = c.pts_at_checked(2.0, 5);
        assert!((got - 3.0).abs() < 1e-9, "expected ~3.0, got {got}");
    }

    #[test]
    fn paused_clock_freezes_at_base_pts() {
        let mut c = Clock::new(0.0);
        c.set_pts(1.0, 0.0, 5);
        c.paused = true;
        let got = c.pts_at_checked(10.0, 5);
        assert_eq!(got, 1.0);
    }

    #[test]
    fn speed_change_is_applied_only_after_rebase() {
        let mut c = Clock::new(0.0);
        c.set_pts(0.0, 0.0, 1);
        // run 1 second at normal speed, then double speed for another second
        c.set_speed(2.0, 1.0);
        let got = c.pts_at_checked(2.0, 1);
        // 1s at speed 1 + 1s at speed 2 == 3s of pts advance
        assert!((got - 3.0).abs() < 1e-9, "expected ~3.0, got {got}");
    }

    #[test]
    fn sync_to_clock_adopts_other_when_self_is_nan() {
        let mut a = Clock::new(0.0);
        let mut b = Clock::new(0.0);
        b.set_pts(5.0, 0.0, 2);
        a.sync_to_clock(&b, 0.0);
        assert!((a.pts_at_checked(0.0, 2) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn sync_to_clock_ignores_small_drift() {
        let mut a = Clock::new(0.0);
        let mut b = Clock::new(0.0);
        a.set_pts(10.0, 0.0, 1);
        b.set_pts(10.5, 0.0, 1);
        a.sync_to_clock(&b, 0.0);
        // difference under threshold: a keeps its own pts/serial
        assert!((a.pts_at_checked(0.0, 1) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn sync_to_clock_corrects_large_drift() {
        let mut a = Clock::new(0.0);
        let mut b = Clock::new(0.0);
        a.set_pts(10.0, 0.0, 1);
        b.set_pts(25.0, 0.0, 2);
        a.sync_to_clock(&b, 0.0);
        assert!((a.pts_at_checked(0.0, 2) - 25.0).abs() < 1e-9);
    }
}
