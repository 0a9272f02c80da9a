// crates/player-core/src/helpers/time.rs
//
// Shared time-formatting utility for progress reporting (onProgressChanged
// wants `currentMs`/`durationMs`, but logs and any host UI read seconds as
// MM:SS:FF for frame-accurate scrubbing).

/// Format a duration in seconds as `MM:SS:FF` (minutes, seconds, frames at 30 fps).
///
/// ```
/// use player_core::format_time;
/// assert_eq!(format_time(0.0),    "00:00:00");
/// assert_eq!(format_time(61.5),   "01:01:15");
/// assert_eq!(format_time(3599.0), "59:59:00");
/// ```
pub fn format_time(s: f64) -> String {
    let s = s.max(0.0);
    let m  = (s / 60.0) as u32;
    let sc = (s % 60.0) as u32;
    let fr = ((s * 30.0) as u32) % 30;
    format!("{m:02}:{sc:02}:{fr:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero() {
        assert_eq!(format_time(0.0), "00:00:00");
    }

    #[test]
    fn negative_clamped_to_zero() {
        assert_eq!(format_time(-5.0), "00:00:00");
    }

    #[test]
    fn minutes_and_frames() {
        assert_eq!(format_time(61.5), "01:01:15");
    }
}
