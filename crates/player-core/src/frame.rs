// crates/player-core/src/frame.rs
//
// The common attributes every decoded frame carries, regardless of which
// stream produced it — generic over the actual payload so this crate never
// needs to know about ffmpeg's frame types. `player-pipeline` instantiates
// `Frame<FrameData>` where `FrameData` is the tagged union of {audio-sample
// frame, video-image frame, subtitle bitmap set}.

use crate::serial_queue::Serial;

/// Which stream a frame belongs to. Kept separate from the payload type so
/// code that only cares "is this a video frame" doesn't need to match on
/// the (potentially large, ffmpeg-typed) payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    Video,
    Audio,
    Subtitle,
}

/// A decoded frame: presentation timestamp, duration, source-packet serial
/// and geometry, plus a `payload` whose shape depends on `kind`.
///
/// Invariant: `serial` equals the packet-queue serial in
/// effect when the source packet was dequeued. Consumers must discard any
/// frame whose `serial` differs from the packet queue's *current* serial —
/// this is how post-seek stale frames are skipped without per-frame
/// invalidation beyond this one integer.
#[derive(Clone, Debug)]
pub struct Frame<T> {
    pub kind: FrameKind,
    pub payload: T,
    /// Presentation timestamp in seconds; NaN if unknown.
    pub pts: f64,
    /// Duration in seconds.
    pub duration: f64,
    pub serial: Serial,
    pub width: i32,
    pub height: i32,
    /// Pixel format as an opaque codec-library enum value; unused for audio.
    pub format: i32,
    pub sample_aspect_ratio: (i32, i32),
}

impl<T> Frame<T> {
    pub fn new(kind: FrameKind, payload: T, pts: f64, duration: f64, serial: Serial) -> Self {
        Self {
            kind,
            payload,
            pts,
            duration,
            serial,
            width: 0,
            height: 0,
            format: 0,
            sample_aspect_ratio: (1, 1),
        }
    }

    /// True if this frame's serial no longer matches `current_serial` — the
    /// discard test every consumer must apply after dequeuing.
    pub fn is_stale(&self, current_serial: Serial) -> bool {
        self.serial != current_serial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_when_serial_mismatches_current_queue_serial() {
        let f = Frame::new(FrameKind::Video, (), 1.0, 0.04, 3);
        assert!(!f.is_stale(3));
        assert!(f.is_stale(4));
    }
}
