// crates/player-pipeline/src/frame_data.rs
//
// The tagged union a decoded Frame carries, instantiating
// `player_core::frame::Frame<FrameData>`. A Rust enum is the natural
// rendering of "one of {audio-sample frame, video-image frame, subtitle
// bitmap set}" — mirrors how `MediaResult` in the teacher crate is a plain
// enum of result kinds rather than a class hierarchy.

use ffmpeg_the_third as ffmpeg;
use player_core::ass_bitmap::BitmapSection;

pub type Frame = player_core::Frame<FrameData>;

pub enum FrameData {
    Video(VideoFrameData),
    Audio(ffmpeg::frame::Audio),
    Subtitle(Vec<BitmapSection>),
}

/// A decoded, converted video frame: an RGBA buffer on loan from the
/// `AvFramePool`, returned on drop via the pool handle the caller holds
/// separately (the frame itself only knows its pool slot index).
pub struct VideoFrameData {
    pub slot: usize,
    pub stride: usize,
}

impl Frame {
    pub fn video(slot: usize, stride: usize, pts: f64, duration: f64, serial: player_core::Serial) -> Self {
        player_core::Frame::new(
            player_core::FrameKind::Video,
            FrameData::Video(VideoFrameData { slot, stride }),
            pts,
            duration,
            serial,
        )
    }

    pub fn audio(audio: ffmpeg::frame::Audio, pts: f64, duration: f64, serial: player_core::Serial) -> Self {
        player_core::Frame::new(player_core::FrameKind::Audio, FrameData::Audio(audio), pts, duration, serial)
    }

    pub fn subtitle(sections: Vec<BitmapSection>, pts: f64, duration: f64, serial: player_core::Serial) -> Self {
        player_core::Frame::new(
            player_core::FrameKind::Subtitle,
            FrameData::Subtitle(sections),
            pts,
            duration,
            serial,
        )
    }
}
