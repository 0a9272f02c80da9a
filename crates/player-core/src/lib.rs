// crates/player-core/src/lib.rs
//
// Pure, codec-library-free data structures and algorithms shared by the
// playback pipeline. No ffmpeg, no platform audio/video sink, no subtitle
// layout engine — just plain data and math that can be unit-tested without
// a decoder present.

pub mod ass_bitmap;
pub mod blend;
pub mod bitdepth;
pub mod clock;
pub mod frame;
pub mod serial_queue;
pub mod frame_queue;
pub mod sync;
mod helpers;

pub use clock::Clock;
pub use frame::{Frame, FrameKind};
pub use serial_queue::{Serial, SerialQueue};
pub use frame_queue::FrameRing;
pub use helpers::geometry::Rect;
pub use helpers::time::format_time;
