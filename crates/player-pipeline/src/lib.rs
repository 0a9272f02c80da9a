// crates/player-pipeline/src/lib.rs
//
// The ffmpeg-the-third-backed playback engine: packet/frame queues holding
// real decoder types, the three stream pipelines, the subtitle handlers and
// renderer, the YUV conversion glue, the sink/host trait boundaries, and
// `Player` itself. `player-core` supplies every pure data structure and
// algorithm this crate wires up against a real demuxer/decoder/scaler.

pub mod config;
pub mod packet_queue;
pub mod frame_data;
pub mod frame_pool;
pub mod clock_set;
pub mod stream;
pub mod video_stream;
pub mod audio_stream;
pub mod subtitle_stream;
pub mod subtitle;
pub mod ass_renderer;
pub mod yuv;
pub mod sinks;
pub mod host;
pub mod player;

pub use config::PlayerConfig;
pub use host::{HostCallback, ThreadScope};
pub use player::Player;
pub use sinks::{AudioSink, VideoSink};
