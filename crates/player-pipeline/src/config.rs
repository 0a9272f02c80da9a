// crates/player-pipeline/src/config.rs
//
// All configuration is via method calls on Player — no CLI, no config file
// (matching the teacher workspace, where clap lives only in the UI crate).

use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct PlayerConfig {
    pub url: PathBuf,
    pub subtitle_frame_size: Option<(i32, i32)>,
    pub default_subtitle_font_path: Option<PathBuf>,
    pub default_subtitle_font_family: Option<String>,
    /// Caps total enqueued packet bytes across streams before the read
    /// thread applies backpressure.
    pub queue_byte_cap: usize,
    /// Per-stream packet-count threshold for `is_queue_full`.
    pub queue_packet_cap: usize,
    /// Per-stream queued-duration threshold (seconds) for `is_queue_full`.
    pub queue_duration_cap: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            url: PathBuf::new(),
            subtitle_frame_size: None,
            default_subtitle_font_path: None,
            default_subtitle_font_family: None,
            queue_byte_cap: 15 * 1024 * 1024,
            queue_packet_cap: 25,
            queue_duration_cap: 1.0,
        }
    }
}

impl PlayerConfig {
    pub fn new(url: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}
