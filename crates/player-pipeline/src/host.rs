// crates/player-pipeline/src/host.rs
//
// The application-facing control surface: a callback interface the host
// implements, plus the per-thread attach/detach lifecycle every long-lived
// thread must observe around calls into it.

use crate::sinks::AudioSink;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

pub trait HostCallback: Send + Sync {
    fn on_error(&self, code: i32, tag: &str, msg: &str);
    fn on_metadata_ready(
        &self,
        container: &HashMap<String, String>,
        video: &[HashMap<String, String>],
        audio: &[HashMap<String, String>],
        subtitle: &[HashMap<String, String>],
    );
    fn on_stream_ready(&self);
    fn on_stream_finished(&self);
    fn on_progress_changed(&self, current_ms: i64, duration_ms: i64);
    fn on_playback_changed(&self, paused: bool);
    fn create_audio_renderer(&self, sample_rate: u32, channels: u16) -> Box<dyn AudioSink>;

    /// Called once on entry to a long-lived thread that will call back into
    /// this host (used by hosts that must attach the thread to a managed
    /// runtime, e.g. a JVM). The default no-op suits hosts with no such
    /// requirement.
    fn on_thread_start(&self, _kind: StreamKind) {}
    fn on_thread_end(&self, _kind: StreamKind) {}
}

/// Scoped acquisition of the "thread callable" capability with guaranteed
/// release on every exit path: construct once at the top of a thread's
/// entry point, and `on_thread_end` fires exactly once, however the thread
/// exits (return, early `?`, or panic-unwind).
pub struct ThreadScope<'a> {
    host: &'a dyn HostCallback,
    kind: StreamKind,
}

impl<'a> ThreadScope<'a> {
    pub fn enter(host: &'a dyn HostCallback, kind: StreamKind) -> Self {
        host.on_thread_start(kind);
        Self { host, kind }
    }
}

impl<'a> Drop for ThreadScope<'a> {
    fn drop(&mut self) {
        self.host.on_thread_end(self.kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHost {
        starts: AtomicU32,
        ends: AtomicU32,
    }

    impl HostCallback for CountingHost {
        fn on_error(&self, _code: i32, _tag: &str, _msg: &str) {}
        fn on_metadata_ready(
            &self,
            _c: &HashMap<String, String>,
            _v: &[HashMap<String, String>],
            _a: &[HashMap<String, String>],
            _s: &[HashMap<String, String>],
        ) {
        }
        fn on_stream_ready(&self) {}
        fn on_stream_finished(&self) {}
        fn on_progress_changed(&self, _current_ms: i64, _duration_ms: i64) {}
        fn on_playback_changed(&self, _paused: bool) {}
        fn create_audio_renderer(&self, _sample_rate: u32, _channels: u16) -> Box<dyn AudioSink> {
            unimplemented!()
        }
        fn on_thread_start(&self, _kind: StreamKind) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_thread_end(&self, _kind: StreamKind) {
            self.ends.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn scope_calls_start_once_and_end_once_on_drop() {
        let host = CountingHost {
            starts: AtomicU32::new(0),
            ends: AtomicU32::new(0),
        };
        {
            let _scope = ThreadScope::enter(&host, StreamKind::Video);
            assert_eq!(host.starts.load(Ordering::SeqCst), 1);
            assert_eq!(host.ends.load(Ordering::SeqCst), 0);
        }
        assert_eq!(host.ends.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scope_releases_on_early_return() {
        let host = CountingHost {
            starts: AtomicU32::new(0),
            ends: AtomicU32::new(0),
        };
        fn do_work(host: &CountingHost) {
            let _scope = ThreadScope::enter(host, StreamKind::Audio);
            if true {
                return;
            }
        }
        do_work(&host);
        assert_eq!(host.ends.load(Ordering::SeqCst), 1);
    }
}
