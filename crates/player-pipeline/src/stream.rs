// crates/player-pipeline/src/stream.rs
//
// StreamComponent / AVComponentStream base logic: the decode loop shared by
// all three streams, and the pause/abort/clock plumbing common to the two
// that render (video, audio). The codec types differ per stream
// (`decoder::Video`, `decoder::Audio`, `decoder::Subtitle` are unrelated
// ffmpeg-the-third types), so instead of one generic base struct this
// module is a shared *function* over a small `DecodeDriver` trait each
// concrete stream implements — the decode loop's control flow lives once,
// here, and the codec-specific submit/receive calls live with each stream.

use crate::packet_queue::{Dequeue, PacketQueue};
use player_core::Serial;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Condvar;

/// Outcome of polling the codec's receive loop for one decoded unit.
pub enum ReceiveOutcome {
    /// A frame/subtitle was decoded and handed to the driver's own queue.
    Decoded,
    /// The codec has nothing more to offer right now; fetch another packet.
    Again,
    /// The codec reported EOF for this epoch.
    Eof,
}

pub trait DecodeDriver {
    /// Drains everything the codec is currently willing to emit. Called
    /// once per decode-loop iteration before a new packet is fetched.
    fn receive(&mut self) -> ReceiveOutcome;
    /// Submits a packet; returns `true` if accepted, `false` if the codec
    /// said "again" (caller re-submits the same packet next iteration).
    fn submit(&mut self, packet: &ffmpeg_the_third::Packet) -> bool;
    fn flush_codec_buffers(&mut self);
    /// Stream-specific cleanup hook run when a flush sentinel is dequeued
    /// (`onDecodeFlushBuffers`) — e.g. resetting the audio next-pts
    /// tracker, or invalidating a subtitle handler's pending image.
    fn on_decode_flush_buffers(&mut self) {}
}

/// Shared decode-thread state: last-processed serial and the finished flag
/// (`finished = last_processed_serial == queue.serial() && no frames
/// pending downstream` — the second half is the driver's to report via
/// `has_pending_output`).
pub struct DecodeState {
    pub last_serial: Serial,
    pub finished: AtomicBool,
}

impl DecodeState {
    pub fn new() -> Self {
        Self {
            last_serial: 0,
            finished: AtomicBool::new(false),
        }
    }
}

impl Default for DecodeState {
    fn default() -> Self {
        Self::new()
    }
}

/// One iteration of the shared decode loop (spec §4.5). Returns `false`
/// when the queue has been aborted and the decode thread should exit.
pub fn decode_loop_step<D: DecodeDriver>(
    queue: &PacketQueue,
    driver: &mut D,
    state: &mut DecodeState,
    pending: &mut Option<ffmpeg_the_third::Packet>,
) -> bool {
    if state.last_serial == queue.serial() {
        match driver.receive() {
            ReceiveOutcome::Eof => {
                state.finished.store(true, Ordering::Relaxed);
                driver.flush_codec_buffers();
                return true;
            }
            ReceiveOutcome::Decoded => return true,
            ReceiveOutcome::Again => {}
        }
    }

    let packet = if let Some(p) = pending.take() {
        p
    } else {
        match queue.dequeue(true) {
            Dequeue::Packet(p, serial) => {
                state.last_serial = serial;
                p
            }
            Dequeue::Flush(serial) => {
                state.last_serial = serial;
                driver.flush_codec_buffers();
                state.finished.store(false, Ordering::Relaxed);
                driver.on_decode_flush_buffers();
                return true;
            }
            Dequeue::Empty => return true,
            Dequeue::Exit => return false,
        }
    };

    if !driver.submit(&packet) {
        *pending = Some(packet);
    }
    true
}

/// Pause-wait condvar shared by every stream's render thread.
#[derive(Default)]
pub struct PauseGate {
    mutex: std::sync::Mutex<bool>,
    condvar: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_paused(&self, paused: bool) {
        *self.mutex.lock().unwrap() = paused;
        if !paused {
            self.condvar.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.mutex.lock().unwrap()
    }

    /// Blocks while paused and `frame_step` is false, waking on unpause.
    pub fn wait_unless_stepping(&self, frame_step: &AtomicBool) {
        let mut paused = self.mutex.lock().unwrap();
        while *paused && !frame_step.load(Ordering::Relaxed) {
            paused = self.condvar.wait(paused).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingDriver {
        receive_calls: u32,
        submit_calls: u32,
        flush_calls: u32,
    }

    impl DecodeDriver for CountingDriver {
        fn receive(&mut self) -> ReceiveOutcome {
            self.receive_calls += 1;
            ReceiveOutcome::Again
        }
        fn submit(&mut self, _packet: &ffmpeg_the_third::Packet) -> bool {
            self.submit_calls += 1;
            true
        }
        fn flush_codec_buffers(&mut self) {
            self.flush_calls += 1;
        }
    }

    #[test]
    fn exit_propagates_when_queue_aborted() {
        let q = PacketQueue::new(25, 1.0);
        q.begin();
        q.abort();
        let mut driver = CountingDriver {
            receive_calls: 0,
            submit_calls: 0,
            flush_calls: 0,
        };
        let mut state = DecodeState::new();
        let mut pending = None;
        assert!(!decode_loop_step(&q, &mut driver, &mut state, &mut pending));
    }

    #[test]
    fn flush_sentinel_resets_finished_and_calls_hook() {
        let q = PacketQueue::new(25, 1.0);
        q.begin();
        q.flush_with_sentinel();
        let mut driver = CountingDriver {
            receive_calls: 0,
            submit_calls: 0,
            flush_calls: 0,
        };
        let mut state = DecodeState::new();
        state.finished.store(true, Ordering::Relaxed);
        let mut pending = None;
        assert!(decode_loop_step(&q, &mut driver, &mut state, &mut pending));
        assert!(!state.finished.load(Ordering::Relaxed));
        assert_eq!(driver.flush_calls, 1);
    }

    #[test]
    fn pause_gate_blocks_until_unpaused() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let gate = Arc::new(PauseGate::new());
        gate.set_paused(true);
        let g2 = Arc::clone(&gate);
        let step = Arc::new(AtomicBool::new(false));
        let step2 = Arc::clone(&step);
        let handle = thread::spawn(move || g2.wait_unless_stepping(&step2));

        thread::sleep(Duration::from_millis(20));
        gate.set_paused(false);
        handle.join().unwrap();
    }
}
