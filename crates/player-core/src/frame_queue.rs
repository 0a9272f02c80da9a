// crates/player-core/src/frame_queue.rs
//
// Generic keep-last frame ring: the data-structure half of FrameQueue, with
// the decoded-frame type erased to a generic `T`. Single producer (decode
// thread) calls `push`; single consumer (render thread) calls `push_next`.
//
// "Keep-last": the slot most recently handed to the consumer is not freed
// until a *second* `push_next`, so `peek_last` can still return it — used to
// redraw the previous frame on pause or surface re-creation without the
// producer having to special-case "nothing new yet".

use std::sync::{Condvar, Mutex};

struct State<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    size: usize,
    /// Latches to `true` the first time `push_next` is called on a
    /// keep-last ring, and never clears again — matches the original's
    /// `mReadIndexShown`, which is a one-shot latch, not a toggle.
    shown: bool,
    abort: bool,
}

/// A fixed-capacity ring of frame slots shared by one producer and one
/// consumer, with optional keep-last semantics.
pub struct FrameRing<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    keep_last: bool,
}

impl<T> FrameRing<T> {
    pub fn new(capacity: usize, keep_last: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                slots: (0..capacity).map(|_| None).collect(),
                read: 0,
                write: 0,
                size: 0,
                shown: false,
                abort: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            keep_last,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn abort(&self) {
        let mut s = self.state.lock().unwrap();
        s.abort = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn has_aborted(&self) -> bool {
        self.state.lock().unwrap().abort
    }

    /// Blocks until a slot is free, writes `item` into it, and advances the
    /// write index. Returns `false` (and drops `item`) if aborted first.
    pub fn push(&self, item: T) -> bool {
        let mut s = self.state.lock().unwrap();
        while s.size >= self.capacity && !s.abort {
            s = self.not_full.wait(s).unwrap();
        }
        if s.abort {
            return false;
        }
        let idx = s.write;
        s.slots[idx] = Some(item);
        s.write = (s.write + 1) % self.capacity;
        s.size += 1;
        self.not_empty.notify_one();
        true
    }

    /// Advances the read cursor. On a keep-last ring, the very first call
    /// only latches `shown` (the just-written frame becomes the "last"
    /// frame and stays peekable); every call after that frees the current
    /// read slot and advances, exactly like a non-keep-last ring.
    pub fn push_next(&self) {
        let mut s = self.state.lock().unwrap();
        if self.keep_last && !s.shown {
            s.shown = true;
            return;
        }
        let idx = s.read;
        s.slots[idx] = None;
        s.read = (s.read + 1) % self.capacity;
        s.size -= 1;
        self.not_full.notify_one();
    }

    /// `size - shown` — the number of frames available to a consumer that
    /// hasn't yet seen the "keep-last" slot as current.
    pub fn num_remaining(&self) -> usize {
        let s = self.state.lock().unwrap();
        s.size.saturating_sub(s.shown as usize)
    }

    pub fn is_read_index_shown(&self) -> bool {
        self.state.lock().unwrap().shown
    }

    /// Blocks until there is a readable frame (`num_remaining() > 0`) or
    /// abort. Returns `false` on abort.
    pub fn wait_readable(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        while s.size.saturating_sub(s.shown as usize) == 0 && !s.abort {
            s = self.not_empty.wait(s).unwrap();
        }
        !s.abort
    }

    /// Blocks until there is a free slot to write into, or abort. Returns
    /// `false` on abort; callers that only need to know "can I write" (vs.
    /// actually writing via `push`) use this together with external
    /// construction of the frame.
    pub fn wait_writable(&self) -> bool {
        let mut s = self.state.lock().unwrap();
        while s.size >= self.capacity && !s.abort {
            s = self.not_full.wait(s).unwrap();
        }
        !s.abort
    }

    pub fn with_first<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let s = self.state.lock().unwrap();
        let idx = (s.read + s.shown as usize) % self.capacity;
        s.slots[idx].as_ref().map(f)
    }

    pub fn with_next<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let s = self.state.lock().unwrap();
        let idx = (s.read + s.shown as usize + 1) % self.capacity;
        s.slots[idx].as_ref().map(f)
    }

    pub fn with_last<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let s = self.state.lock().unwrap();
        s.slots[s.read].as_ref().map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct TestFrame {
        pts: f64,
    }

    #[test]
    fn size_stays_within_capacity_for_any_interleaving() {
        let ring: FrameRing<TestFrame> = FrameRing::new(3, false);
        assert!(ring.push(TestFrame { pts: 0.0 }));
        assert!(ring.push(TestFrame { pts: 1.0 }));
        assert!(ring.push(TestFrame { pts: 2.0 }));
        assert_eq!(ring.num_remaining(), 3);

        ring.push_next();
        assert_eq!(ring.num_remaining(), 2);
        ring.push_next();
        assert_eq!(ring.num_remaining(), 1);

        assert!(ring.push(TestFrame { pts: 3.0 }));
        assert_eq!(ring.num_remaining(), 2);
    }

    #[test]
    fn consumer_observes_enqueue_order() {
        let ring: FrameRing<TestFrame> = FrameRing::new(4, false);
        for i in 0..4 {
            ring.push(TestFrame { pts: i as f64 });
        }
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(ring.with_first(|f| f.pts).unwrap());
            ring.push_next();
        }
        assert_eq!(seen, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn keep_last_one_push_one_next_leaves_last_peekable() {
        let ring: FrameRing<TestFrame> = FrameRing::new(3, true);
        ring.push(TestFrame { pts: 0.04 });
        ring.push_next();
        assert_eq!(ring.num_remaining(), 0);
        assert_eq!(ring.with_last(|f| f.pts), Some(0.04));
    }

    // S2: push 3 frames, pushNext twice.
    #[test]
    fn keep_last_scenario_s2() {
        let ring: FrameRing<TestFrame> = FrameRing::new(3, true);
        ring.push(TestFrame { pts: 0.04 });
        ring.push(TestFrame { pts: 0.08 });
        ring.push(TestFrame { pts: 0.12 });

        ring.push_next();
        ring.push_next();

        assert_eq!(ring.with_last(|f| f.pts), Some(0.08));
        assert_eq!(ring.with_first(|f| f.pts), Some(0.12));
        assert_eq!(ring.num_remaining(), 1);
    }

    #[test]
    fn abort_wakes_waiters() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let ring: Arc<FrameRing<TestFrame>> = Arc::new(FrameRing::new(1, false));
        let ring2 = Arc::clone(&ring);
        let handle = thread::spawn(move || ring2.wait_readable());

        thread::sleep(Duration::from_millis(20));
        ring.abort();
        assert!(!handle.join().unwrap());
    }
}
