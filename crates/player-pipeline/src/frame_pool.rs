// crates/player-pipeline/src/frame_pool.rs
//
// AvFramePool: a fixed-size ring of pre-allocated buffers handed out
// round-robin, avoiding per-frame allocation on the video render path.
// Generalized slightly beyond RGBA frame buffers (spec.md's narrowest
// reading) to pool any fixed-size byte buffer, since the image subtitle
// handler's scaled-rect cache benefits from the same allocation-avoidance
// discipline.

use std::sync::Mutex;

struct State {
    buffers: Vec<Vec<u8>>,
    next: usize,
}

pub struct FramePool {
    state: Mutex<State>,
    buffer_size: usize,
}

impl FramePool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(State {
                buffers: (0..capacity).map(|_| vec![0u8; buffer_size]).collect(),
                next: 0,
            }),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().unwrap().buffers.len()
    }

    /// Returns the next slot index round-robin and a copy of that slot's
    /// current length (callers needing the bytes go through `with_slot_mut`
    /// — the index alone is what the decoded `Frame` carries across
    /// threads, since the pool itself is the shared owner of the storage).
    pub fn acquire(&self) -> usize {
        let mut s = self.state.lock().unwrap();
        let idx = s.next;
        s.next = (s.next + 1) % s.buffers.len();
        idx
    }

    pub fn with_slot_mut<R>(&self, slot: usize, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut s = self.state.lock().unwrap();
        f(&mut s.buffers[slot])
    }

    pub fn with_slot<R>(&self, slot: usize, f: impl FnOnce(&[u8]) -> R) -> R {
        let s = self.state.lock().unwrap();
        f(&s.buffers[slot])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_cycles_round_robin() {
        let pool = FramePool::new(3, 16);
        assert_eq!(pool.acquire(), 0);
        assert_eq!(pool.acquire(), 1);
        assert_eq!(pool.acquire(), 2);
        assert_eq!(pool.acquire(), 0);
    }

    #[test]
    fn slots_are_independently_writable() {
        let pool = FramePool::new(2, 4);
        pool.with_slot_mut(0, |buf| buf.copy_from_slice(&[1, 2, 3, 4]));
        pool.with_slot_mut(1, |buf| buf.copy_from_slice(&[5, 6, 7, 8]));
        assert_eq!(pool.with_slot(0, |b| b.to_vec()), vec![1, 2, 3, 4]);
        assert_eq!(pool.with_slot(1, |b| b.to_vec()), vec![5, 6, 7, 8]);
    }
}
