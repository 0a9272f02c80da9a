// crates/player-core/src/serial_queue.rs
//
// Generic serial-epoch FIFO: the data-structure half of PacketQueue, with
// the codec-library packet type erased to a generic `T`. Every item carries
// the serial in effect when it was enqueued; a "flush" enqueue is the only
// writer to the serial counter and bumps it before stamping its own node.
// Consumers compare a dequeued item's serial against the queue's *current*
// serial to discover stale (pre-seek) items without per-item tagging beyond
// this one integer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// A monotonic epoch counter, incremented once per flush (i.e. per seek).
pub type Serial = i64;

struct Node<T> {
    item: T,
    serial: Serial,
    byte_size: usize,
    duration: i64,
}

struct State<T> {
    nodes: VecDeque<Node<T>>,
    size_bytes: usize,
    duration: i64,
    serial: Serial,
    abort: bool,
}

/// Result of a [`SerialQueue::dequeue`] call.
pub enum Dequeued<T> {
    /// An item, tagged with the serial that was in effect when it was
    /// enqueued.
    Item(T, Serial),
    /// `block` was false and the queue was empty.
    Empty,
    /// The queue has been aborted; callers should stop reading.
    Exit,
}

/// A bounded-by-convention (the caller enforces backpressure), abortable FIFO
/// with a serial epoch. One producer, one consumer per queue instance.
pub struct SerialQueue<T> {
    state: Mutex<State<T>>,
    condvar: Condvar,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SerialQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                nodes: VecDeque::new(),
                size_bytes: 0,
                duration: 0,
                serial: 0,
                abort: true,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Clears the abort flag and resets the serial epoch to zero, then
    /// enqueues `first` as a flush node (serial becomes 1). Mirrors the
    /// original's `begin()`, called once when a stream starts decoding.
    pub fn begin(&self, first: T, byte_size: usize) {
        let mut s = self.state.lock().unwrap();
        s.abort = false;
        s.serial = 0;
        Self::enqueue_locked(&mut s, first, true, byte_size, 0);
        self.condvar.notify_one();
    }

    /// Appends `item`. If `is_flush`, the serial is incremented before this
    /// node is stamped — this is the only place the serial changes.
    pub fn enqueue(&self, item: T, is_flush: bool, byte_size: usize, duration: i64) -> bool {
        let mut s = self.state.lock().unwrap();
        if s.abort {
            return false;
        }
        Self::enqueue_locked(&mut s, item, is_flush, byte_size, duration);
        self.condvar.notify_one();
        true
    }

    fn enqueue_locked(s: &mut State<T>, item: T, is_flush: bool, byte_size: usize, duration: i64) {
        if is_flush {
            s.serial += 1;
        }
        s.nodes.push_back(Node {
            item,
            serial: s.serial,
            byte_size,
            duration,
        });
        s.size_bytes += byte_size;
        s.duration += duration;
    }

    /// Pops the head item. If `block` and the queue is empty, waits until an
    /// item arrives or the queue is aborted.
    pub fn dequeue(&self, block: bool) -> Dequeued<T> {
        let mut s = self.state.lock().unwrap();
        loop {
            if s.abort {
                return Dequeued::Exit;
            }
            if let Some(node) = s.nodes.pop_front() {
                s.size_bytes -= node.byte_size;
                s.duration -= node.duration;
                return Dequeued::Item(node.item, node.serial);
            }
            if !block {
                return Dequeued::Empty;
            }
            s = self.condvar.wait(s).unwrap();
        }
    }

    /// Drops all queued nodes. Counters reset; the serial is untouched —
    /// flush alone is non-seeking. Use [`Self::flush_with`] at a seek.
    pub fn flush(&self) {
        let mut s = self.state.lock().unwrap();
        s.nodes.clear();
        s.size_bytes = 0;
        s.duration = 0;
    }

    /// `flush()` followed by enqueueing `sentinel` as a flush node — the
    /// discipline used at every seek.
    pub fn flush_with(&self, sentinel: T, byte_size: usize) {
        self.flush();
        self.enqueue(sentinel, true, byte_size, 0);
    }

    pub fn abort(&self) {
        let mut s = self.state.lock().unwrap();
        s.abort = true;
        self.condvar.notify_all();
    }

    pub fn has_aborted(&self) -> bool {
        self.state.lock().unwrap().abort
    }

    pub fn serial(&self) -> Serial {
        self.state.lock().unwrap().serial
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().unwrap().size_bytes
    }

    pub fn num_packets(&self) -> usize {
        self.state.lock().unwrap().nodes.len()
    }

    pub fn duration(&self) -> i64 {
        self.state.lock().unwrap().duration
    }

    pub fn is_empty(&self) -> bool {
        self.num_packets() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh<T>() -> SerialQueue<T> {
        let q = SerialQueue::new();
        q.state.lock().unwrap().abort = false;
        q
    }

    #[test]
    fn serial_epoch_increments_exactly_once_per_flush() {
        let q: SerialQueue<i32> = fresh();
        for v in 0..5 {
            q.enqueue(v, false, 10, 0);
        }
        assert_eq!(q.serial(), 0);
        q.flush_with(-1, 0);
        assert_eq!(q.serial(), 1);

        for v in 10..13 {
            q.enqueue(v, false, 10, 0);
        }
        assert_eq!(q.serial(), 1);

        // Drain: every item up to and including the sentinel is serial 0,
        // everything after is serial 1.
        let mut serials = Vec::new();
        while let Dequeued::Item(_, s) = q.dequeue(false) {
            serials.push(s);
        }
        assert_eq!(serials, vec![0, 0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn dequeue_on_empty_nonblocking_returns_empty() {
        let q: SerialQueue<i32> = fresh();
        assert!(matches!(q.dequeue(false), Dequeued::Empty));
    }

    #[test]
    fn abort_wakes_blocked_dequeue_with_exit() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let q: Arc<SerialQueue<i32>> = Arc::new(fresh());
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || matches!(q2.dequeue(true), Dequeued::Exit));

        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn size_and_duration_track_contents() {
        let q: SerialQueue<i32> = fresh();
        q.enqueue(1, false, 100, 40);
        q.enqueue(2, false, 50, 10);
        assert_eq!(q.size_bytes(), 150);
        assert_eq!(q.duration(), 50);
        assert_eq!(q.num_packets(), 2);

        q.dequeue(false);
        assert_eq!(q.size_bytes(), 50);
        assert_eq!(q.duration(), 10);
        assert_eq!(q.num_packets(), 1);
    }

    #[test]
    fn enqueue_after_abort_is_rejected() {
        let q: SerialQueue<i32> = fresh();
        q.abort();
        assert!(!q.enqueue(1, false, 0, 0));
    }
}
