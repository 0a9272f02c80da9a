// crates/player-pipeline/src/packet_queue.rs
//
// PacketQueue proper: player_core::SerialQueue instantiated over real
// ffmpeg packets, plus the isQueueFull/backpressure policy from the read
// loop. The flush sentinel is a `PacketQueueItem::Flush` enum variant
// rather than a pointer-identity packet — ffmpeg's `Packet` has no stable
// address to compare once moved into a queue slot, and an enum variant is
// the idiomatic way to carry "this slot is special" through an owned,
// moved value.

use ffmpeg_the_third as ffmpeg;
use player_core::{Dequeued, Serial, SerialQueue};

pub enum PacketQueueItem {
    Data(ffmpeg::Packet),
    Flush,
}

pub struct PacketQueue {
    inner: SerialQueue<PacketQueueItem>,
    packet_cap: usize,
    duration_cap: f64,
    /// An attached-picture stream (cover art) reports full forever once its
    /// one packet + EOF marker have been pushed.
    always_full: std::sync::atomic::AtomicBool,
}

pub enum Dequeue {
    Packet(ffmpeg::Packet, Serial),
    Flush(Serial),
    Empty,
    Exit,
}

impl PacketQueue {
    pub fn new(packet_cap: usize, duration_cap: f64) -> Self {
        Self {
            inner: SerialQueue::new(),
            packet_cap,
            duration_cap,
            always_full: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn begin(&self) {
        self.inner.begin(PacketQueueItem::Flush, 0);
    }

    pub fn enqueue_packet(&self, packet: ffmpeg::Packet, duration_secs: f64) -> bool {
        let byte_size = packet.size();
        let duration_units = (duration_secs * 1_000_000.0) as i64;
        self.inner
            .enqueue(PacketQueueItem::Data(packet), false, byte_size, duration_units)
    }

    pub fn flush_with_sentinel(&self) {
        self.inner.flush_with(PacketQueueItem::Flush, 0);
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn has_aborted(&self) -> bool {
        self.inner.has_aborted()
    }

    pub fn serial(&self) -> Serial {
        self.inner.serial()
    }

    pub fn dequeue(&self, block: bool) -> Dequeue {
        match self.inner.dequeue(block) {
            Dequeued::Item(PacketQueueItem::Data(p), s) => Dequeue::Packet(p, s),
            Dequeued::Item(PacketQueueItem::Flush, s) => Dequeue::Flush(s),
            Dequeued::Empty => Dequeue::Empty,
            Dequeued::Exit => Dequeue::Exit,
        }
    }

    pub fn mark_attached_picture_full(&self) {
        self.always_full.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    /// `packet count >= cap AND (duration == 0 OR queued duration > duration_cap)`.
    pub fn is_queue_full(&self) -> bool {
        if self.always_full.load(std::sync::atomic::Ordering::Relaxed) {
            return true;
        }
        let count = self.inner.num_packets();
        if count < self.packet_cap {
            return false;
        }
        let duration_secs = self.inner.duration() as f64 / 1_000_000.0;
        duration_secs == 0.0 || duration_secs > self.duration_cap
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.size_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_packet() -> ffmpeg::Packet {
        ffmpeg::Packet::copy(&[0u8; 4])
    }

    // S4: 12 packets of 1.1s each -> count below cap, not full. 26 packets
    // totaling 30s -> count and duration both over cap, full.
    #[test]
    fn s4_backpressure_thresholds() {
        let q = PacketQueue::new(25, 1.0);
        q.begin();
        for _ in 0..12 {
            q.enqueue_packet(dummy_packet(), 1.1);
        }
        assert!(!q.is_queue_full());

        let q2 = PacketQueue::new(25, 1.0);
        q2.begin();
        for _ in 0..26 {
            q2.enqueue_packet(dummy_packet(), 30.0 / 26.0);
        }
        assert!(q2.is_queue_full());
    }

    #[test]
    fn attached_picture_is_always_full() {
        let q = PacketQueue::new(25, 1.0);
        q.begin();
        q.mark_attached_picture_full();
        assert!(q.is_queue_full());
    }

    #[test]
    fn flush_with_sentinel_bumps_serial_and_clears_queue() {
        let q = PacketQueue::new(25, 1.0);
        q.begin();
        q.enqueue_packet(dummy_packet(), 0.04);
        q.flush_with_sentinel();
        assert_eq!(q.serial(), 2); // begin() = serial 1, flush_with = serial 2
        assert!(!q.is_empty()); // sentinel itself is queued
    }
}
