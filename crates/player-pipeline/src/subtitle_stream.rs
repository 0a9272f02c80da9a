// crates/player-pipeline/src/subtitle_stream.rs
//
// SubtitleStream: decode thread (spec §4.5's shared decode loop, fed
// through one of the two handlers from subtitle.rs) plus the optional
// pre-rendered overlay queue (§4.8) the video pipeline pairs with each
// displayed video frame.

use crate::host::{HostCallback, StreamKind, ThreadScope};
use crate::packet_queue::PacketQueue;
use crate::stream::{decode_loop_step, DecodeDriver, DecodeState, ReceiveOutcome};
use crate::subtitle::{BlendOutcome, DecodedSubtitle, GraphicsRect, SubtitleHandler};
use ffmpeg_the_third as ffmpeg;
use player_core::{FrameRing, Serial};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// One pre-rendered subtitle overlay, pts-stamped like a video frame.
pub struct SubtitleOverlay {
    pub pts: f64,
    pub width: i32,
    pub height: i32,
    pub stride: usize,
    pub buffer: Vec<u8>,
}

pub struct SubtitleStream {
    queue: Arc<PacketQueue>,
    handler: Arc<Mutex<Box<dyn SubtitleHandler>>>,
    overlay_queue: Mutex<Option<FrameRing<SubtitleOverlay>>>,
    native_size: (i32, i32),
    frame_size: Mutex<(i32, i32)>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl SubtitleStream {
    pub fn new(handler: Box<dyn SubtitleHandler>, native_w: i32, native_h: i32) -> Self {
        Self {
            queue: Arc::new(PacketQueue::new(25, 1.0)),
            handler: Arc::new(Mutex::new(handler)),
            overlay_queue: Mutex::new(None),
            native_size: (native_w.max(1), native_h.max(1)),
            frame_size: Mutex::new((native_w.max(1), native_h.max(1))),
            decode_thread: Mutex::new(None),
        }
    }

    pub fn packet_queue(&self) -> &PacketQueue {
        &self.queue
    }

    /// Clamps to the codec's native resolution (spec §4.8).
    pub fn set_frame_size(&self, w: i32, h: i32) {
        let (nw, nh) = self.native_size;
        *self.frame_size.lock().unwrap() = (w.clamp(1, nw), h.clamp(1, nh));
    }

    /// Allocates a fresh 4-slot overlay ring at the current frame size and
    /// invalidates whatever the handler holds, so the next `prepare_subtitle_frame`
    /// call re-renders from scratch.
    pub fn ensure_queue(&self) {
        *self.overlay_queue.lock().unwrap() = Some(FrameRing::new(4, false));
        self.handler.lock().unwrap().invalidate();
    }

    /// Blends the active subtitle at `pts` onto a fresh buffer and enqueues
    /// it if the handler reports a change.
    pub fn prepare_subtitle_frame(&self, pts: f64, serial: Serial, force_invalidate: bool) {
        let (w, h) = *self.frame_size.lock().unwrap();
        if w <= 0 || h <= 0 {
            return;
        }
        let stride = w as usize * 4;
        let mut buffer = vec![0u8; stride * h as usize];
        let outcome = self
            .handler
            .lock()
            .unwrap()
            .blend_to_frame(pts, &mut buffer, stride, serial, force_invalidate);
        if outcome == BlendOutcome::Changed {
            if let Some(q) = self.overlay_queue.lock().unwrap().as_ref() {
                q.push(SubtitleOverlay { pts, width: w, height: h, stride, buffer });
            }
        }
    }

    /// Dequeues and returns the most recent overlay with `pts <= target_pts`,
    /// discarding any older ones found along the way (spec §4.8).
    pub fn get_pending_subtitle_frame(&self, target_pts: f64) -> Option<SubtitleOverlay> {
        let guard = self.overlay_queue.lock().unwrap();
        let ring = guard.as_ref()?;
        let mut result: Option<(f64, i32, i32, usize, Vec<u8>)> = None;
        loop {
            if ring.num_remaining() == 0 {
                break;
            }
            let head_pts = ring.with_first(|o| o.pts).unwrap();
            if head_pts > target_pts {
                break;
            }
            result = ring.with_first(|o| (o.pts, o.width, o.height, o.stride, o.buffer.clone()));
            ring.push_next();
        }
        result.map(|(pts, width, height, stride, buffer)| SubtitleOverlay { pts, width, height, stride, buffer })
    }

    pub fn has_pending(&self) -> bool {
        self.handler.lock().unwrap().has_pending()
    }

    pub fn set_default_font(&self, path: Option<&std::path::Path>, family: Option<&str>) {
        self.handler.lock().unwrap().set_default_font(path, family);
    }

    pub fn abort(&self) {
        self.queue.abort();
        if let Some(handle) = self.decode_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Spawns the decode thread wrapping `decoder` around the shared decode
    /// loop; `time_base` converts the codec's raw pts units to seconds.
    pub fn start_decoding(
        &self,
        decoder: ffmpeg::codec::decoder::subtitle::Subtitle,
        time_base: (i32, i32),
        host: Arc<dyn HostCallback>,
    ) {
        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Subtitle);
            let mut driver = SubtitleDecodeDriver { decoder, handler, time_base, next_serial: 0 };
            let mut state = DecodeState::new();
            let mut pending = None;
            while decode_loop_step(&queue, &mut driver, &mut state, &mut pending) {}
        });
        *self.decode_thread.lock().unwrap() = Some(handle);
    }
}

struct SubtitleDecodeDriver {
    decoder: ffmpeg::codec::decoder::subtitle::Subtitle,
    handler: Arc<Mutex<Box<dyn SubtitleHandler>>>,
    time_base: (i32, i32),
    next_serial: Serial,
}

impl DecodeDriver for SubtitleDecodeDriver {
    fn receive(&mut self) -> ReceiveOutcome {
        // The subtitle codec API has no separate receive step: `decode`
        // both submits the packet and yields the result in one call, so
        // every iteration falls through to dequeue-and-submit.
        ReceiveOutcome::Again
    }

    fn submit(&mut self, packet: &ffmpeg::Packet) -> bool {
        let mut sub = ffmpeg::codec::subtitle::Subtitle::new();
        match self.decoder.decode(packet, &mut sub) {
            Ok(true) => {
                let decoded = convert_subtitle(&sub, packet, self.time_base);
                self.handler.lock().unwrap().handle_decoded(decoded, self.next_serial);
            }
            Ok(false) => {}
            Err(e) => eprintln!("[subtitle] decode error: {e}"),
        }
        true
    }

    fn flush_codec_buffers(&mut self) {
        self.decoder.flush();
    }

    fn on_decode_flush_buffers(&mut self) {
        self.handler.lock().unwrap().flush();
    }
}

/// Converts a decoded `ffmpeg::codec::subtitle::Subtitle` into our owned
/// `DecodedSubtitle`, copying bitmap data out (the library's rect list is
/// only valid for the current call).
fn convert_subtitle(sub: &ffmpeg::codec::subtitle::Subtitle, packet: &ffmpeg::Packet, time_base: (i32, i32)) -> DecodedSubtitle {
    let (num, den) = time_base;
    let to_secs = |pts: i64| pts as f64 * num as f64 / den as f64;
    let pkt_pts = packet.pts().map(to_secs).unwrap_or(0.0);
    let start = pkt_pts + sub.start() as f64 / 1000.0;
    let end = pkt_pts + sub.end() as f64 / 1000.0;

    let mut graphics = Vec::new();
    let mut text_line: Option<Vec<u8>> = None;

    for rect in sub.rects() {
        match rect {
            ffmpeg::codec::subtitle::Rect::Bitmap(bitmap) => {
                graphics.push(GraphicsRect {
                    rect: player_core::Rect::from_pos_size(bitmap.x(), bitmap.y(), bitmap.width() as i32, bitmap.height() as i32),
                    stride: bitmap.width() as usize * 4,
                    rgba: expand_bitmap_to_rgba(&bitmap),
                });
            }
            ffmpeg::codec::subtitle::Rect::Text(text) => {
                text_line = Some(text.get().as_bytes().to_vec());
            }
            ffmpeg::codec::subtitle::Rect::Ass(ass) => {
                text_line = Some(ass.get().as_bytes().to_vec());
            }
            ffmpeg::codec::subtitle::Rect::None(_) => {}
        }
    }

    if let Some(event_line) = text_line {
        DecodedSubtitle::Text { event_line, codec_private: None }
    } else {
        DecodedSubtitle::Graphics { rects: graphics, start_pts: start, end_pts: end }
    }
}

/// Expands a palette-indexed bitmap rect to straight RGBA. Palette
/// expansion is the one piece of "subtitle-format parsing" spec.md keeps
/// in scope here since it is required to produce the RGBA buffer the
/// alpha blender (§4.10) operates on.
fn expand_bitmap_to_rgba(bitmap: &ffmpeg::codec::subtitle::Bitmap) -> Vec<u8> {
    let width = bitmap.width() as usize;
    let height = bitmap.height() as usize;
    let indices = bitmap.data(0);
    let index_stride = bitmap.stride(0);
    let palette = bitmap.data(1);

    let mut out = vec![0u8; width * height * 4];
    for y in 0..height {
        for x in 0..width {
            let idx = indices[y * index_stride + x] as usize;
            let p = idx * 4;
            let dst = (y * width + x) * 4;
            if p + 4 <= palette.len() {
                out[dst..dst + 4].copy_from_slice(&palette[p..p + 4]);
            }
        }
    }
    out
}
