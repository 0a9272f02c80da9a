// crates/player-pipeline/src/video_stream.rs
//
// VideoStream: decode → optional 16→8 reduce → YUV→RGBA → optional
// subtitle composite → enqueue (spec §4.6 step 1-4), plus the render
// thread that drains the frame queue with clock-driven timing (spec §4.6
// render-thread bullets). Grounded in the teacher's `LiveDecoder`'s
// decode-then-scale shape, generalized from one-shot/sequential decode
// into the continuous, clock-synchronized pipeline spec.md calls for.

use crate::clock_set::{ClockSet, MasterClockKind};
use crate::frame_data::{Frame, FrameData};
use crate::frame_pool::FramePool;
use crate::host::{HostCallback, StreamKind, ThreadScope};
use crate::packet_queue::PacketQueue;
use crate::sinks::{lock_buffer, VideoSink};
use crate::stream::{decode_loop_step, DecodeDriver, DecodeState, PauseGate, ReceiveOutcome};
use crate::subtitle_stream::SubtitleStream;
use crate::yuv::{reduce_plane_to_8bit, YuvConverter};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use player_core::bitdepth::BitDepth;
use player_core::sync::{clamp_frame_duration, max_frame_duration, video_frame_delay, DelayDecision};
use player_core::{FrameRing, Serial};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const RENDER_TICK: Duration = Duration::from_millis(10);

pub struct VideoStream {
    queue: Arc<PacketQueue>,
    frames: Arc<FrameRing<Frame>>,
    pool: Arc<FramePool>,
    clock_set: Arc<ClockSet>,
    pause_gate: Arc<PauseGate>,
    paused: Arc<AtomicBool>,
    frame_step: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    epoch: Instant,
    may_have_discontinuities: bool,
    avg_frame_duration: f64,
    width: u32,
    height: u32,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    render_thread: Mutex<Option<JoinHandle<()>>>,
}

impl VideoStream {
    pub fn new(
        clock_set: Arc<ClockSet>,
        epoch: Instant,
        width: u32,
        height: u32,
        avg_frame_rate: f64,
        may_have_discontinuities: bool,
    ) -> Self {
        Self {
            queue: Arc::new(PacketQueue::new(25, 1.0)),
            frames: Arc::new(FrameRing::new(3, true)),
            pool: Arc::new(FramePool::new(4, width as usize * height as usize * 4)),
            clock_set,
            pause_gate: Arc::new(PauseGate::new()),
            paused: Arc::new(AtomicBool::new(false)),
            frame_step: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            epoch,
            may_have_discontinuities,
            avg_frame_duration: if avg_frame_rate > 0.0 { 1.0 / avg_frame_rate } else { 0.04 },
            width,
            height,
            decode_thread: Mutex::new(None),
            render_thread: Mutex::new(None),
        }
    }

    pub fn packet_queue(&self) -> &PacketQueue {
        &self.queue
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
        self.pause_gate.set_paused(paused);
    }

    pub fn request_frame_step(&self) {
        self.frame_step.store(true, Ordering::SeqCst);
        self.pause_gate.set_paused(self.paused.load(Ordering::SeqCst));
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed) && self.frames.num_remaining() == 0
    }

    pub fn abort(&self) {
        self.queue.abort();
        self.frames.abort();
        self.pause_gate.set_paused(false);
        if let Some(h) = self.decode_thread.lock().unwrap().take() {
            let _ = h.join();
        }
        if let Some(h) = self.render_thread.lock().unwrap().take() {
            let _ = h.join();
        }
    }

    pub fn start_decoding(
        &self,
        decoder: ffmpeg::decoder::Video,
        time_base: (i32, i32),
        subtitles: Option<Arc<SubtitleStream>>,
        host: Arc<dyn HostCallback>,
    ) -> anyhow::Result<()> {
        let src_format = decoder.format();
        let src_w = decoder.width();
        let src_h = decoder.height();
        let yuv = YuvConverter::new(decode_8bit_equivalent(src_format), src_w, src_h, self.width, self.height)?;

        let queue = Arc::clone(&self.queue);
        let frames = Arc::clone(&self.frames);
        let pool = Arc::clone(&self.pool);
        let clock_set = Arc::clone(&self.clock_set);
        let avg_duration = self.avg_frame_duration;
        let dst_w = self.width;
        let dst_h = self.height;
        let epoch = self.epoch;

        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Video);
            let mut driver = VideoDecodeDriver {
                decoder,
                yuv,
                src_format,
                pool,
                frames,
                subtitles,
                clock_set,
                time_base,
                avg_duration,
                dst_w,
                dst_h,
                epoch,
                serial: 0,
                frame_drops_allowed: true,
                queue: Arc::clone(&queue),
            };
            let mut state = DecodeState::new();
            let mut pending = None;
            while decode_loop_step(&queue, &mut driver, &mut state, &mut pending) {}
        });
        *self.decode_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn start_rendering(&self, mut sink: Box<dyn VideoSink>, host: Arc<dyn HostCallback>) {
        let frames = Arc::clone(&self.frames);
        let pool = Arc::clone(&self.pool);
        let clock_set = Arc::clone(&self.clock_set);
        let pause_gate = Arc::clone(&self.pause_gate);
        let queue = Arc::clone(&self.queue);
        let paused = Arc::clone(&self.paused);
        let frame_step = Arc::clone(&self.frame_step);
        let epoch = self.epoch;
        let may_have_discontinuities = self.may_have_discontinuities;
        let dst_w = self.width;
        let dst_h = self.height;

        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Video);
            let mut frame_timer = epoch.elapsed().as_secs_f64();
            let mut last_duration = 0.04;
            let mut last_pts = 0.0;
            let max_duration = max_frame_duration(may_have_discontinuities);

            loop {
                if queue.has_aborted() {
                    return;
                }
                pause_gate.wait_unless_stepping(&frame_step);
                if queue.has_aborted() {
                    return;
                }

                if !frames.wait_readable() {
                    return;
                }

                // Discard frames whose serial no longer matches the current
                // packet-queue serial (stale across a seek), recycling the
                // pool slot they held.
                let stale = frames.with_first(|f| f.serial != queue.serial()).unwrap_or(false);
                if stale {
                    frames.push_next();
                    continue;
                }

                let now = epoch.elapsed().as_secs_f64();
                let (pts, duration, serial, slot, stride) = frames
                    .with_first(|f| {
                        let slot_info = match &f.payload {
                            FrameData::Video(v) => (v.slot, v.stride),
                            _ => (0, 0),
                        };
                        (f.pts, f.duration, f.serial, slot_info.0, slot_info.1)
                    })
                    .unwrap();

                let frame_duration = clamp_frame_duration(pts - last_pts, max_duration, duration);
                last_duration = frame_duration;
                last_pts = pts;

                let is_master = clock_set.master_kind(frame_step.load(Ordering::Relaxed)) == MasterClockKind::Video;
                let delay_decision = if is_master {
                    DelayDecision::AsIs(last_duration)
                } else {
                    let master_pts = clock_set.master_pts_for_video_sync(now, frame_step.load(Ordering::Relaxed));
                    let diff = pts - master_pts;
                    video_frame_delay(diff, last_duration)
                };
                let delay = delay_decision.delay();

                if now < frame_timer + delay {
                    let remaining = (frame_timer + delay) - now;
                    std::thread::sleep(Duration::from_secs_f64(remaining.min(RENDER_TICK.as_secs_f64())));
                    continue;
                }

                frame_timer += delay;
                let sync_max = player_core::sync::AV_SYNC_THRESHOLD_MAX;
                if (now - frame_timer).abs() > sync_max {
                    frame_timer = now;
                }

                {
                    let mut vc = clock_set.video.lock().unwrap();
                    vc.set_pts(pts, now, serial);
                }
                {
                    let video = clock_set.video.lock().unwrap();
                    let mut external = clock_set.external.lock().unwrap();
                    external.sync_to_clock(&video, now);
                }

                // Late-drop: more than one readable frame and we're already
                // behind the next frame's display instant.
                if frames.num_remaining() > 1 {
                    let next_dur = frames.with_next(|f| f.duration).unwrap_or(frame_duration);
                    if now > frame_timer + next_dur {
                        frames.push_next();
                        continue;
                    }
                }

                if let Ok(mut locked) = lock_buffer(sink.as_mut(), dst_w, dst_h) {
                    pool.with_slot(slot, |buf| {
                        for row in 0..dst_h as usize {
                            let src = &buf[row * stride..row * stride + stride];
                            let dst_off = row * locked.stride;
                            unsafe {
                                std::ptr::copy_nonoverlapping(src.as_ptr(), locked.bits.add(dst_off), stride.min(locked.stride));
                            }
                        }
                    });
                    locked.post();
                }

                frames.push_next();

                if frame_step.load(Ordering::Relaxed) && !paused.load(Ordering::Relaxed) {
                    frame_step.store(false, Ordering::SeqCst);
                    paused.store(true, Ordering::SeqCst);
                    pause_gate.set_paused(true);
                    host.on_playback_changed(true);
                }
            }
        });
        *self.render_thread.lock().unwrap() = Some(handle);
    }
}

struct VideoDecodeDriver {
    decoder: ffmpeg::decoder::Video,
    yuv: YuvConverter,
    src_format: Pixel,
    pool: Arc<FramePool>,
    frames: Arc<FrameRing<Frame>>,
    subtitles: Option<Arc<SubtitleStream>>,
    clock_set: Arc<ClockSet>,
    time_base: (i32, i32),
    avg_duration: f64,
    dst_w: u32,
    dst_h: u32,
    epoch: Instant,
    serial: Serial,
    frame_drops_allowed: bool,
    queue: Arc<PacketQueue>,
}

impl DecodeDriver for VideoDecodeDriver {
    fn receive(&mut self) -> ReceiveOutcome {
        let mut decoded = ffmpeg::frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                self.handle_decoded_frame(decoded);
                ReceiveOutcome::Decoded
            }
            Err(ffmpeg::Error::Eof) => ReceiveOutcome::Eof,
            Err(_) => ReceiveOutcome::Again,
        }
    }

    fn submit(&mut self, packet: &ffmpeg::Packet) -> bool {
        match self.decoder.send_packet(packet) {
            Ok(()) => true,
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => false,
            Err(e) => {
                eprintln!("[video] send_packet: {e}");
                true
            }
        }
    }

    fn flush_codec_buffers(&mut self) {
        self.decoder.flush();
    }
}

impl VideoDecodeDriver {
    fn handle_decoded_frame(&mut self, decoded: ffmpeg::frame::Video) {
        let (num, den) = self.time_base;
        let pts_raw = decoded.timestamp().unwrap_or(0);
        let pts = pts_raw as f64 * num as f64 / den as f64;

        // Early-drop: audio is master, this frame is hopelessly late, and
        // there's more decoded work queued behind it.
        if self.frame_drops_allowed && self.clock_set.master_kind(false) == MasterClockKind::Audio {
            let now = self.epoch.elapsed().as_secs_f64();
            let master_pts = self.clock_set.master_pts_for_video_sync(now, false);
            let diff = pts - master_pts;
            if diff < 0.0 && diff.abs() < player_core::sync::AV_NOSYNC_THRESHOLD && !self.queue.is_empty() {
                return;
            }
        }

        let slot = self.pool.acquire();
        let dst_stride = self.dst_w as usize * 4;
        if let Err(e) = self.convert_into_slot(&decoded, slot) {
            eprintln!("[video] convert: {e}");
            return;
        }

        if let Some(subs) = &self.subtitles {
            if let Some(overlay) = subs.get_pending_subtitle_frame(pts) {
                self.pool.with_slot_mut(slot, |buf| {
                    let rows = overlay.height.max(0) as usize;
                    for row in 0..rows {
                        let src = &overlay.buffer[row * overlay.stride..row * overlay.stride + overlay.stride];
                        let dst_off = row * dst_stride;
                        if dst_off + src.len() <= buf.len() {
                            for (i, px) in src.chunks(4).enumerate() {
                                let d = &mut buf[dst_off + i * 4..dst_off + i * 4 + 4];
                                let a = px[3] as u32;
                                let inv = 255 - a;
                                d[0] = ((d[0] as u32 * inv + px[0] as u32 * a + 127) / 255) as u8;
                                d[1] = ((d[1] as u32 * inv + px[1] as u32 * a + 127) / 255) as u8;
                                d[2] = ((d[2] as u32 * inv + px[2] as u32 * a + 127) / 255) as u8;
                                d[3] = ((d[3] as u32 * inv + a * a + 127) / 255) as u8;
                            }
                        }
                    }
                });
            }
        }

        let frame = Frame::video(slot, dst_stride, pts, self.avg_duration, self.serial);
        self.frames.push(frame);
    }

    fn convert_into_slot(&mut self, decoded: &ffmpeg::frame::Video, slot: usize) -> anyhow::Result<()> {
        let reduced;
        let src_for_scale: &ffmpeg::frame::Video = if let Some(depth) = classify_high_bitdepth(self.src_format) {
            reduced = reduce_high_bitdepth_frame(decoded, depth)?;
            &reduced
        } else {
            decoded
        };

        let mut rgba = ffmpeg::frame::Video::empty();
        self.yuv.convert(src_for_scale, &mut rgba)?;

        let width = self.dst_w as usize;
        let height = self.dst_h as usize;
        let src_stride = rgba.stride(0);
        let src_data = rgba.data(0);
        let dst_stride = width * 4;
        self.pool.with_slot_mut(slot, |buf| {
            for row in 0..height {
                let s = &src_data[row * src_stride..row * src_stride + width * 4];
                let d = &mut buf[row * dst_stride..row * dst_stride + width * 4];
                d.copy_from_slice(s);
            }
        });
        Ok(())
    }
}

/// (depth, big_endian, log2_chroma_w, log2_chroma_h) for the handful of
/// high-bit-depth planar formats the reducer (§4.12) targets. `None` means
/// the source is already 8-bit and goes straight to the scaler.
fn classify_high_bitdepth(format: Pixel) -> Option<(BitDepth, bool, u32, u32)> {
    match format {
        Pixel::YUV420P10LE => Some((BitDepth::Ten, false, 1, 1)),
        Pixel::YUV422P10LE => Some((BitDepth::Ten, false, 1, 0)),
        Pixel::YUV444P10LE => Some((BitDepth::Ten, false, 0, 0)),
        Pixel::YUV420P10BE => Some((BitDepth::Ten, true, 1, 1)),
        Pixel::YUV420P12LE => Some((BitDepth::Twelve, false, 1, 1)),
        Pixel::YUV420P12BE => Some((BitDepth::Twelve, true, 1, 1)),
        Pixel::YUV420P16LE => Some((BitDepth::Sixteen, false, 1, 1)),
        Pixel::YUV420P16BE => Some((BitDepth::Sixteen, true, 1, 1)),
        _ => None,
    }
}

/// Returns the 8-bit pixel format the scaler should be configured for once
/// the reducer has already shrunk a high-bit-depth source — 4:2:0 in every
/// case the reducer currently handles, since all listed formats above are
/// 4:2:0 or 4:2:2/4:4:4 mapped down to the nearest common 8-bit equivalent.
fn decode_8bit_equivalent(format: Pixel) -> Pixel {
    match classify_high_bitdepth(format) {
        Some((_, _, 1, 1)) => Pixel::YUV420P,
        Some((_, _, 1, 0)) => Pixel::YUV422P,
        Some((_, _, 0, 0)) => Pixel::YUV444P,
        _ => format,
    }
}

fn reduce_high_bitdepth_frame(src: &ffmpeg::frame::Video, depth: (BitDepth, bool, u32, u32)) -> anyhow::Result<ffmpeg::frame::Video> {
    let (bit_depth, big_endian, log2_cw, log2_ch) = depth;
    let dst_format = match (log2_cw, log2_ch) {
        (1, 1) => Pixel::YUV420P,
        (1, 0) => Pixel::YUV422P,
        _ => Pixel::YUV444P,
    };
    let mut dst = ffmpeg::frame::Video::new(dst_format, src.width(), src.height());

    let (luma_w, luma_h) = (src.width() as usize, src.height() as usize);
    let (chroma_w, chroma_h) = player_core::bitdepth::chroma_dims(luma_w, luma_h, log2_cw, log2_ch);

    for plane in 0..3 {
        let (w, h) = if plane == 0 { (luma_w, luma_h) } else { (chroma_w, chroma_h) };
        let src_stride = src.stride(plane);
        let dst_stride = dst.stride(plane);
        let src_data = src.data(plane).to_vec();
        let dst_data = dst.data_mut(plane);
        reduce_plane_to_8bit(&src_data, src_stride, dst_data, dst_stride, w, h, bit_depth, big_endian);
    }
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_high_bitdepth_recognizes_ten_bit_420() {
        assert_eq!(classify_high_bitdepth(Pixel::YUV420P10LE), Some((BitDepth::Ten, false, 1, 1)));
        assert_eq!(classify_high_bitdepth(Pixel::YUV420P), None);
    }

    #[test]
    fn eight_bit_formats_map_to_themselves() {
        assert_eq!(decode_8bit_equivalent(Pixel::YUV420P), Pixel::YUV420P);
        assert_eq!(decode_8bit_equivalent(Pixel::YUV420P10LE), Pixel::YUV420P);
    }
}
