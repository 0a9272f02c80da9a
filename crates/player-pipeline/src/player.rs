// crates/player-pipeline/src/player.rs
//
// Player: owns the demuxer and the read thread (spec §4.4), assembles
// metadata, wires the three stream pipelines together through one
// `ClockSet`, and exposes the seek/pause/play/frame-step control surface.
// Grounded in the teacher's `MediaWorker` (command channel, thread
// lifecycle, `Arc<(Mutex<Option<T>>, Condvar)>` latest-wins slot) and
// `LiveDecoder::open` (demuxer/decoder/scaler bring-up), generalized from
// MediaWorker's single-clip seek-and-decode into a continuously running
// three-stream pipeline.

use crate::audio_stream::AudioStream;
use crate::clock_set::ClockSet;
use crate::config::PlayerConfig;
use crate::host::{HostCallback, StreamKind, ThreadScope};
use crate::packet_queue::PacketQueue;
use crate::subtitle::{is_text_subtitle_codec, ImageSubtitleHandler, SubtitleHandler, TextSubtitleHandler};
use crate::subtitle_stream::SubtitleStream;
use crate::video_stream::VideoStream;
use anyhow::{anyhow, Result};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type as MediaType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const BACKPRESSURE_BYTE_CAP: usize = 15 * 1024 * 1024;
const SUBTITLE_PRESCAN_WINDOW_SECS: f64 = 2.0;

struct SeekRequest {
    min_ts: i64,
    target_ts: i64,
    max_ts: i64,
    target_secs: f64,
}

/// The read thread's view of "should I keep running, and in what state".
/// Spec §9 names these three booleans explicitly: `frameStepMode` (video
/// render thread is allowed to display exactly one frame while paused),
/// `seekRequested` (a seek is pending), and `waitingFrameAfterSeek` (the
/// read/decode pipeline flushed but the first post-seek frame hasn't
/// reached the render thread yet, so progress/EOF checks must hold off).
struct PlaybackState {
    paused: AtomicBool,
    frame_step_mode: AtomicBool,
    waiting_frame_after_seek: AtomicBool,
    seek_request: Mutex<Option<SeekRequest>>,
    eof: AtomicBool,
    abort: AtomicBool,
}

impl PlaybackState {
    fn new() -> Self {
        Self {
            paused: AtomicBool::new(false),
            frame_step_mode: AtomicBool::new(false),
            waiting_frame_after_seek: AtomicBool::new(false),
            seek_request: Mutex::new(None),
            eof: AtomicBool::new(false),
            abort: AtomicBool::new(false),
        }
    }
}

struct StreamSlot {
    index: usize,
    queue: Arc<PacketQueue>,
}

pub struct Player {
    config: PlayerConfig,
    host: Arc<dyn HostCallback>,
    epoch: Instant,
    clock_set: Arc<ClockSet>,
    state: Arc<PlaybackState>,
    pause_condvar: Arc<Condvar>,
    pause_mutex: Arc<Mutex<()>>,
    video: Option<Arc<VideoStream>>,
    audio: Option<Arc<AudioStream>>,
    subtitle: Option<Arc<SubtitleStream>>,
    duration_ms: AtomicI64,
    read_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn open(config: PlayerConfig, host: Arc<dyn HostCallback>, video_sink: Box<dyn crate::sinks::VideoSink>) -> Result<Arc<Self>> {
        let mut probe_ctx = ffmpeg::format::input(&config.url)?;

        let video_idx = probe_ctx.streams().best(MediaType::Video).map(|s| s.index());
        let audio_idx = probe_ctx.streams().best(MediaType::Audio).map(|s| s.index());
        let subtitle_idx = probe_ctx.streams().best(MediaType::Subtitle).map(|s| s.index());

        let container_meta = dict_to_map(probe_ctx.metadata());
        let mut video_meta = Vec::new();
        let mut audio_meta = Vec::new();
        let mut subtitle_meta = Vec::new();
        for stream in probe_ctx.streams() {
            let m = dict_to_map(stream.metadata());
            match stream.parameters().medium() {
                MediaType::Video => video_meta.push(m),
                MediaType::Audio => audio_meta.push(m),
                MediaType::Subtitle => subtitle_meta.push(m),
                _ => {}
            }
        }
        host.on_metadata_ready(&container_meta, &video_meta, &audio_meta, &subtitle_meta);

        let duration_ms = (probe_ctx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64 * 1000.0) as i64;

        let has_audio = audio_idx.is_some();
        let has_video = video_idx.is_some();
        let epoch = Instant::now();
        let clock_set = Arc::new(ClockSet::new(0.0, has_audio, has_video));
        let state = Arc::new(PlaybackState::new());

        let mut video_stream = None;
        if let Some(idx) = video_idx {
            let stream = probe_ctx.stream(idx).unwrap();
            let params = stream.parameters();
            let w = unsafe { (*params.as_ptr()).width as u32 };
            let h = unsafe { (*params.as_ptr()).height as u32 };
            let frame_rate = stream.avg_frame_rate();
            let fps = if frame_rate.denominator() != 0 {
                frame_rate.numerator() as f64 / frame_rate.denominator() as f64
            } else {
                25.0
            };
            let may_have_discontinuities = probe_ctx.format().name() == "hls" || probe_ctx.format().name() == "rtsp";
            let vs = Arc::new(VideoStream::new(Arc::clone(&clock_set), epoch, w.max(2), h.max(2), fps, may_have_discontinuities));
            if stream.disposition().contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC) {
                vs.packet_queue().mark_attached_picture_full();
            }
            video_stream = Some(vs);
        }

        let subtitle_stream = subtitle_idx.map(|idx| {
            let stream = probe_ctx.stream(idx).unwrap();
            let native_w = config.subtitle_frame_size.map(|(w, _)| w).unwrap_or(1920);
            let native_h = config.subtitle_frame_size.map(|(_, h)| h).unwrap_or(1080);
            let codec = stream.parameters().id();
            let handler: Box<dyn SubtitleHandler> = if is_text_subtitle_codec(&format!("{codec:?}").to_lowercase()) {
                Box::new(TextSubtitleHandler::new(default_text_layout_engine()))
            } else {
                Box::new(ImageSubtitleHandler::new())
            };
            Arc::new(SubtitleStream::new(handler, native_w, native_h))
        });
        if let (Some(sub), Some((w, h))) = (&subtitle_stream, config.subtitle_frame_size) {
            sub.set_frame_size(w, h);
            sub.ensure_queue();
            sub.set_default_font(config.default_subtitle_font_path.as_deref(), config.default_subtitle_font_family.as_deref());
        }

        let audio_stream = audio_idx.map(|_| Arc::new(AudioStream::new(Arc::clone(&clock_set), epoch)));

        let player = Arc::new(Self {
            config,
            host: Arc::clone(&host),
            epoch,
            clock_set,
            state: Arc::clone(&state),
            pause_condvar: Arc::new(Condvar::new()),
            pause_mutex: Arc::new(Mutex::new(())),
            video: video_stream.clone(),
            audio: audio_stream.clone(),
            subtitle: subtitle_stream.clone(),
            duration_ms: AtomicI64::new(duration_ms.max(0)),
            read_thread: Mutex::new(None),
        });

        if let Some(vs) = &video_stream {
            let decoder = open_video_decoder(&config_url(&player.config), video_idx.unwrap())?;
            let stream = probe_ctx.stream(video_idx.unwrap()).unwrap();
            let tb = stream.time_base();
            vs.start_decoding(decoder, (tb.numerator(), tb.denominator()), subtitle_stream.clone(), Arc::clone(&host))?;
            vs.start_rendering(video_sink, Arc::clone(&host));
        }

        if let Some(aud) = &audio_stream {
            let decoder = open_audio_decoder(&config_url(&player.config), audio_idx.unwrap())?;
            let stream = probe_ctx.stream(audio_idx.unwrap()).unwrap();
            let tb = stream.time_base();
            let sink = host.create_audio_renderer(decoder.rate(), decoder.channels());
            aud.start_decoding(decoder, (tb.numerator(), tb.denominator()), Arc::clone(&host))?;
            aud.start_rendering(sink, Arc::clone(&host));
        }

        if let Some(sub) = &subtitle_stream {
            let decoder = open_subtitle_decoder(&config_url(&player.config), subtitle_idx.unwrap())?;
            let stream = probe_ctx.stream(subtitle_idx.unwrap()).unwrap();
            let tb = stream.time_base();
            sub.start_decoding(decoder, (tb.numerator(), tb.denominator()), Arc::clone(&host));
        }

        player.spawn_read_thread(probe_ctx, video_idx, audio_idx, subtitle_idx);
        host.on_stream_ready();
        Ok(player)
    }

    fn spawn_read_thread(
        self: &Arc<Self>,
        mut ictx: ffmpeg::format::context::Input,
        video_idx: Option<usize>,
        audio_idx: Option<usize>,
        subtitle_idx: Option<usize>,
    ) {
        let video = self.video.clone();
        let audio = self.audio.clone();
        let subtitle = self.subtitle.clone();
        let state = Arc::clone(&self.state);
        let host = Arc::clone(&self.host);
        let clock_set = Arc::clone(&self.clock_set);
        let pause_condvar = Arc::clone(&self.pause_condvar);
        let pause_mutex = Arc::clone(&self.pause_mutex);
        let epoch = self.epoch;

        if let Some(v) = &video {
            v.packet_queue().begin();
        }
        if let Some(a) = &audio {
            a.packet_queue().begin();
        }
        if let Some(s) = &subtitle {
            s.packet_queue().begin();
        }

        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Video);
            let mut last_progress_emit = 0.0;

            // Step 3: an attached cover picture (spec §4.4 item 3) never
            // arrives through the normal packet-read loop — the demuxer
            // stores it directly on the `AVStream`, not in the packet
            // stream — so it is fetched once, up front, and enqueued as
            // the video stream's only frame; `mark_attached_picture_full`
            // (set at stream setup) stands in for the "followed by an
            // empty EOF packet" marker, since this stream will never be
            // read from again.
            if let (Some(v), Some(idx)) = (&video, video_idx) {
                if let Some(pkt) = attached_picture_packet(&ictx, idx) {
                    v.packet_queue().enqueue_packet(pkt, 0.0);
                }
            }

            loop {
                if state.abort.load(Ordering::Relaxed) {
                    return;
                }

                // Step 2: seek handling.
                let seek = state.seek_request.lock().unwrap().take();
                if let Some(req) = seek {
                    if ictx.seek(req.target_ts, req.min_ts..=req.max_ts).is_ok() {
                        if let Some(v) = &video {
                            v.packet_queue().flush_with_sentinel();
                        }
                        if let Some(a) = &audio {
                            a.packet_queue().flush_with_sentinel();
                        }
                        if let Some(s) = &subtitle {
                            s.packet_queue().flush_with_sentinel();
                        }
                        let now = epoch.elapsed().as_secs_f64();
                        {
                            let mut ext = clock_set.external.lock().unwrap();
                            let serial = ext.serial() + 1;
                            ext.set_pts(req.target_secs, now, serial);
                        }
                        state.eof.store(false, Ordering::Relaxed);
                        state.waiting_frame_after_seek.store(true, Ordering::Relaxed);
                        if state.paused.load(Ordering::Relaxed) {
                            state.frame_step_mode.store(true, Ordering::Relaxed);
                            if let Some(v) = &video {
                                v.request_frame_step();
                            }
                        }
                        if let Some(s) = &subtitle {
                            prescan_subtitles(&mut ictx, subtitle_idx, s, req.target_secs);
                        }
                    }
                }

                // Step 4: wait while paused (frame-step lets the render
                // thread run once without unblocking this loop).
                {
                    let guard = pause_mutex.lock().unwrap();
                    let mut guard = guard;
                    while state.paused.load(Ordering::Relaxed) && !state.frame_step_mode.load(Ordering::Relaxed) {
                        let (g, timeout) = pause_condvar.wait_timeout(guard, Duration::from_millis(50)).unwrap();
                        guard = g;
                        if timeout.timed_out() && state.abort.load(Ordering::Relaxed) {
                            return;
                        }
                    }
                }
                if state.abort.load(Ordering::Relaxed) {
                    return;
                }

                // Step 5: read one packet.
                match read_one_packet(&mut ictx) {
                    Some((stream_idx, packet)) => {
                        if packet.pts().map(|p| p < 0).unwrap_or(false) {
                            continue;
                        }
                        let duration_secs = packet_duration_secs(&ictx, stream_idx, &packet);
                        if Some(stream_idx) == video_idx {
                            if let Some(v) = &video {
                                v.packet_queue().enqueue_packet(packet, duration_secs);
                            }
                        } else if Some(stream_idx) == audio_idx {
                            if let Some(a) = &audio {
                                a.packet_queue().enqueue_packet(packet, duration_secs);
                            }
                        } else if Some(stream_idx) == subtitle_idx {
                            if let Some(s) = &subtitle {
                                s.packet_queue().enqueue_packet(packet, duration_secs);
                            }
                        }
                        state.waiting_frame_after_seek.store(false, Ordering::Relaxed);
                    }
                    None => {
                        state.eof.store(true, Ordering::Relaxed);
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }

                // Step 6: backpressure.
                let queues = [video.as_ref().map(|v| v.packet_queue()), audio.as_ref().map(|a| a.packet_queue()), subtitle.as_ref().map(|s| s.packet_queue())];
                let total_bytes = queues.iter().flatten().map(|q| q.size_bytes()).sum::<usize>();
                let all_full = queues.iter().flatten().all(|q| q.is_queue_full());
                if total_bytes > BACKPRESSURE_BYTE_CAP || all_full {
                    std::thread::sleep(Duration::from_millis(10));
                }

                // Step 7: stream-finished detection.
                if state.eof.load(Ordering::Relaxed) && !state.waiting_frame_after_seek.load(Ordering::Relaxed) {
                    let finished = [video.as_ref().map(|v| v.is_finished()), audio.as_ref().map(|a| a.packet_queue().is_empty())]
                        .iter()
                        .all(|f| f.unwrap_or(true));
                    if finished {
                        host.on_stream_finished();
                        state.paused.store(true, Ordering::Relaxed);
                        host.on_playback_changed(true);
                    }
                }

                let now = epoch.elapsed();
                if now.as_secs_f64() - last_progress_emit >= 1.0 {
                    last_progress_emit = now.as_secs_f64();
                    let current_ms = (clock_set.master_pts(now.as_secs_f64(), state.frame_step_mode.load(Ordering::Relaxed)) * 1000.0) as i64;
                    host.on_progress_changed(current_ms.max(0), 0);
                }
            }
        });
        *self.read_thread.lock().unwrap() = Some(handle);
    }

    pub fn play(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        self.state.frame_step_mode.store(false, Ordering::SeqCst);
        if let Some(v) = &self.video {
            v.set_paused(false);
        }
        if let Some(a) = &self.audio {
            a.set_paused(false);
        }
        self.pause_condvar.notify_all();
        self.host.on_playback_changed(false);
    }

    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        if let Some(v) = &self.video {
            v.set_paused(true);
        }
        if let Some(a) = &self.audio {
            a.set_paused(true);
        }
        self.host.on_playback_changed(true);
    }

    pub fn frame_step(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        self.state.frame_step_mode.store(true, Ordering::SeqCst);
        if let Some(v) = &self.video {
            v.request_frame_step();
        }
        self.pause_condvar.notify_all();
    }

    pub fn seek(&self, target_secs: f64, min_secs: f64, max_secs: f64) {
        let to_ts = |s: f64| (s * ffmpeg::ffi::AV_TIME_BASE as f64) as i64;
        let req = SeekRequest {
            min_ts: to_ts(min_secs),
            target_ts: to_ts(target_secs),
            max_ts: to_ts(max_secs),
            target_secs,
        };
        *self.state.seek_request.lock().unwrap() = Some(req);
        self.pause_condvar.notify_all();
    }

    pub fn set_muted(&self, muted: bool) {
        if let Some(a) = &self.audio {
            a.set_muted(muted);
        }
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(a) = &self.audio {
            a.set_volume(volume);
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        self.state.abort.store(true, Ordering::SeqCst);
        self.pause_condvar.notify_all();
        if let Some(v) = &self.video {
            v.abort();
        }
        if let Some(a) = &self.audio {
            a.abort();
        }
        if let Some(s) = &self.subtitle {
            s.abort();
        }
        if let Some(h) = self.read_thread.lock().unwrap().take() {
            let _ = h.join();
        }
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dict_to_map(dict: ffmpeg::util::dictionary::Ref) -> HashMap<String, String> {
    dict.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn config_url(config: &PlayerConfig) -> std::path::PathBuf {
    config.url.clone()
}

fn open_video_decoder(url: &std::path::Path, stream_idx: usize) -> Result<ffmpeg::decoder::Video> {
    let ictx = ffmpeg::format::input(url)?;
    let stream = ictx.stream(stream_idx).ok_or_else(|| anyhow!("missing video stream"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    Ok(ctx.decoder().video()?)
}

fn open_audio_decoder(url: &std::path::Path, stream_idx: usize) -> Result<ffmpeg::decoder::Audio> {
    let ictx = ffmpeg::format::input(url)?;
    let stream = ictx.stream(stream_idx).ok_or_else(|| anyhow!("missing audio stream"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    Ok(ctx.decoder().audio()?)
}

fn open_subtitle_decoder(url: &std::path::Path, stream_idx: usize) -> Result<ffmpeg::codec::decoder::subtitle::Subtitle> {
    let ictx = ffmpeg::format::input(url)?;
    let stream = ictx.stream(stream_idx).ok_or_else(|| anyhow!("missing subtitle stream"))?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?;
    Ok(ctx.decoder().subtitle()?)
}

/// Pulls the demuxer's stashed attached-picture packet (cover art) off the
/// raw `AVStream`, if the stream carries one. Most demuxers that set
/// `AV_DISPOSITION_ATTACHED_PIC` (mp3/flac ID3 art, mkv cover attachments)
/// populate `AVStream.attached_pic` directly rather than emitting it
/// through `av_read_frame`, so it has to be read via the raw field and
/// ref-counted into an owned packet the same way `av_packet_ref` does
/// internally for any other borrowed packet.
fn attached_picture_packet(ictx: &ffmpeg::format::context::Input, stream_idx: usize) -> Option<ffmpeg::Packet> {
    let stream = ictx.stream(stream_idx)?;
    if !stream.disposition().contains(ffmpeg::format::stream::Disposition::ATTACHED_PIC) {
        return None;
    }
    unsafe {
        let raw = &(*stream.as_ptr()).attached_pic;
        if raw.size <= 0 || raw.data.is_null() {
            return None;
        }
        let mut pkt = ffmpeg::Packet::empty();
        if ffmpeg::ffi::av_packet_ref(pkt.as_mut_ptr(), raw) < 0 {
            return None;
        }
        Some(pkt)
    }
}

fn read_one_packet(ictx: &mut ffmpeg::format::context::Input) -> Option<(usize, ffmpeg::Packet)> {
    ictx.packets().next().map(|(stream, packet)| (stream.index(), packet))
}

fn packet_duration_secs(ictx: &ffmpeg::format::context::Input, stream_idx: usize, packet: &ffmpeg::Packet) -> f64 {
    let tb = ictx.stream(stream_idx).map(|s| s.time_base()).unwrap_or(ffmpeg::Rational(1, 1));
    packet.duration() as f64 * tb.numerator() as f64 / tb.denominator().max(1) as f64
}

/// Re-reads a small window of subtitle packets around a seek target so
/// subtitle events that began before the seek point but are still active
/// are present in the queue (spec §4.4 step 2).
fn prescan_subtitles(
    ictx: &mut ffmpeg::format::context::Input,
    subtitle_idx: Option<usize>,
    subtitle: &Arc<SubtitleStream>,
    target_secs: f64,
) {
    let Some(idx) = subtitle_idx else { return };
    let tb = match ictx.stream(idx) {
        Some(s) => s.time_base(),
        None => return,
    };
    let window_start = (target_secs - SUBTITLE_PRESCAN_WINDOW_SECS).max(0.0);
    let start_ts = (window_start * tb.denominator() as f64 / tb.numerator() as f64) as i64;
    if ictx.seek(start_ts, ..=start_ts).is_err() {
        return;
    }
    for (stream, packet) in ictx.packets().flatten() {
        if stream.index() != idx {
            continue;
        }
        let pts_secs = packet.pts().unwrap_or(0) as f64 * tb.numerator() as f64 / tb.denominator() as f64;
        if pts_secs > target_secs {
            break;
        }
        subtitle.packet_queue().enqueue_packet(packet, 0.0);
    }
}

/// Placeholder seam for the concrete ASS/SSA layout-engine binding (a
/// libass-style external renderer) a host links in; not part of this
/// crate's own dependency surface.
fn default_text_layout_engine() -> Box<dyn crate::subtitle::SubtitleLayoutEngine> {
    Box::new(crate::subtitle::NullLayoutEngine::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_state_starts_unpaused_and_not_stepping() {
        let s = PlaybackState::new();
        assert!(!s.paused.load(Ordering::Relaxed));
        assert!(!s.frame_step_mode.load(Ordering::Relaxed));
        assert!(!s.waiting_frame_after_seek.load(Ordering::Relaxed));
    }
}
