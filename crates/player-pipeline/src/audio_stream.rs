// crates/player-pipeline/src/audio_stream.rs
//
// AudioStream: decode → PTS interpolation → enqueue (spec §4.7 pipeline);
// render thread resamples to the sink's format/rate and writes, correcting
// for A/V drift via `syncClocks`. Grounded in the teacher's `worker.rs`
// command/thread shape and `decode.rs`'s send/receive decode loop,
// generalized to audio's resample-then-write render step.

use crate::clock_set::{ClockSet, MasterClockKind};
use crate::frame_data::Frame;
use crate::host::{HostCallback, StreamKind, ThreadScope};
use crate::packet_queue::PacketQueue;
use crate::sinks::{AudioSink, LatencyTracker};
use crate::stream::{decode_loop_step, DecodeDriver, DecodeState, PauseGate, ReceiveOutcome};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::software::resampling::Context as Resampler;
use ffmpeg::util::format::sample::Sample;
use ffmpeg::util::channel_layout::ChannelLayout;
use player_core::sync::{wanted_samples, AudioDiffAccumulator};
use player_core::{FrameRing, Serial};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

pub struct AudioStream {
    queue: Arc<PacketQueue>,
    frames: Arc<FrameRing<Frame>>,
    clock_set: Arc<ClockSet>,
    pause_gate: Arc<PauseGate>,
    paused: Arc<AtomicBool>,
    muted: Arc<AtomicBool>,
    volume: Mutex<f32>,
    epoch: Instant,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
    render_thread: Mutex<Option<JoinHandle<()>>>,
}

impl AudioStream {
    pub fn new(clock_set: Arc<ClockSet>, epoch: Instant) -> Self {
        Self {
            queue: Arc::new(PacketQueue::new(25, 1.0)),
            frames: Arc::new(FrameRing::new(9, false)),
            clock_set,
            pause_gate: Arc::new(PauseGate::new()),
            paused: Arc::new(AtomicBool::new(false)),
            muted: Arc::new(AtomicBool::new(false)),
            volume: Mutex::new(1.0),
            epoch,
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

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume;
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
        decoder: ffmpeg::decoder::Audio,
        time_base: (i32, i32),
        host: Arc<dyn HostCallback>,
    ) -> anyhow::Result<()> {
        let sample_rate = decoder.rate();
        let queue = Arc::clone(&self.queue);
        let frames = Arc::clone(&self.frames);

        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Audio);
            let mut driver = AudioDecodeDriver {
                decoder,
                frames,
                time_base,
                sample_rate,
                next_pts: None,
                start_pts: 0.0,
                serial: 0,
            };
            let mut state = DecodeState::new();
            let mut pending = None;
            while decode_loop_step(&queue, &mut driver, &mut state, &mut pending) {}
        });
        *self.decode_thread.lock().unwrap() = Some(handle);
        Ok(())
    }

    pub fn start_rendering(&self, mut sink: Box<dyn AudioSink>, host: Arc<dyn HostCallback>) {
        let frames = Arc::clone(&self.frames);
        let clock_set = Arc::clone(&self.clock_set);
        let pause_gate = Arc::clone(&self.pause_gate);
        let queue = Arc::clone(&self.queue);
        let paused = Arc::clone(&self.paused);
        let muted = Arc::clone(&self.muted);
        let epoch = self.epoch;

        let handle = std::thread::spawn(move || {
            let _scope = ThreadScope::enter(host.as_ref(), StreamKind::Audio);
            let mut diff_acc = AudioDiffAccumulator::new();
            let sink_rate = sink.sample_rate();
            let sink_channels = sink.num_channels() as u32;
            let mut resampler: Option<Resampler> = None;
            let mut was_paused = paused.load(Ordering::Relaxed);
            // `AudioSink::latency_secs` collapses the two host-side latency
            // APIs (spec §6) behind one call; `LatencyTracker` still applies
            // the stabilization poll-interval policy (500ms while ramping,
            // 20s once steady) against whatever the host returns.
            let mut latency_tracker = LatencyTracker::new();

            loop {
                if queue.has_aborted() {
                    return;
                }

                // Step 1: acknowledge pending pause/play state.
                let now_paused = paused.load(Ordering::Relaxed);
                if now_paused != was_paused {
                    if now_paused {
                        sink.pause();
                    } else {
                        sink.play();
                        let now = epoch.elapsed().as_secs_f64();
                        let mut video = clock_set.video.lock().unwrap();
                        let cur_pts = video.pts_at_checked(now, video.serial());
                        let serial = video.serial();
                        video.set_time_at(cur_pts, now, serial);
                    }
                    was_paused = now_paused;
                }
                pause_gate.wait_unless_stepping(&AtomicBool::new(false));
                if queue.has_aborted() {
                    return;
                }

                if !frames.wait_readable() {
                    return;
                }

                // Step 3: drop frames from a stale serial.
                let stale = frames.with_first(|f| f.serial != queue.serial()).unwrap_or(false);
                if stale {
                    frames.push_next();
                    continue;
                }

                let decode_start = epoch.elapsed().as_secs_f64();

                let (pts, duration, serial, nb_samples, channels, rate, format_name) = frames
                    .with_first(|f| match &f.payload {
                        crate::frame_data::FrameData::Audio(audio) => (
                            f.pts,
                            f.duration,
                            f.serial,
                            audio.samples() as u32,
                            audio.channels() as u32,
                            audio.rate(),
                            audio.format(),
                        ),
                        _ => (f.pts, f.duration, f.serial, 0, 0, 0, Sample::None),
                    })
                    .unwrap();

                // Step 2: apply pending mute via sink volume is handled by
                // `set_volume` calls from the host; nothing to poll here
                // besides the mute flag checked at write time (step 6).

                // Step 5: wanted-samples correction (syncClocks).
                let is_master = clock_set.master_kind(false) == MasterClockKind::Audio;
                let wanted = if is_master || rate == 0 {
                    nb_samples
                } else {
                    let master_pts = clock_set.master_pts(decode_start, false);
                    let diff = pts - master_pts;
                    if diff.abs() < 10.0 {
                        match diff_acc.feed(diff) {
                            Some(avg_diff) => wanted_samples(nb_samples, rate, diff, avg_diff),
                            None => nb_samples,
                        }
                    } else {
                        diff_acc = AudioDiffAccumulator::new();
                        nb_samples
                    }
                };

                let target_format = Sample::I16(ffmpeg::util::format::sample::Type::Packed);
                let needs_resample =
                    wanted != nb_samples || channels != sink_channels || rate != sink_rate || format_name != target_format;

                let out_bytes = if needs_resample {
                    if resampler.is_none() {
                        resampler = Resampler::get(
                            format_name,
                            ChannelLayout::default(channels as i32),
                            rate,
                            target_format,
                            ChannelLayout::default(sink_channels as i32),
                            sink_rate,
                        )
                        .ok();
                    }
                    frames
                        .with_first(|f| match &f.payload {
                            crate::frame_data::FrameData::Audio(audio) => {
                                resample_to_wanted(&mut resampler, audio, wanted, sink_channels, sink_rate)
                            }
                            _ => Ok(Vec::new()),
                        })
                        .unwrap()
                        .unwrap_or_else(|e| {
                            eprintln!("[audio] resample: {e}");
                            Vec::new()
                        })
                } else {
                    frames
                        .with_first(|f| match &f.payload {
                            crate::frame_data::FrameData::Audio(audio) => audio_frame_bytes(audio),
                            _ => Vec::new(),
                        })
                        .unwrap()
                };

                // Step 6: write, or sleep an equivalent duration if muted.
                if muted.load(Ordering::Relaxed) {
                    let bytes_per_sample = 2 * sink_channels as usize;
                    let frame_secs = if bytes_per_sample > 0 && sink_rate > 0 {
                        (out_bytes.len() / bytes_per_sample) as f64 / sink_rate as f64
                    } else {
                        0.0
                    };
                    std::thread::sleep(Duration::from_secs_f64(frame_secs));
                } else {
                    let mut offset = 0;
                    while offset < out_bytes.len() {
                        match sink.write(&out_bytes[offset..]) {
                            Ok(0) => break,
                            Ok(n) => offset += n,
                            Err(e) => {
                                eprintln!("[audio] write: {e}");
                                break;
                            }
                        }
                    }
                }

                // Step 7: update clocks and cached latency under the
                // frame-queue mutex (the ring's internal lock already
                // serializes this against concurrent pushes).
                let now = epoch.elapsed().as_secs_f64();
                {
                    let mut audio_clock = clock_set.audio.lock().unwrap();
                    audio_clock.set_time_at(pts, decode_start, serial);
                    let mut external = clock_set.external.lock().unwrap();
                    external.sync_to_clock(&audio_clock, now);
                }
                let _ = duration;

                if latency_tracker.should_poll(now) {
                    if let Some(secs) = sink.latency_secs() {
                        latency_tracker.record_precise(now, secs);
                        clock_set.set_audio_latency(latency_tracker.latest().unwrap_or(0.0));
                    }
                }

                frames.push_next();
            }
        });
        *self.render_thread.lock().unwrap() = Some(handle);
    }
}

fn audio_frame_bytes(frame: &ffmpeg::frame::Audio) -> Vec<u8> {
    frame.data(0).to_vec()
}

/// Converts `src` to interleaved I16 at `sink_channels`/`sink_rate`, sizing
/// the output frame to exactly `wanted` samples so the ±10% syncClocks
/// elasticity lands in the converted audio itself rather than being applied
/// after the fact by duplicating or dropping bytes.
fn resample_to_wanted(
    resampler: &mut Option<Resampler>,
    src: &ffmpeg::frame::Audio,
    wanted: u32,
    sink_channels: u32,
    sink_rate: u32,
) -> anyhow::Result<Vec<u8>> {
    let ctx = resampler
        .as_mut()
        .ok_or_else(|| anyhow::anyhow!("resampler not initialized"))?;
    let target_format = Sample::I16(ffmpeg::util::format::sample::Type::Packed);
    let target_layout = ChannelLayout::default(sink_channels as i32);
    let mut output = ffmpeg::frame::Audio::new(target_format, wanted as usize, target_layout);
    output.set_rate(sink_rate);
    ctx.run(src, &mut output)?;
    let produced = output.samples() * 2 * sink_channels as usize;
    let plane = output.data(0);
    Ok(plane[..produced.min(plane.len())].to_vec())
}

struct AudioDecodeDriver {
    decoder: ffmpeg::decoder::Audio,
    frames: Arc<FrameRing<Frame>>,
    time_base: (i32, i32),
    sample_rate: u32,
    next_pts: Option<f64>,
    start_pts: f64,
    serial: Serial,
}

impl DecodeDriver for AudioDecodeDriver {
    fn receive(&mut self) -> ReceiveOutcome {
        let mut decoded = ffmpeg::frame::Audio::empty();
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
                eprintln!("[audio] send_packet: {e}");
                true
            }
        }
    }

    fn flush_codec_buffers(&mut self) {
        self.decoder.flush();
    }

    fn on_decode_flush_buffers(&mut self) {
        self.next_pts = Some(self.start_pts);
    }
}

impl AudioDecodeDriver {
    fn handle_decoded_frame(&mut self, decoded: ffmpeg::frame::Audio) {
        let (num, den) = self.time_base;
        let nb_samples = decoded.samples() as f64;

        let pts = if let Some(raw) = decoded.timestamp() {
            let rescaled = raw as f64 * num as f64 / den as f64;
            self.next_pts = Some(rescaled + nb_samples / self.sample_rate as f64);
            rescaled
        } else if let Some(next) = self.next_pts {
            self.next_pts = Some(next + nb_samples / self.sample_rate as f64);
            next
        } else {
            0.0
        };

        let duration = nb_samples / self.sample_rate as f64;
        let frame = Frame::audio(decoded, pts, duration, self.serial);
        self.frames.push(frame);
    }
}
