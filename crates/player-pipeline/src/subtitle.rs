// crates/player-pipeline/src/subtitle.rs
//
// Subtitle handler boundary (spec §4.9): two concrete handlers behind one
// operation set, selected per spec's policy (text/SSA-like codec ids go to
// the styled-text handler, everything else to the image handler). Spec §9
// explicitly sanctions a trait here over the source's virtual inheritance
// ("the dispatch is rare... virtual dispatch is fine"), and the teacher's
// own preference for a small trait plus concrete structs (`AudioSink`/
// `VideoSink` in sinks.rs) over a class hierarchy points the same way.

use crate::ass_renderer::AssRenderer;
use player_core::ass_bitmap::{BitmapSection, SubtitleImage};
use player_core::blend::TintColor;
use player_core::{FrameRing, Rect, Serial};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// "Changed" as the layout engine itself reports it (spec §6):
/// 0 = no change, 1 = positions-only, 2 = contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderChanged {
    None,
    PositionsOnly,
    Contents,
}

/// The styled-subtitle layout engine (spec §6) — named only by the
/// interface it exposes. No concrete libass binding is linked here; a real
/// deployment supplies one and the handler below is oblivious to which.
pub trait SubtitleLayoutEngine: Send {
    fn set_frame_size(&mut self, w: i32, h: i32);
    fn set_fonts(&mut self, path: Option<&Path>, family: Option<&str>);
    fn add_font(&mut self, name: &str, bytes: &[u8]);
    fn process_codec_private(&mut self, header: &[u8]);
    fn process_data(&mut self, event_line: &[u8]);
    fn flush_events(&mut self);
    /// Renders the track at `pts_ms`, returning the positioned image list
    /// the library currently holds — these bitmaps are weak references
    /// into the library's own buffer (spec §9) valid only until the next
    /// call, so the handler copies them into an owned `SubtitleImage`
    /// immediately.
    fn render_frame(&mut self, pts_ms: i64) -> (Vec<SubtitleImage>, RenderChanged);
}

/// A decoded subtitle packet, tagged by the codec's reported format
/// (0 = graphics, 1 = text per spec §4.8).
pub enum DecodedSubtitle {
    Text {
        event_line: Vec<u8>,
        codec_private: Option<Vec<u8>>,
    },
    Graphics {
        rects: Vec<GraphicsRect>,
        start_pts: f64,
        end_pts: f64,
    },
}

/// One positioned bitmap rectangle from a graphics (bitmap) subtitle
/// stream, already expanded to RGBA by the decoder/palette step (palette
/// expansion is subtitle-format parsing, out of scope per spec §1).
#[derive(Clone)]
pub struct GraphicsRect {
    pub rect: Rect,
    pub stride: usize,
    pub rgba: Vec<u8>,
}

/// Outcome of [`SubtitleHandler::blend_to_frame`] — mirrors the library's
/// own changed/unchanged contract rather than spec's raw 0/2 integers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendOutcome {
    Unchanged,
    Changed,
}

/// The operation set both concrete handlers implement (spec §4.9).
pub trait SubtitleHandler: Send {
    fn handle_decoded(&mut self, sub: DecodedSubtitle, serial: Serial);
    /// Composites whatever is active at `pts` onto `frame` (stride in
    /// bytes, RGBA). `force` mirrors the layout engine's own "force a
    /// re-render even if unchanged" flag (e.g. after a fresh video frame
    /// size).
    fn blend_to_frame(&mut self, pts: f64, frame: &mut [u8], frame_stride: usize, serial: Serial, force: bool) -> BlendOutcome;
    fn set_default_font(&mut self, path: Option<&Path>, family: Option<&str>);
    fn has_pending(&self) -> bool;
    fn invalidate(&mut self);
    fn flush(&mut self);
}

/// Text/styled handler: feeds decoded text events into the layout engine's
/// track and blends its rendered image list via the bitmap-section engine
/// (spec §4.9, §4.11).
pub struct TextSubtitleHandler {
    engine: Box<dyn SubtitleLayoutEngine>,
    renderer: AssRenderer,
    last_serial: Serial,
    header_sent: bool,
}

impl TextSubtitleHandler {
    pub fn new(engine: Box<dyn SubtitleLayoutEngine>) -> Self {
        Self {
            engine,
            renderer: AssRenderer::new(),
            last_serial: 0,
            header_sent: false,
        }
    }
}

impl SubtitleHandler for TextSubtitleHandler {
    fn handle_decoded(&mut self, sub: DecodedSubtitle, serial: Serial) {
        self.last_serial = serial;
        if let DecodedSubtitle::Text { event_line, codec_private } = sub {
            if !self.header_sent {
                if let Some(header) = codec_private {
                    self.engine.process_codec_private(&header);
                }
                self.header_sent = true;
            }
            self.engine.process_data(&event_line);
        }
    }

    fn blend_to_frame(&mut self, pts: f64, frame: &mut [u8], frame_stride: usize, serial: Serial, force: bool) -> BlendOutcome {
        if serial != self.last_serial {
            return BlendOutcome::Unchanged;
        }
        let pts_ms = (pts * 1000.0).round() as i64;
        let (images, changed) = self.engine.render_frame(pts_ms);
        if changed == RenderChanged::None && !force {
            return BlendOutcome::Unchanged;
        }

        let sections = self.renderer.render(images);
        for section in sections.iter().filter(|s| s.changed) {
            blend_rgba_section(section, frame, frame_stride);
        }
        BlendOutcome::Changed
    }

    fn set_default_font(&mut self, path: Option<&Path>, family: Option<&str>) {
        self.engine.set_fonts(path, family);
    }

    fn has_pending(&self) -> bool {
        false
    }

    fn invalidate(&mut self) {
        self.renderer.invalidate();
    }

    fn flush(&mut self) {
        self.engine.flush_events();
        self.renderer.invalidate();
        self.header_sent = false;
    }
}

/// Straight alpha-over of an already-tinted RGBA buffer onto the
/// destination frame, using the source's own alpha channel as the blend
/// weight. Unlike `player_core::blend::blend_alpha_mask`, which tints a
/// single-channel mask with one color, the section buffer produced by
/// `BitmapSection::flatten` is itself full RGBA (already tinted per
/// contained image), so the "color" here comes from the source pixel, not
/// a shared constant — a second straight-alpha blend, not the masked-tint
/// blend the single-image path uses.
fn blend_rgba_onto(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, width: usize, height: usize) {
    for row in 0..height {
        let src_row = &src[row * src_stride..row * src_stride + width * 4];
        let dst_row = &mut dst[row * dst_stride..row * dst_stride + width * 4];
        for col in 0..width {
            let src_px = &src_row[col * 4..col * 4 + 4];
            let a = src_px[3] as u32;
            let inv = 255 - a;
            let dst_px = &mut dst_row[col * 4..col * 4 + 4];
            dst_px[0] = div255(dst_px[0] as u32 * inv + src_px[0] as u32 * a);
            dst_px[1] = div255(dst_px[1] as u32 * inv + src_px[1] as u32 * a);
            dst_px[2] = div255(dst_px[2] as u32 * inv + src_px[2] as u32 * a);
            dst_px[3] = div255(dst_px[3] as u32 * inv + a * a);
        }
    }
}

#[inline]
fn div255(raw: u32) -> u8 {
    ((raw + 127) / 255) as u8
}

fn blend_rgba_section(section: &BitmapSection, frame: &mut [u8], frame_stride: usize) {
    let width = section.bbox.width();
    let height = section.bbox.height();
    if width <= 0 || height <= 0 {
        return;
    }
    let x_off = section.bbox.x1.max(0) as usize;
    let y_off = section.bbox.y1.max(0) as usize;
    let dst_offset = y_off * frame_stride + x_off * 4;
    if dst_offset >= frame.len() {
        return;
    }
    blend_rgba_onto(&mut frame[dst_offset..], frame_stride, &section.buffer, section.stride, width as usize, height as usize);
}

/// One queued graphics (bitmap) subtitle event awaiting its display window.
struct GraphicsSubFrame {
    end_pts: f64,
    serial: Serial,
    rects: Vec<GraphicsRect>,
}

/// A scaled-to-frame-size rect, cached by source rect identity so repeat
/// blends of the same event don't re-scale every call.
struct CachedRect {
    data: Vec<u8>,
    stride: usize,
    target_w: usize,
    target_h: usize,
    last_used: Instant,
}

/// Image handler: decoded graphics subtitles (e.g. DVD/PGS-style bitmap
/// tracks) queued 16-deep, scaled to the target frame size on first blend
/// and cached thereafter. Cache entries unused for 20s are freed (spec
/// §4.9).
pub struct ImageSubtitleHandler {
    queue: FrameRing<GraphicsSubFrame>,
    cache: HashMap<usize, CachedRect>,
    default_font: Option<PathBuf>,
}

impl ImageSubtitleHandler {
    const CACHE_TTL: Duration = Duration::from_secs(20);

    pub fn new() -> Self {
        Self {
            queue: FrameRing::new(16, false),
            cache: HashMap::new(),
            default_font: None,
        }
    }

    fn evict_stale_cache_entries(&mut self) {
        let now = Instant::now();
        self.cache.retain(|_, entry| now.duration_since(entry.last_used) < Self::CACHE_TTL);
    }

    /// Scales `rect` to `(target_w, target_h)`, reusing a cached copy keyed
    /// by `idx` (the rect's position within the current event) when the
    /// target size hasn't changed.
    fn scale_rect(&mut self, idx: usize, rect: &GraphicsRect, target_w: usize, target_h: usize) -> (Vec<u8>, usize) {
        if let Some(cached) = self.cache.get_mut(&idx) {
            if cached.target_w == target_w && cached.target_h == target_h {
                cached.last_used = Instant::now();
                return (cached.data.clone(), cached.stride);
            }
        }
        let (data, stride) = nearest_scale_rgba(
            &rect.rgba,
            rect.stride,
            rect.rect.width() as usize,
            rect.rect.height() as usize,
            target_w,
            target_h,
        );
        self.cache.insert(
            idx,
            CachedRect {
                data: data.clone(),
                stride,
                target_w,
                target_h,
                last_used: Instant::now(),
            },
        );
        (data, stride)
    }
}

impl Default for ImageSubtitleHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Nearest-neighbor scale of an RGBA buffer — the scalar reference path
/// the external scaler would otherwise provide; graphics subtitle rects
/// are typically close to display size already, and nearest-neighbor
/// (rather than the bilinear the video path uses) avoids softening the
/// hard edges bitmap-subtitle fonts tend to have.
fn nearest_scale_rgba(src: &[u8], src_stride: usize, src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> (Vec<u8>, usize) {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return (Vec::new(), 0);
    }
    let dst_stride = dst_w * 4;
    let mut out = vec![0u8; dst_stride * dst_h];
    for y in 0..dst_h {
        let sy = (y * src_h / dst_h).min(src_h - 1);
        for x in 0..dst_w {
            let sx = (x * src_w / dst_w).min(src_w - 1);
            let src_off = sy * src_stride + sx * 4;
            let dst_off = y * dst_stride + x * 4;
            out[dst_off..dst_off + 4].copy_from_slice(&src[src_off..src_off + 4]);
        }
    }
    (out, dst_stride)
}

impl SubtitleHandler for ImageSubtitleHandler {
    fn handle_decoded(&mut self, sub: DecodedSubtitle, serial: Serial) {
        if let DecodedSubtitle::Graphics { rects, end_pts, .. } = sub {
            self.queue.push(GraphicsSubFrame { end_pts, serial, rects });
        }
    }

    fn blend_to_frame(&mut self, pts: f64, frame: &mut [u8], frame_stride: usize, serial: Serial, _force: bool) -> BlendOutcome {
        self.evict_stale_cache_entries();

        // Drop any event whose serial mismatches or whose display window
        // has already passed; stop at the first one still live.
        loop {
            if self.queue.num_remaining() == 0 {
                return BlendOutcome::Unchanged;
            }
            let stale = self.queue.with_first(|f| f.serial != serial || f.end_pts <= pts).unwrap_or(true);
            if !stale {
                break;
            }
            self.queue.push_next();
        }

        let target_w = frame_stride / 4;
        let target_h = frame.len() / frame_stride.max(1);
        let mut blended_any = false;

        // Clone the current event's rect list out from under the queue's
        // lock window so scale/blend (which needs `&mut self`) isn't
        // racing the queue's own internal borrow.
        let rects: Vec<GraphicsRect> = self.queue.with_first(|f| f.rects.clone()).unwrap_or_default();
        for (idx, rect) in rects.iter().enumerate() {
            let (scaled, stride) = self.scale_rect(idx, rect, target_w, target_h);
            if stride == 0 {
                continue;
            }
            let dst_off = rect.rect.y1.max(0) as usize * frame_stride + rect.rect.x1.max(0) as usize * 4;
            if dst_off >= frame.len() {
                continue;
            }
            blend_rgba_onto(&mut frame[dst_off..], frame_stride, &scaled, stride, rect.rect.width() as usize, rect.rect.height() as usize);
            blended_any = true;
        }

        if blended_any {
            BlendOutcome::Changed
        } else {
            BlendOutcome::Unchanged
        }
    }

    fn set_default_font(&mut self, path: Option<&Path>, _family: Option<&str>) {
        self.default_font = path.map(|p| p.to_path_buf());
    }

    fn has_pending(&self) -> bool {
        self.queue.num_remaining() > 0
    }

    fn invalidate(&mut self) {
        self.cache.clear();
    }

    fn flush(&mut self) {
        self.queue = FrameRing::new(16, false);
        self.cache.clear();
    }
}

/// No-op layout engine: renders nothing, reports no change. Exists so a
/// text subtitle stream can be wired up before a host supplies its own
/// libass-style engine binding, without making the engine slot optional
/// throughout the handler.
#[derive(Default)]
pub struct NullLayoutEngine;

impl SubtitleLayoutEngine for NullLayoutEngine {
    fn set_frame_size(&mut self, _w: i32, _h: i32) {}
    fn set_fonts(&mut self, _path: Option<&Path>, _family: Option<&str>) {}
    fn add_font(&mut self, _name: &str, _bytes: &[u8]) {}
    fn process_codec_private(&mut self, _header: &[u8]) {}
    fn process_data(&mut self, _event_line: &[u8]) {}
    fn flush_events(&mut self) {}
    fn render_frame(&mut self, _pts_ms: i64) -> (Vec<SubtitleImage>, RenderChanged) {
        (Vec::new(), RenderChanged::None)
    }
}

/// Picks the handler for a decoded subtitle stream's codec id — text/SSA-
/// like codecs get the styled-text handler, everything else (bitmap
/// formats) gets the image handler (spec §4.9's "Policy for choosing a
/// handler").
pub fn is_text_subtitle_codec(codec_name: &str) -> bool {
    matches!(codec_name, "ass" | "ssa" | "subrip" | "srt" | "webvtt" | "text" | "mov_text")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeEngine {
        next_images: Vec<SubtitleImage>,
        next_changed: RenderChanged,
    }

    impl SubtitleLayoutEngine for FakeEngine {
        fn set_frame_size(&mut self, _w: i32, _h: i32) {}
        fn set_fonts(&mut self, _path: Option<&Path>, _family: Option<&str>) {}
        fn add_font(&mut self, _name: &str, _bytes: &[u8]) {}
        fn process_codec_private(&mut self, _header: &[u8]) {}
        fn process_data(&mut self, _event_line: &[u8]) {}
        fn flush_events(&mut self) {}
        fn render_frame(&mut self, _pts_ms: i64) -> (Vec<SubtitleImage>, RenderChanged) {
            (self.next_images.clone(), self.next_changed)
        }
    }

    fn image(x1: i32, y1: i32, x2: i32, y2: i32) -> SubtitleImage {
        let w = (x2 - x1) as usize;
        let h = (y2 - y1) as usize;
        SubtitleImage {
            rect: Rect::new(x1, y1, x2, y2),
            stride: w,
            color: TintColor::new(255, 0, 0, 255),
            bitmap: vec![0xFFu8; w * h],
        }
    }

    #[test]
    fn text_handler_reports_unchanged_when_engine_reports_no_change() {
        let engine = FakeEngine { next_images: vec![], next_changed: RenderChanged::None };
        let mut handler = TextSubtitleHandler::new(Box::new(engine));
        handler.handle_decoded(DecodedSubtitle::Text { event_line: b"hello".to_vec(), codec_private: None }, 1);
        let mut frame = vec![0u8; 16 * 16 * 4];
        let outcome = handler.blend_to_frame(1.0, &mut frame, 16 * 4, 1, false);
        assert_eq!(outcome, BlendOutcome::Unchanged);
    }

    #[test]
    fn text_handler_blends_and_reports_changed() {
        let engine = FakeEngine { next_images: vec![image(0, 0, 8, 8)], next_changed: RenderChanged::Contents };
        let mut handler = TextSubtitleHandler::new(Box::new(engine));
        handler.handle_decoded(DecodedSubtitle::Text { event_line: b"hello".to_vec(), codec_private: None }, 1);
        let mut frame = vec![0x80u8; 16 * 16 * 4];
        let outcome = handler.blend_to_frame(1.0, &mut frame, 16 * 4, 1, false);
        assert_eq!(outcome, BlendOutcome::Changed);
        // Top-left pixel under the subtitle bbox should have been tinted red.
        assert!(frame[0] > frame[1]);
    }

    #[test]
    fn text_handler_discards_frames_from_a_stale_serial() {
        let engine = FakeEngine { next_images: vec![image(0, 0, 8, 8)], next_changed: RenderChanged::Contents };
        let mut handler = TextSubtitleHandler::new(Box::new(engine));
        handler.handle_decoded(DecodedSubtitle::Text { event_line: b"hello".to_vec(), codec_private: None }, 1);
        let mut frame = vec![0u8; 16 * 16 * 4];
        let outcome = handler.blend_to_frame(1.0, &mut frame, 16 * 4, 2, false);
        assert_eq!(outcome, BlendOutcome::Unchanged);
    }

    #[test]
    fn image_handler_drops_expired_events_and_keeps_current() {
        let mut handler = ImageSubtitleHandler::new();
        handler.handle_decoded(
            DecodedSubtitle::Graphics {
                rects: vec![GraphicsRect { rect: Rect::new(0, 0, 4, 4), stride: 16, rgba: vec![0xFFu8; 4 * 4 * 4] }],
                start_pts: 0.0,
                end_pts: 1.0,
            },
            1,
        );
        handler.handle_decoded(
            DecodedSubtitle::Graphics {
                rects: vec![GraphicsRect { rect: Rect::new(0, 0, 4, 4), stride: 16, rgba: vec![0xFFu8; 4 * 4 * 4] }],
                start_pts: 2.0,
                end_pts: 3.0,
            },
            1,
        );
        let mut frame = vec![0u8; 16 * 16 * 4];
        // pts=2.5 is past the first event's end and within the second's window.
        let outcome = handler.blend_to_frame(2.5, &mut frame, 16 * 4, 1, false);
        assert_eq!(outcome, BlendOutcome::Changed);
    }

    #[test]
    fn image_handler_codec_selection_policy() {
        assert!(is_text_subtitle_codec("ass"));
        assert!(is_text_subtitle_codec("subrip"));
        assert!(!is_text_subtitle_codec("hdmv_pgs_subtitle"));
        assert!(!is_text_subtitle_codec("dvd_subtitle"));
    }
}
