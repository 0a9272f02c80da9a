// crates/player-pipeline/src/yuv.rs
//
// Thin wrapper around ffmpeg-the-third's software scaler for YUV->RGBA,
// with the 16->8 bit reduction step (player_core::bitdepth) run first for
// high-bit-depth planar sources. Grounded in the teacher's `LiveDecoder`,
// which builds one `SwsContext` per open and reuses it across frames
// rather than re-deriving the conversion plan every call.

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use player_core::bitdepth::{self, BitDepth};

pub struct YuvConverter {
    scaler: SwsContext,
}

impl YuvConverter {
    pub fn new(
        src_format: Pixel,
        src_w: u32,
        src_h: u32,
        dst_w: u32,
        dst_h: u32,
    ) -> anyhow::Result<Self> {
        let scaler = SwsContext::get(src_format, src_w, src_h, Pixel::RGBA, dst_w, dst_h, Flags::BILINEAR)?;
        Ok(Self { scaler })
    }

    /// Fast path for already-8-bit I444 (and any other format the scaler
    /// accepts directly): hand the frame straight to the scaler.
    pub fn convert(&mut self, src: &ffmpeg::frame::Video, dst: &mut ffmpeg::frame::Video) -> anyhow::Result<()> {
        self.scaler.run(src, dst)?;
        Ok(())
    }
}

/// Reduces a single plane of a high-bit-depth planar frame to 8 bits in
/// place into `dst`, using the rounding reducer rather than ffmpeg's own
/// (unrounded) format conversion, then the caller feeds `dst` through the
/// ordinary 8-bit scaler path.
pub fn reduce_plane_to_8bit(
    src: &[u8],
    src_stride_bytes: usize,
    dst: &mut [u8],
    dst_stride_bytes: usize,
    width: usize,
    height: usize,
    depth: BitDepth,
    big_endian: bool,
) {
    // Reinterpret the byte plane as u16 samples; ffmpeg packs high-bit-depth
    // planar samples two bytes per sample regardless of the true bit count.
    let src_u16: Vec<u16> = src
        .chunks_exact(2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
        .collect();
    let src_stride_samples = src_stride_bytes / 2;
    bitdepth::reduce_plane(
        &src_u16,
        src_stride_samples,
        dst,
        dst_stride_bytes,
        width,
        height,
        depth,
        big_endian,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_plane_to_8bit_matches_bitdepth_reference() {
        let width = 2;
        let height = 2;
        let src_stride_samples = 2;
        let samples: [u16; 4] = [512, 1023, 0, 300];
        let mut src_bytes = Vec::new();
        for s in samples {
            src_bytes.extend_from_slice(&s.to_ne_bytes());
        }
        let mut dst = [0u8; 4];
        reduce_plane_to_8bit(
            &src_bytes,
            src_stride_samples * 2,
            &mut dst,
            width,
            width,
            height,
            BitDepth::Ten,
            false,
        );
        assert_eq!(dst[0], bitdepth::reduce_sample(512, BitDepth::Ten, false));
        assert_eq!(dst[1], bitdepth::reduce_sample(1023, BitDepth::Ten, false));
        assert_eq!(dst[2], bitdepth::reduce_sample(0, BitDepth::Ten, false));
        assert_eq!(dst[3], bitdepth::reduce_sample(300, BitDepth::Ten, false));
    }
}
