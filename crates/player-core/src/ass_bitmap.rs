// crates/player-core/src/ass_bitmap.rs
//
// The "bitmap-section" engine. Groups overlapping styled-
// subtitle image rectangles into larger non-overlapping boxes, flattens
// each group into one contiguous RGBA buffer, and diffs against the
// previous frame's groups so a downstream consumer can skip re-blending
// boxes that didn't change.
//
// Grounded in VPlayerLibrary2's `ASSBitmap` (add/overlaps/flattenImage/
// compare) — this module keeps the same operation names and the same
// `compare` return-value contract (0 identical, 1 positions-only, 2
// anything else).

use crate::blend::{blend_alpha_mask, TintColor};
use crate::helpers::geometry::{pad_to_lane, Rect};

/// One positioned, styled subtitle bitmap as the layout engine hands it
/// back — a thin, owned copy (the library's own buffers are weak/borrowed
/// and only valid until the next render call).
#[derive(Clone, Debug, PartialEq)]
pub struct SubtitleImage {
    pub rect: Rect,
    pub stride: usize,
    pub color: TintColor,
    pub bitmap: Vec<u8>,
}

impl SubtitleImage {
    pub fn width(&self) -> usize {
        self.rect.width().max(0) as usize
    }

    pub fn height(&self) -> usize {
        self.rect.height().max(0) as usize
    }
}

/// Result of [`BitmapSection::compare`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectionDiff {
    /// Identical — the flattened buffer can be reused as-is.
    Identical = 0,
    /// Only image positions moved; contents are pixel-identical.
    PositionsOnly = 1,
    /// Image count, bounding box, size, color, or bitmap differs — must
    /// re-flatten.
    Changed = 2,
}

/// A group of overlapping subtitle images flattened into one RGBA buffer.
#[derive(Clone)]
pub struct BitmapSection {
    pub bbox: Rect,
    pub images: Vec<SubtitleImage>,
    pub buffer: Vec<u8>,
    pub stride: usize,
    pub changed: bool,
    buffer_capacity: usize,
}

impl Default for BitmapSection {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapSection {
    pub fn new() -> Self {
        Self {
            bbox: Rect::default(),
            images: Vec::new(),
            buffer: Vec::new(),
            stride: 0,
            changed: false,
            buffer_capacity: 0,
        }
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.bbox = Rect::default();
        self.stride = 0;
        self.changed = false;
    }

    /// True if `image`'s rect intersects this section's current bounding
    /// box. Only meaningful once at least one image has been added.
    pub fn overlaps(&self, image: &SubtitleImage) -> bool {
        self.bbox.overlaps(&image.rect)
    }

    /// Extends the bounding box to cover `image` and appends it to this
    /// section's image list.
    pub fn add(&mut self, image: SubtitleImage) {
        self.bbox = if self.images.is_empty() {
            image.rect
        } else {
            self.bbox.union(&image.rect)
        };
        self.images.push(image);
        self.changed = true;
    }

    /// Flattens every contained image into `self.buffer`, padding the width
    /// to an 8-pixel lane so SIMD blending can always load a full lane. A
    /// no-op if the bounding box is empty.
    pub fn flatten(&mut self) {
        let width = self.bbox.width().max(0) as usize;
        let height = self.bbox.height().max(0) as usize;
        if width == 0 || height == 0 {
            self.stride = 0;
            self.buffer.clear();
            return;
        }

        let padded_width = pad_to_lane(width as i32, 8) as usize;
        self.stride = padded_width * 4;
        let size = self.stride * height;

        if size > self.buffer_capacity {
            self.buffer = vec![0u8; size];
            self.buffer_capacity = size;
        } else {
            self.buffer.truncate(size);
            self.buffer.iter_mut().for_each(|b| *b = 0);
        }

        for image in &self.images {
            let x_offset = (image.rect.x1 - self.bbox.x1) as usize;
            let y_offset = (image.rect.y1 - self.bbox.y1) as usize;
            let dst_offset = x_offset * 4 + y_offset * self.stride;
            blend_alpha_mask(
                &mut self.buffer[dst_offset..],
                self.stride,
                &image.bitmap,
                image.stride,
                image.color,
                image.width(),
                image.height(),
            );
        }
    }

    /// Compares this section against `other`, returning the coarsest
    /// difference found across every contained image. Image lists are
    /// compared positionally — the caller is
    /// responsible for grouping images into sections deterministically so
    /// position `i` in both lists refers to "the same" subtitle event.
    ///
    /// Only the image *count* gates the section as wholesale `Changed`; the
    /// bounding box is derived from image positions, so a uniform position
    /// shift (every image moved together) legitimately changes `bbox`
    /// without the section's contents being anything but "moved" — that is
    /// exactly `PositionsOnly`, not `Changed`: moving one image yields
    /// `compare == 1`, not `2`, even though its bbox moves with it.
    pub fn compare(&self, other: &BitmapSection) -> SectionDiff {
        if self.images.len() != other.images.len() {
            return SectionDiff::Changed;
        }
        let mut worst = SectionDiff::Identical;
        for (a, b) in self.images.iter().zip(other.images.iter()) {
            let d = compare_images(a, b);
            if d == SectionDiff::Changed {
                return SectionDiff::Changed;
            }
            worst = worst.max(d);
        }
        worst
    }
}

fn compare_images(a: &SubtitleImage, b: &SubtitleImage) -> SectionDiff {
    if a.width() != b.width()
        || a.height() != b.height()
        || a.stride != b.stride
        || a.color != b.color
        || a.bitmap != b.bitmap
    {
        return SectionDiff::Changed;
    }
    if a.rect.x1 != b.rect.x1 || a.rect.y1 != b.rect.y1 {
        return SectionDiff::PositionsOnly;
    }
    SectionDiff::Identical
}

/// Groups `images` into non-overlapping sections: seeds the first section
/// with the first image, then for each subsequent image finds the first
/// existing section whose bounding box overlaps and adds to it, or starts a
/// new section.
pub fn group_images(images: Vec<SubtitleImage>) -> Vec<BitmapSection> {
    let mut sections: Vec<BitmapSection> = Vec::new();
    for image in images {
        let target = sections.iter_mut().find(|s| s.overlaps(&image));
        match target {
            Some(section) => section.add(image),
            None => {
                let mut section = BitmapSection::new();
                section.add(image);
                sections.push(section);
            }
        }
    }
    sections
}

/// Per-frame double-buffering protocol: matches
/// each section in `current` against an equal (`compare == Identical`)
/// section in `previous`, reusing its buffer and marking both unchanged;
/// any `previous` section with no match is appended to `current` marked
/// `changed` (so the caller knows to clear that area); finally every
/// `changed` section is flattened. Returns the new "current" list — the
/// caller swaps it in as `previous` for the next frame.
pub fn reconcile_and_flatten(
    mut current: Vec<BitmapSection>,
    previous: Vec<BitmapSection>,
) -> Vec<BitmapSection> {
    let mut previous = previous;
    for section in current.iter_mut() {
        if let Some(pos) = previous
            .iter()
            .position(|p| section.compare(p) == SectionDiff::Identical)
        {
            let matched = previous.remove(pos);
            section.buffer = matched.buffer;
            section.stride = matched.stride;
            section.changed = false;
        }
    }
    // Leftover previous sections occupied screen area nothing in `current`
    // claims anymore; keep them around (marked changed) purely so the
    // caller can clear their bounding box — they carry no images.
    for mut stale in previous {
        stale.changed = true;
        stale.images.clear();
        current.push(stale);
    }
    for section in current.iter_mut() {
        if section.changed {
            section.flatten();
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(x1: i32, y1: i32, x2: i32, y2: i32) -> SubtitleImage {
        let w = (x2 - x1) as usize;
        let h = (y2 - y1) as usize;
        SubtitleImage {
            rect: Rect::new(x1, y1, x2, y2),
            stride: w,
            color: TintColor::new(255, 255, 255, 255),
            bitmap: vec![0xFFu8; w * h],
        }
    }

    // S6: A=(0,0,10,10), B=(5,5,15,15), C=(100,100,110,110).
    #[test]
    fn s6_bitmap_section_grouping() {
        let images = vec![image(0, 0, 10, 10), image(5, 5, 15, 15), image(100, 100, 110, 110)];
        let sections = group_images(images);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].bbox, Rect::new(0, 0, 15, 15));
        assert_eq!(sections[0].images.len(), 2);
        assert_eq!(sections[1].bbox, Rect::new(100, 100, 110, 110));
        assert_eq!(sections[1].images.len(), 1);
    }

    #[test]
    fn s6_identical_later_list_compares_equal() {
        let images = vec![image(0, 0, 10, 10), image(5, 5, 15, 15), image(100, 100, 110, 110)];
        let a = group_images(images.clone());
        let b = group_images(images);
        assert_eq!(a[0].compare(&b[0]), SectionDiff::Identical);
        assert_eq!(a[1].compare(&b[1]), SectionDiff::Identical);
    }

    #[test]
    fn s6_moved_image_is_positions_only() {
        let images_a = vec![image(100, 100, 110, 110)];
        let images_b = vec![image(101, 100, 111, 110)];
        let a = group_images(images_a);
        let b = group_images(images_b);
        assert_eq!(a[0].compare(&b[0]), SectionDiff::PositionsOnly);
    }

    // Property 5: adding one non-overlapping rect marks exactly one new
    // section changed; all others unchanged.
    #[test]
    fn property5_single_added_rect_only_marks_one_section_changed() {
        let initial = vec![image(0, 0, 10, 10), image(100, 100, 110, 110)];
        let mut prev = group_images(initial.clone());
        for s in prev.iter_mut() {
            s.flatten();
            s.changed = false;
        }

        let mut next_images = initial;
        next_images.push(image(200, 200, 210, 210));
        let next = group_images(next_images);

        let reconciled = reconcile_and_flatten(next, prev);
        let changed_count = reconciled.iter().filter(|s| s.changed).count();
        assert_eq!(changed_count, 1);
        assert_eq!(reconciled.len(), 3);
    }

    #[test]
    fn flatten_pads_width_to_eight_pixel_lane() {
        let mut section = BitmapSection::new();
        section.add(image(0, 0, 3, 2)); // width 3 -> pads to 8
        section.flatten();
        assert_eq!(section.stride, 8 * 4);
        assert_eq!(section.buffer.len(), 8 * 4 * 2);
    }

    #[test]
    fn unchanged_section_reuses_previous_buffer_without_reflatten() {
        let mut prev_section = BitmapSection::new();
        prev_section.add(image(0, 0, 8, 8));
        prev_section.flatten();
        let original_buffer = prev_section.buffer.clone();
        prev_section.changed = false;

        let mut next_section = BitmapSection::new();
        next_section.add(image(0, 0, 8, 8));

        let reconciled = reconcile_and_flatten(vec![next_section], vec![prev_section]);
        assert!(!reconciled[0].changed);
        assert_eq!(reconciled[0].buffer, original_buffer);
    }
}
