// crates/player-pipeline/src/ass_renderer.rs
//
// Owns the double-buffered bitmap-section state across text-subtitle
// render calls (spec §4.11's per-frame grouping protocol): group the
// layout engine's image list into sections, reconcile against the
// previous frame's sections to reuse unchanged buffers, flatten whatever
// changed, and swap in the result as the new "previous". Spec §5 calls
// out that this double buffer is "swapped under the text handler's
// renderer mutex" — `previous` below is that mutex.

use player_core::ass_bitmap::{group_images, reconcile_and_flatten, BitmapSection, SubtitleImage};
use std::sync::Mutex;

pub struct AssRenderer {
    previous: Mutex<Vec<BitmapSection>>,
}

impl Default for AssRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl AssRenderer {
    pub fn new() -> Self {
        Self {
            previous: Mutex::new(Vec::new()),
        }
    }

    /// Runs one frame of the grouping protocol and returns the resulting
    /// section list — callers blend every section with `changed == true`
    /// and may skip the rest.
    pub fn render(&self, images: Vec<SubtitleImage>) -> Vec<BitmapSection> {
        let current = group_images(images);
        let mut previous = self.previous.lock().unwrap();
        let reconciled = reconcile_and_flatten(current, std::mem::take(&mut previous));
        *previous = reconciled.clone();
        reconciled
    }

    /// Drops the previous-frame section list so the next `render` call
    /// treats every section as changed — used after a seek or a
    /// frame-size change, where the old sections no longer mean anything.
    pub fn invalidate(&self) {
        self.previous.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use player_core::blend::TintColor;
    use player_core::Rect;

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

    #[test]
    fn second_identical_frame_reuses_buffers_unchanged() {
        let r = AssRenderer::new();
        let first = r.render(vec![image(0, 0, 8, 8)]);
        assert!(first[0].changed);

        let second = r.render(vec![image(0, 0, 8, 8)]);
        assert!(!second[0].changed);
        assert_eq!(second[0].buffer, first[0].buffer);
    }

    #[test]
    fn invalidate_forces_next_frame_to_be_marked_changed() {
        let r = AssRenderer::new();
        r.render(vec![image(0, 0, 8, 8)]);
        r.invalidate();
        let again = r.render(vec![image(0, 0, 8, 8)]);
        assert!(again[0].changed);
    }
}
