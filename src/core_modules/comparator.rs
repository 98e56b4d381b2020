// THEORY:
// The `FrameComparator` is the measuring instrument of the engine. Given the
// reference frame, the latest frame and a region mask, it produces one number per
// criterion, each on the 0..=100 scale. It makes no decisions; thresholds live in
// the `DetectionPolicy`.
//
// Key architectural principles & algorithm steps:
// 1.  **Mask first**: The region mask is resolved once per comparison into a
//     per-pixel boolean grid. Pixel centers are mapped into percent space
//     (`(x + 0.5) / width * 100`) before testing region membership, so regions
//     keep their meaning across frame sizes.
// 2.  **Pixel ratio**: A considered pixel is "changed" when its channel delta
//     exceeds `765 * sensitivity / 100`. The ratio is changed / considered.
// 3.  **Color-block ratio**: The frame is tiled into `block_size` squares. Each
//     block pools its considered pixels into a `Chunk`, and the block is "changed"
//     when the delta of the two block averages exceeds the same cutoff. The ratio
//     is the share of considered pixels living in changed blocks, so it grows with
//     both the magnitude and the area of a color shift.
// 4.  **Text confidence**: Delegated to a `TextChangeProbe`. Without one wired in,
//     `NoTextProbe` reports 0 and the text criterion can never fire.
// 5.  **No division by zero**: When the mask considers no pixel at all, every ratio
//     is 0. An empty mask never produces a spurious alert.

use std::sync::Arc;

use crate::core_modules::chunk::chunk::Chunk;
use crate::core_modules::frame::Frame;
use crate::core_modules::percent::{Percent, clamp_percent};
use crate::core_modules::pixel::pixel::MAX_CHANNEL_DELTA;
use crate::core_modules::policy::Criterion;
use crate::core_modules::region::RegionMask;
use crate::error::Result;

/// Default edge length, in pixels, of a color block.
pub const DEFAULT_BLOCK_SIZE: u32 = 8;

/// Raw per-criterion measurements for one frame pair, all in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChangeMetrics {
    /// Percentage of considered pixels whose channel delta exceeded the cutoff.
    pub pixel_ratio: f64,
    /// Percentage of considered area lying in changed color blocks.
    pub color_block_ratio: f64,
    /// Confidence that textual content changed.
    pub text_confidence: f64,
    /// How many pixels the region mask let through.
    pub considered_pixels: usize,
}

impl ChangeMetrics {
    pub fn metric(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::Pixel => self.pixel_ratio,
            Criterion::Color => self.color_block_ratio,
            Criterion::Text => self.text_confidence,
        }
    }
}

/// External recognizer for text content changes.
pub trait TextChangeProbe: Send + Sync {
    /// Confidence, in percent, that the text inside the mask differs between frames.
    fn confidence(&self, reference: &Frame, current: &Frame, mask: &RegionMask) -> f64;
}

/// Stand-in probe used when no recognizer is wired: always 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTextProbe;

impl TextChangeProbe for NoTextProbe {
    fn confidence(&self, _reference: &Frame, _current: &Frame, _mask: &RegionMask) -> f64 {
        0.0
    }
}

/// Computes change metrics for pairs of equally sized frames.
#[derive(Clone)]
pub struct FrameComparator {
    block_size: u32,
    text_probe: Arc<dyn TextChangeProbe>,
}

impl Default for FrameComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameComparator")
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

impl FrameComparator {
    pub fn new() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            text_probe: Arc::new(NoTextProbe),
        }
    }

    /// Sets the color-block edge length. Zero is treated as one.
    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    pub fn with_text_probe(mut self, probe: Arc<dyn TextChangeProbe>) -> Self {
        self.text_probe = probe;
        self
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Measures how much `current` differs from `reference` inside `mask`.
    ///
    /// Fails with `DimensionMismatch` when the frames differ in size.
    pub fn compare(
        &self,
        reference: &Frame,
        current: &Frame,
        mask: &RegionMask,
        sensitivity: Percent,
    ) -> Result<ChangeMetrics> {
        reference.ensure_same_dimensions(current)?;

        let considered = consideration_grid(reference.width(), reference.height(), mask);
        let considered_pixels = match &considered {
            Some(grid) => grid.iter().filter(|&&inside| inside).count(),
            None => reference.pixel_count(),
        };
        if considered_pixels == 0 {
            return Ok(ChangeMetrics::default());
        }

        let cutoff = MAX_CHANNEL_DELTA as f64 * sensitivity.fraction();
        let is_considered = |x: u32, y: u32| match &considered {
            Some(grid) => grid[y as usize * reference.width() as usize + x as usize],
            None => true,
        };

        let changed_pixels = self.count_changed_pixels(reference, current, cutoff, &is_considered);
        let changed_block_area = self.changed_block_area(reference, current, cutoff, &is_considered);

        Ok(ChangeMetrics {
            pixel_ratio: ratio(changed_pixels, considered_pixels),
            color_block_ratio: ratio(changed_block_area, considered_pixels),
            text_confidence: clamp_percent(self.text_probe.confidence(reference, current, mask)),
            considered_pixels,
        })
    }

    fn count_changed_pixels(
        &self,
        reference: &Frame,
        current: &Frame,
        cutoff: f64,
        is_considered: &impl Fn(u32, u32) -> bool,
    ) -> usize {
        let mut changed = 0;
        for y in 0..reference.height() {
            for x in 0..reference.width() {
                if !is_considered(x, y) {
                    continue;
                }
                let delta = reference.pixel_at(x, y).channel_delta(&current.pixel_at(x, y));
                if delta as f64 > cutoff {
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Number of considered pixels that belong to a changed block.
    fn changed_block_area(
        &self,
        reference: &Frame,
        current: &Frame,
        cutoff: f64,
        is_considered: &impl Fn(u32, u32) -> bool,
    ) -> usize {
        let block = self.block_size;
        let capacity = (block as usize * block as usize).min(reference.pixel_count());
        let mut area = 0;

        for block_y in (0..reference.height()).step_by(block as usize) {
            for block_x in (0..reference.width()).step_by(block as usize) {
                let mut before = Chunk::with_capacity(capacity);
                let mut after = Chunk::with_capacity(capacity);

                let y_end = block_y.saturating_add(block).min(reference.height());
                let x_end = block_x.saturating_add(block).min(reference.width());
                for y in block_y..y_end {
                    for x in block_x..x_end {
                        if is_considered(x, y) {
                            before.push(reference.pixel_at(x, y));
                            after.push(current.pixel_at(x, y));
                        }
                    }
                }

                if before.is_empty() {
                    continue;
                }
                let delta = before.average_pixel().channel_delta(&after.average_pixel());
                if delta as f64 > cutoff {
                    area += before.len();
                }
            }
        }
        area
    }
}

/// Resolves a mask into a row-major grid of "considered" flags.
/// `None` means every pixel is considered.
fn consideration_grid(width: u32, height: u32, mask: &RegionMask) -> Option<Vec<bool>> {
    let regions = match mask {
        RegionMask::WholeFrame => return None,
        RegionMask::Regions(regions) => regions,
    };

    let to_percent = |index: u32, extent: u32| (index as f64 + 0.5) / extent as f64 * 100.0;
    let mut grid = vec![false; width as usize * height as usize];
    for y in 0..height {
        let py = to_percent(y, height);
        for x in 0..width {
            let px = to_percent(x, width);
            grid[y as usize * width as usize + x as usize] =
                regions.iter().any(|region| region.contains(px, py));
        }
    }
    Some(grid)
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
