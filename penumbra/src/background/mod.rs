//! Sky background estimation.
//!
//! The image is divided into square boxes; each box gets a sigma-clipped
//! median (level) and MAD-derived sigma (rms) from its unexcluded pixels. The
//! box grid is median-filtered and bilinearly interpolated between box
//! centres to give full-resolution level and rms maps.

#[cfg(test)]
mod tests;

use common::Buffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::image::Image;
use crate::math::{median_f32_mut, sigma_clipped_median_mad};

// ============================================================================
// Constants
// ============================================================================

const SIGMA_CLIP_ITERATIONS: usize = 2;

const ROWS_PER_CHUNK: usize = 8;

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackgroundConfig {
    /// Side of the square statistics boxes, in pixels.
    pub box_size: usize,
    /// Median-filter window over the box grid, as a fraction of `box_size`.
    /// The window in boxes is `max(1, floor(filter_fraction * box_size))`,
    /// rounded up to odd.
    pub filter_fraction: f32,
    /// Boxes with fewer usable pixels than this fraction are interpolated
    /// from their neighbours.
    pub min_valid_fraction: f32,
    /// Clipping threshold in units of sigma.
    pub clip_kappa: f32,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            box_size: 128,
            filter_fraction: 0.5,
            min_valid_fraction: 0.5,
            clip_kappa: 3.0,
        }
    }
}

impl BackgroundConfig {
    pub fn with_box_size(box_size: usize) -> Self {
        Self {
            box_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.box_size < 1 {
            return Err(Error::invalid("box_size", "must be >= 1"));
        }
        if !(self.filter_fraction.is_finite() && self.filter_fraction >= 0.0) {
            return Err(Error::invalid(
                "filter_fraction",
                format!("must be finite and >= 0, got {}", self.filter_fraction),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_valid_fraction) {
            return Err(Error::invalid(
                "min_valid_fraction",
                format!("must be within [0, 1], got {}", self.min_valid_fraction),
            ));
        }
        if !(self.clip_kappa.is_finite() && self.clip_kappa > 0.0) {
            return Err(Error::invalid(
                "clip_kappa",
                format!("must be > 0, got {}", self.clip_kappa),
            ));
        }
        Ok(())
    }

    /// Median-filter window over the box grid, always odd.
    pub fn filter_boxes(&self) -> usize {
        let boxes = ((self.filter_fraction * self.box_size as f32).floor() as usize).max(1);
        if boxes % 2 == 0 {
            boxes + 1
        } else {
            boxes
        }
    }
}

// ============================================================================
// Background model
// ============================================================================

/// Smooth sky level and rms, at box and at full resolution.
#[derive(Debug, Clone)]
pub struct Background {
    pub level: Buffer2<f32>,
    pub rms: Buffer2<f32>,
    box_level: Buffer2<f32>,
    box_rms: Buffer2<f32>,
    /// Median of the filtered box levels.
    pub global_level: f32,
    /// Median of the filtered box rms values.
    pub global_rms: f32,
}

#[derive(Clone, Copy, Debug, Default)]
struct BoxStats {
    level: f32,
    rms: f32,
    valid: bool,
}

impl Background {
    /// Estimate the background of `image`, ignoring pixels where `exclude` is true.
    pub fn estimate(
        image: &Image,
        exclude: Option<&Buffer2<bool>>,
        config: &BackgroundConfig,
    ) -> Result<Background> {
        config.validate()?;
        if let Some(exclude) = exclude {
            image.check_shape("background exclusion mask", exclude)?;
        }

        let (width, height) = image.shape();
        if width == 0 || height == 0 {
            return Err(Error::invalid("image", "cannot estimate background of an empty image"));
        }

        let box_size = config.box_size;
        let boxes_x = width.div_ceil(box_size);
        let boxes_y = height.div_ceil(box_size);

        let stats = compute_box_stats(&image.pixels, exclude, config, boxes_x, boxes_y);
        let invalid = stats.iter().filter(|s| !s.valid).count();
        if invalid == stats.len() {
            return Err(Error::invalid(
                "exclude",
                "no background box has enough usable pixels",
            ));
        }
        if invalid > 0 {
            tracing::warn!(
                "{} of {} background boxes had too few usable pixels, filled from neighbours",
                invalid,
                stats.len()
            );
        }

        let stats = fill_invalid_boxes(stats);
        let filter = config.filter_boxes();
        let box_level = median_filter_grid(&stats.map(|s| s.level), filter);
        let box_rms = median_filter_grid(&stats.map(|s| s.rms), filter);

        let global_level = median_f32_mut(&mut box_level.pixels().to_vec()).unwrap_or(0.0);
        let global_rms = median_f32_mut(&mut box_rms.pixels().to_vec()).unwrap_or(0.0);

        tracing::debug!(
            "Background: {}x{} boxes of {} px, filter {} boxes, global level {:.4}, rms {:.4}",
            boxes_x,
            boxes_y,
            box_size,
            filter,
            global_level,
            global_rms
        );

        let centers_x = box_centers(width, box_size);
        let centers_y = box_centers(height, box_size);
        let level = interpolate(&box_level, &centers_x, &centers_y, width, height);
        let rms = interpolate(&box_rms, &centers_x, &centers_y, width, height);

        Ok(Background {
            level,
            rms,
            box_level,
            box_rms,
            global_level,
            global_rms,
        })
    }

    /// Uniform model, useful when the sky is already known.
    pub fn constant(width: usize, height: usize, level: f32, rms: f32) -> Background {
        Background {
            level: Buffer2::new_filled(width, height, level),
            rms: Buffer2::new_filled(width, height, rms),
            box_level: Buffer2::new_filled(1, 1, level),
            box_rms: Buffer2::new_filled(1, 1, rms),
            global_level: level,
            global_rms: rms,
        }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.level.shape()
    }

    #[inline]
    pub fn level_at(&self, x: usize, y: usize) -> f32 {
        self.level[(x, y)]
    }

    #[inline]
    pub fn rms_at(&self, x: usize, y: usize) -> f32 {
        self.rms[(x, y)]
    }

    /// Box-resolution level and rms grids after filtering.
    pub fn box_grids(&self) -> (&Buffer2<f32>, &Buffer2<f32>) {
        (&self.box_level, &self.box_rms)
    }

    /// New image with the level map subtracted.
    pub fn subtract_from(&self, image: &Image) -> Result<Image> {
        image.subtract(&self.level)
    }
}

// ============================================================================
// Box statistics
// ============================================================================

fn compute_box_stats(
    pixels: &Buffer2<f32>,
    exclude: Option<&Buffer2<bool>>,
    config: &BackgroundConfig,
    boxes_x: usize,
    boxes_y: usize,
) -> Buffer2<BoxStats> {
    let (width, height) = pixels.shape();
    let box_size = config.box_size;
    let max_box_pixels = box_size.min(width) * box_size.min(height);

    let stats: Vec<BoxStats> = (0..boxes_x * boxes_y)
        .into_par_iter()
        .map_init(
            || {
                (
                    Vec::with_capacity(max_box_pixels),
                    Vec::with_capacity(max_box_pixels),
                )
            },
            |(values, scratch), idx| {
                let x_start = (idx % boxes_x) * box_size;
                let y_start = (idx / boxes_x) * box_size;
                let x_end = (x_start + box_size).min(width);
                let y_end = (y_start + box_size).min(height);

                values.clear();
                for y in y_start..y_end {
                    for x in x_start..x_end {
                        let v = pixels[(x, y)];
                        let excluded = exclude.is_some_and(|m| m[(x, y)]);
                        if !excluded && v.is_finite() {
                            values.push(v);
                        }
                    }
                }

                let box_pixels = (x_end - x_start) * (y_end - y_start);
                let required = (config.min_valid_fraction * box_pixels as f32).ceil() as usize;
                if values.is_empty() || values.len() < required {
                    return BoxStats::default();
                }

                match sigma_clipped_median_mad(
                    values,
                    scratch,
                    config.clip_kappa,
                    SIGMA_CLIP_ITERATIONS,
                ) {
                    Some((level, rms)) => BoxStats {
                        level,
                        rms,
                        valid: true,
                    },
                    None => BoxStats::default(),
                }
            },
        )
        .collect();

    Buffer2::new(boxes_x, boxes_y, stats)
}

/// Replace each invalid box with the median of its valid 8-neighbours, or of
/// all valid boxes when it has none.
fn fill_invalid_boxes(stats: Buffer2<BoxStats>) -> Buffer2<BoxStats> {
    let mut all_level: Vec<f32> = stats.iter().filter(|s| s.valid).map(|s| s.level).collect();
    let mut all_rms: Vec<f32> = stats.iter().filter(|s| s.valid).map(|s| s.rms).collect();
    let fallback_level = median_f32_mut(&mut all_level).unwrap_or(0.0);
    let fallback_rms = median_f32_mut(&mut all_rms).unwrap_or(0.0);

    let (bx, by) = stats.shape();
    Buffer2::from_fn(bx, by, |x, y| {
        let s = stats[(x, y)];
        if s.valid {
            return s;
        }

        let mut levels = Vec::with_capacity(8);
        let mut rmss = Vec::with_capacity(8);
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                if let Some(n) = stats.get_checked(x as i64 + dx, y as i64 + dy) {
                    if n.valid {
                        levels.push(n.level);
                        rmss.push(n.rms);
                    }
                }
            }
        }
        BoxStats {
            level: median_f32_mut(&mut levels).unwrap_or(fallback_level),
            rms: median_f32_mut(&mut rmss).unwrap_or(fallback_rms),
            valid: true,
        }
    })
}

fn median_filter_grid(grid: &Buffer2<f32>, window: usize) -> Buffer2<f32> {
    if window <= 1 {
        return grid.clone();
    }
    // Wider windows see the same boxes as one spanning the whole grid.
    let half = (window / 2).min(grid.width().max(grid.height()));
    let side = 2 * half + 1;
    let half = half as i64;
    let mut scratch = Vec::with_capacity(side.min(grid.width()) * side.min(grid.height()));
    Buffer2::from_fn(grid.width(), grid.height(), |x, y| {
        scratch.clear();
        for dy in -half..=half {
            for dx in -half..=half {
                if let Some(&v) = grid.get_checked(x as i64 + dx, y as i64 + dy) {
                    scratch.push(v);
                }
            }
        }
        median_f32_mut(&mut scratch).unwrap_or(grid[(x, y)])
    })
}

// ============================================================================
// Interpolation
// ============================================================================

fn box_centers(len: usize, box_size: usize) -> Vec<f32> {
    (0..len.div_ceil(box_size))
        .map(|i| {
            let start = i * box_size;
            let end = (start + box_size).min(len);
            (start + end) as f32 * 0.5
        })
        .collect()
}

/// Index of the lower bracketing centre and the weight of the upper one.
#[inline]
fn bracket(centers: &[f32], pos: f32) -> (usize, usize, f32) {
    let last = centers.len() - 1;
    if last == 0 || pos <= centers[0] {
        return (0, 0, 0.0);
    }
    if pos >= centers[last] {
        return (last, last, 0.0);
    }
    let upper = centers.partition_point(|&c| c <= pos);
    let lower = upper - 1;
    let t = (pos - centers[lower]) / (centers[upper] - centers[lower]);
    (lower, upper, t)
}

fn interpolate(
    grid: &Buffer2<f32>,
    centers_x: &[f32],
    centers_y: &[f32],
    width: usize,
    height: usize,
) -> Buffer2<f32> {
    let columns: Vec<(usize, usize, f32)> = (0..width)
        .map(|x| bracket(centers_x, x as f32 + 0.5))
        .collect();

    let mut out = vec![0.0f32; width * height];
    out.par_chunks_mut(width * ROWS_PER_CHUNK)
        .enumerate()
        .for_each(|(chunk_idx, chunk)| {
            for (local_y, row) in chunk.chunks_mut(width).enumerate() {
                let y = chunk_idx * ROWS_PER_CHUNK + local_y;
                let (y0, y1, ty) = bracket(centers_y, y as f32 + 0.5);
                for (x, dst) in row.iter_mut().enumerate() {
                    let (x0, x1, tx) = columns[x];
                    let top = grid[(x0, y0)] * (1.0 - tx) + grid[(x1, y0)] * tx;
                    let bottom = grid[(x0, y1)] * (1.0 - tx) + grid[(x1, y1)] * tx;
                    *dst = top * (1.0 - ty) + bottom * ty;
                }
            }
        });
    Buffer2::new(width, height, out)
}
