//! Smoothing kernels applied before thresholding, plus the ring median filter.


use common::Buffer2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dilation::disk_offsets;
use crate::error::{Error, Result};
use crate::math::median_f32_mut;

/// FWHM = 2√(2 ln 2) σ for a Gaussian profile.
pub const SIGMA_TO_FWHM: f32 = 2.354_82;

#[inline]
pub fn fwhm_to_sigma(fwhm: f32) -> f32 {
    fwhm / SIGMA_TO_FWHM
}

/// Weights of the 3×3 pyramid used by SExtractor when no kernel is given.
const DEFAULT_3X3: [f32; 9] = [1.0, 2.0, 1.0, 2.0, 4.0, 2.0, 1.0, 2.0, 1.0];

/// Convolution kernel applied to the detection image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kernel {
    /// Circular Gaussian with the given full width at half maximum, in pixels.
    Gaussian { fwhm: f32 },
    Default3x3,
    /// Square kernel of odd side `size`, row-major weights.
    Custom { size: usize, weights: Vec<f32> },
}

impl Kernel {
    pub fn validate(&self) -> Result<()> {
        match self {
            Kernel::Gaussian { fwhm } => {
                if !(fwhm.is_finite() && *fwhm > 0.0) {
                    return Err(Error::invalid("kernel.fwhm", format!("must be > 0, got {fwhm}")));
                }
            }
            Kernel::Default3x3 => {}
            Kernel::Custom { size, weights } => {
                if size % 2 == 0 || weights.len() != size * size {
                    return Err(Error::invalid(
                        "kernel.weights",
                        format!("need an odd size and size² weights, got size {size} with {} weights", weights.len()),
                    ));
                }
                if weights.iter().sum::<f32>().abs() <= f32::EPSILON {
                    return Err(Error::invalid("kernel.weights", "weights must not sum to zero"));
                }
            }
        }
        Ok(())
    }

    /// Convolve `pixels`, renormalising by the in-bounds weight near the edges.
    pub fn convolve(&self, pixels: &Buffer2<f32>) -> Result<Buffer2<f32>> {
        self.validate()?;
        Ok(match self {
            Kernel::Gaussian { fwhm } => {
                let taps = gaussian_kernel_1d(fwhm_to_sigma(*fwhm));
                separable_convolve(pixels, &taps)
            }
            Kernel::Default3x3 => convolve_2d(pixels, &DEFAULT_3X3, 3),
            Kernel::Custom { size, weights } => convolve_2d(pixels, weights, *size),
        })
    }
}

/// Normalised 1D Gaussian with radius `ceil(3σ)`.
pub fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as usize;
    let two_sigma_sq = 2.0 * sigma * sigma;

    let mut taps: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / two_sigma_sq).exp()
        })
        .collect();
    let sum: f32 = taps.iter().sum();
    for t in &mut taps {
        *t /= sum;
    }
    taps
}

fn separable_convolve(pixels: &Buffer2<f32>, taps: &[f32]) -> Buffer2<f32> {
    let (width, height) = pixels.shape();
    let radius = taps.len() / 2;

    let mut rows = Buffer2::new_default(width, height);
    rows.pixels_mut()
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(y, out)| {
            let src = pixels.row(y);
            for (x, dst) in out.iter_mut().enumerate() {
                *dst = convolve_line(|i| src[i], width, x, taps, radius);
            }
        });

    let mut output = Buffer2::new_default(width, height);
    output
        .pixels_mut()
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(y, out)| {
            for (x, dst) in out.iter_mut().enumerate() {
                *dst = convolve_line(|j| rows[(x, j)], height, y, taps, radius);
            }
        });
    output
}

#[inline]
fn convolve_line(
    sample: impl Fn(usize) -> f32,
    len: usize,
    center: usize,
    taps: &[f32],
    radius: usize,
) -> f32 {
    let lo = center.saturating_sub(radius);
    let hi = (center + radius).min(len - 1);
    let mut acc = 0.0;
    let mut weight = 0.0;
    for i in lo..=hi {
        let w = taps[i + radius - center];
        acc += w * sample(i);
        weight += w;
    }
    acc / weight
}

fn convolve_2d(pixels: &Buffer2<f32>, weights: &[f32], size: usize) -> Buffer2<f32> {
    let (width, height) = pixels.shape();
    let r = (size / 2) as i64;

    let mut output = Buffer2::new_default(width, height);
    output
        .pixels_mut()
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(y, out)| {
            for (x, dst) in out.iter_mut().enumerate() {
                let mut acc = 0.0;
                let mut weight = 0.0;
                for ky in -r..=r {
                    for kx in -r..=r {
                        let Some(&v) = pixels.get_checked(x as i64 + kx, y as i64 + ky) else {
                            continue;
                        };
                        let w = weights[((ky + r) as usize) * size + (kx + r) as usize];
                        acc += w * v;
                        weight += w;
                    }
                }
                *dst = if weight.abs() > f32::EPSILON { acc / weight } else { pixels[(x, y)] };
            }
        });
    output
}

/// Median over an annulus `r_inner < r <= r_outer` around every pixel.
///
/// Suppresses compact sources while preserving structure larger than the ring.
pub fn ring_median_filter(
    pixels: &Buffer2<f32>,
    r_inner: f32,
    r_outer: f32,
) -> Result<Buffer2<f32>> {
    if !(r_inner >= 0.0 && r_outer > r_inner) {
        return Err(Error::invalid(
            "ring radii",
            format!("need 0 <= r_inner < r_outer, got {r_inner} and {r_outer}"),
        ));
    }

    let inner_sq = (r_inner as f64) * (r_inner as f64);
    let offsets: Vec<(i64, i64)> = disk_offsets(r_outer as f64)
        .into_iter()
        .filter(|&(dx, dy)| ((dx * dx + dy * dy) as f64) > inner_sq)
        .collect();
    if offsets.is_empty() {
        return Err(Error::invalid("ring radii", "annulus contains no pixels"));
    }

    let (width, height) = pixels.shape();
    let mut output = Buffer2::new_default(width, height);
    output
        .pixels_mut()
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each_init(
            || Vec::with_capacity(offsets.len()),
            |ring, (y, out)| {
                for (x, dst) in out.iter_mut().enumerate() {
                    ring.clear();
                    ring.extend(offsets.iter().filter_map(|&(dx, dy)| {
                        pixels
                            .get_checked(x as i64 + dx, y as i64 + dy)
                            .copied()
                            .filter(|v| !v.is_nan())
                    }));
                    *dst = median_f32_mut(ring).unwrap_or(pixels[(x, y)]);
                }
            },
        );
    Ok(output)
}
