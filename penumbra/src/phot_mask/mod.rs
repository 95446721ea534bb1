//! Masks for galaxy photometry: everything detected around a target except
//! the target itself, grown generously, plus the bad pixels of the input mask.

#[cfg(test)]
mod tests;

use common::Buffer2;
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, Source};
use crate::combine::{DetectionRun, PassConfig};
use crate::error::{Error, Result};
use crate::image::{Image, Mask, MaskFlags, MaskPlane, SegmentationMap};
use crate::kernel::{Kernel, SIGMA_TO_FWHM};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhotMaskConfig {
    pub detection: PassConfig,
    /// Target position in local pixels; `None` means the image centre.
    pub target: Option<[f64; 2]>,
    /// Footprints whose row lies within this radius of the target are not masked.
    pub seg_rmin: f64,
    /// Objects within this radius of the target are left out of the ellipse mask.
    pub obj_rmin: f64,
    /// Sigma of the Gaussian used to grow the segmentation mask, in pixels.
    pub grow_sigma: f32,
    /// Fraction of the peak a grown pixel must exceed to be masked.
    pub mask_threshold: f32,
    /// Scale applied to object ellipses.
    pub grow_obj: f64,
    /// Add every input mask bit except DETECTED.
    pub use_input_mask: bool,
}

impl Default for PhotMaskConfig {
    fn default() -> Self {
        Self {
            detection: PassConfig::default(),
            target: None,
            seg_rmin: 100.0,
            obj_rmin: 15.0,
            grow_sigma: 5.0,
            mask_threshold: 0.01,
            grow_obj: 4.5,
            use_input_mask: true,
        }
    }
}

impl PhotMaskConfig {
    pub fn validate(&self) -> Result<()> {
        self.detection.validate()?;
        for (name, value) in [("seg_rmin", self.seg_rmin), ("obj_rmin", self.obj_rmin), ("grow_obj", self.grow_obj)] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::invalid(name, format!("must be finite and >= 0, got {value}")));
            }
        }
        if !(self.grow_sigma.is_finite() && self.grow_sigma >= 0.0) {
            return Err(Error::invalid("grow_sigma", format!("must be >= 0, got {}", self.grow_sigma)));
        }
        if !(self.mask_threshold > 0.0 && self.mask_threshold < 1.0) {
            return Err(Error::invalid(
                "mask_threshold",
                format!("must be in (0, 1), got {}", self.mask_threshold),
            ));
        }
        Ok(())
    }
}

/// Build the photometry mask of `image`: `true` marks pixels to ignore.
pub fn make_phot_mask(image: &Image, mask: Option<&Mask>, config: &PhotMaskConfig) -> Result<Buffer2<bool>> {
    config.validate()?;
    if let Some(mask) = mask {
        if mask.shape() != image.shape() {
            return Err(Error::shape("input mask", image.shape(), mask.shape()));
        }
    }

    let target = config
        .target
        .map(DVec2::from)
        .unwrap_or_else(|| DVec2::new(image.width() as f64 / 2.0, image.height() as f64 / 2.0));

    let exclude = mask.map(|m| m.select(MaskFlags::from_planes(&[MaskPlane::Bad, MaskPlane::NoData])));
    let run = DetectionRun::detect(image, exclude.as_ref(), &config.detection)?;

    let far = |s: &Source, r: f64| DVec2::new(s.x, s.y).distance(target) > r;
    let keep_seg: Vec<bool> = run.catalog.iter().map(|s| far(s, config.seg_rmin)).collect();
    let segmap = run.segmap.retain_labels(&keep_seg)?;
    let keep_obj: Vec<bool> = run.catalog.iter().map(|s| far(s, config.obj_rmin)).collect();
    let objects = run.catalog.filter_rows(&keep_obj);

    let mut output = grown_segmentation(&segmap, config.grow_sigma, config.mask_threshold)?;
    paint_ellipses(&mut output, &objects, config.grow_obj);

    if let Some(mask) = mask.filter(|_| config.use_input_mask) {
        let bad = mask.bad_pixel_mask(MaskPlane::Detected.into());
        for (out, &b) in output.iter_mut().zip(bad.iter()) {
            *out |= b;
        }
    }

    tracing::info!(
        "Photometry mask: {} footprints, {} ellipses, {} of {} pixels masked",
        segmap.len(),
        objects.len(),
        output.iter().filter(|&&m| m).count(),
        output.len()
    );
    Ok(output)
}

/// Smooth the footprint indicator with a Gaussian and keep pixels above `threshold`.
pub fn grown_segmentation(segmap: &SegmentationMap, sigma: f32, threshold: f32) -> Result<Buffer2<bool>> {
    let footprints = segmap.nonzero();
    if sigma <= 0.0 {
        return Ok(footprints);
    }
    let indicator = footprints.map(|&on| if on { 1.0f32 } else { 0.0 });
    let smoothed = Kernel::Gaussian {
        fwhm: sigma * SIGMA_TO_FWHM,
    }
    .convolve(&indicator)?;
    Ok(smoothed.map(|&v| v > threshold))
}

/// Mark pixels inside each row's `(a, b, theta)` ellipse scaled by `scale`.
pub fn paint_ellipses(mask: &mut Buffer2<bool>, catalog: &Catalog, scale: f64) {
    let (width, height) = mask.shape();
    if width == 0 || height == 0 {
        return;
    }
    for source in catalog.iter() {
        if !(source.a > 0.0 && source.b > 0.0) {
            continue;
        }
        let (sin, cos) = source.theta.sin_cos();
        let (ia2, ib2) = (1.0 / (source.a * source.a), 1.0 / (source.b * source.b));
        let cxx = cos * cos * ia2 + sin * sin * ib2;
        let cyy = sin * sin * ia2 + cos * cos * ib2;
        let cxy = 2.0 * cos * sin * (ia2 - ib2);
        let r2 = scale * scale;

        let reach = scale * source.a;
        let x_lo = (source.x - reach).floor().max(0.0) as usize;
        let y_lo = (source.y - reach).floor().max(0.0) as usize;
        let x_hi = ((source.x + reach).ceil() as usize).min(width - 1);
        let y_hi = ((source.y + reach).ceil() as usize).min(height - 1);

        for y in y_lo..=y_hi {
            let dy = y as f64 - source.y;
            for x in x_lo..=x_hi {
                let dx = x as f64 - source.x;
                if cxx * dx * dx + cyy * dy * dy + cxy * dx * dy <= r2 {
                    mask[(x, y)] = true;
                }
            }
        }
    }
}
