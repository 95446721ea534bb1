//! Thresholded segmentation: smoothing, thresholding, connected-component
//! labeling, deblending and per-footprint measurement.
//!
//! The output pairs a [`Catalog`] with a [`SegmentationMap`]; label `L` in the
//! map is row `L - 1` of the catalog.

mod deblend;
mod labeling;
mod measure;


use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::image::{BoundingBox, Image, SegmentationMap};
use crate::kernel::Kernel;

use deblend::Component;

pub(crate) use measure::ellipse_from_moments;

// ============================================================================
// Config
// ============================================================================

/// Detection threshold policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Pixels must exceed this value.
    Absolute(f32),
    /// Pixels must exceed `k` times the noise: the per-pixel noise map when
    /// one is supplied, otherwise the global rms.
    Relative(f32),
}

/// Pixel connectivity for connected component labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Four,
    /// Includes diagonal neighbours, as SExtractor does.
    #[default]
    Eight,
}

/// Deblending parameters. More thresholds and lower contrast split more.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeblendConfig {
    pub n_thresholds: usize,
    /// Minimum fraction of the footprint flux a branch must carry.
    pub min_contrast: f32,
}

impl Default for DeblendConfig {
    fn default() -> Self {
        Self {
            n_thresholds: 32,
            min_contrast: 0.005,
        }
    }
}

impl DeblendConfig {
    pub fn disabled() -> Self {
        Self {
            n_thresholds: 1,
            min_contrast: 1.0,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.n_thresholds >= 2 && self.min_contrast < 1.0
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.min_contrast.is_finite() && self.min_contrast >= 0.0) {
            return Err(Error::invalid(
                "deblend.min_contrast",
                format!("must be finite and >= 0, got {}", self.min_contrast),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    pub threshold: Threshold,
    /// Footprints with fewer pixels are discarded.
    pub min_area: usize,
    /// Smoothing applied to the detection image before thresholding.
    pub kernel: Option<Kernel>,
    pub deblend: DeblendConfig,
    pub connectivity: Connectivity,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            threshold: Threshold::Relative(1.5),
            min_area: 5,
            kernel: Some(Kernel::Default3x3),
            deblend: DeblendConfig::default(),
            connectivity: Connectivity::Eight,
        }
    }
}

impl SegmentConfig {
    pub fn validate(&self) -> Result<()> {
        match self.threshold {
            Threshold::Absolute(t) if !t.is_finite() => {
                return Err(Error::InvalidThreshold(format!(
                    "absolute threshold must be finite, got {t}"
                )));
            }
            Threshold::Relative(k) if !(k.is_finite() && k > 0.0) => {
                return Err(Error::InvalidThreshold(format!(
                    "relative threshold must be > 0, got {k}"
                )));
            }
            _ => {}
        }
        if self.min_area < 1 {
            return Err(Error::invalid("min_area", "must be >= 1"));
        }
        if let Some(kernel) = &self.kernel {
            kernel.validate()?;
        }
        self.deblend.validate()
    }
}

// ============================================================================
// Segmenter
// ============================================================================

/// One segmentation run over an image.
///
/// ```ignore
/// let (catalog, segmap) = Segmenter::new(&image, &config)
///     .with_noise_map(&background.rms)
///     .run()?;
/// ```
pub struct Segmenter<'a> {
    image: &'a Image,
    config: &'a SegmentConfig,
    noise: Option<&'a Buffer2<f32>>,
    exclude: Option<&'a Buffer2<bool>>,
    global_rms: Option<f32>,
}

impl<'a> Segmenter<'a> {
    pub fn new(image: &'a Image, config: &'a SegmentConfig) -> Self {
        Self {
            image,
            config,
            noise: None,
            exclude: None,
            global_rms: None,
        }
    }

    /// Per-pixel sigma for relative thresholds.
    pub fn with_noise_map(mut self, noise: &'a Buffer2<f32>) -> Self {
        self.noise = Some(noise);
        self
    }

    /// Pixels that may never be part of a detection.
    pub fn with_exclusion(mut self, exclude: &'a Buffer2<bool>) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Scalar sigma for relative thresholds when no noise map is given.
    pub fn with_global_rms(mut self, rms: f32) -> Self {
        self.global_rms = Some(rms);
        self
    }

    pub fn run(self) -> Result<(Catalog, SegmentationMap)> {
        self.config.validate()?;
        if let Some(noise) = self.noise {
            self.image.check_shape("noise map", noise)?;
        }
        if let Some(exclude) = self.exclude {
            self.image.check_shape("exclusion mask", exclude)?;
        }

        let detection = match &self.config.kernel {
            Some(kernel) => kernel.convolve(&self.image.pixels)?,
            None => self.image.pixels.clone(),
        };

        let above = self.threshold_mask(&detection)?;
        let (components, count) = labeling::label_components(&above, self.config.connectivity);
        let components = collect_components(&components, count);

        let mut labels = Buffer2::new_default(detection.width(), detection.height());
        let mut rows = Vec::new();
        let mut discarded = 0usize;
        let mut next_label = 1u32;

        for component in &components {
            if component.pixels.len() < self.config.min_area {
                discarded += 1;
                continue;
            }
            let objects = deblend::deblend(
                component,
                &detection,
                &self.config.deblend,
                self.config.min_area,
                self.config.connectivity,
            );
            for pixels in objects {
                for &idx in &pixels {
                    labels[idx] = next_label;
                }
                rows.push(measure::measure(next_label, &pixels, &self.image.pixels));
                next_label += 1;
            }
        }

        let segmap = SegmentationMap::from_labels(labels, &detection)?;
        tracing::debug!(
            "Segmentation: {} components, {} below min area {}, {} objects after deblending",
            components.len(),
            discarded,
            self.config.min_area,
            rows.len()
        );

        Ok((Catalog::from_sources(rows), segmap))
    }

    fn threshold_mask(&self, detection: &Buffer2<f32>) -> Result<Buffer2<bool>> {
        let threshold: Box<dyn Fn(usize) -> f32 + '_> = match self.config.threshold {
            Threshold::Absolute(t) => Box::new(move |_| t),
            Threshold::Relative(k) => match (self.noise, self.global_rms) {
                (Some(noise), _) => Box::new(move |i| k * noise[i]),
                (None, Some(rms)) if rms.is_finite() && rms > 0.0 => Box::new(move |_| k * rms),
                (None, rms) => {
                    return Err(Error::InvalidThreshold(format!(
                        "relative threshold needs a positive rms, got {rms:?}"
                    )));
                }
            },
        };

        let mut above = Buffer2::new_filled(detection.width(), detection.height(), false);
        for (i, flag) in above.iter_mut().enumerate() {
            let v = detection[i];
            let excluded = self.exclude.is_some_and(|m| m[i]);
            *flag = !excluded && v.is_finite() && v > threshold(i);
        }
        Ok(above)
    }
}

/// Convenience wrapper: segment `image` with a relative threshold against
/// `noise` (or an absolute threshold, in which case `noise` is unused).
pub fn segment(
    image: &Image,
    noise: Option<&Buffer2<f32>>,
    config: &SegmentConfig,
) -> Result<(Catalog, SegmentationMap)> {
    let mut segmenter = Segmenter::new(image, config);
    if let Some(noise) = noise {
        segmenter = segmenter.with_noise_map(noise);
    }
    segmenter.run()
}

fn collect_components(labels: &Buffer2<u32>, count: usize) -> Vec<Component> {
    let mut components: Vec<Option<Component>> = vec![None; count];
    for (idx, &label) in labels.iter().enumerate() {
        if label == 0 {
            continue;
        }
        let (x, y) = labels.coords(idx);
        let slot = &mut components[label as usize - 1];
        match slot {
            Some(c) => {
                c.pixels.push(idx);
                c.bbox.x_min = c.bbox.x_min.min(x);
                c.bbox.x_max = c.bbox.x_max.max(x);
                c.bbox.y_max = c.bbox.y_max.max(y);
            }
            None => {
                *slot = Some(Component {
                    pixels: vec![idx],
                    bbox: BoundingBox {
                        x_min: x,
                        x_max: x,
                        y_min: y,
                        y_max: y,
                    },
                })
            }
        }
    }
    components.into_iter().flatten().collect()
}
