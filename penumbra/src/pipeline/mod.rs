//! Multi-pass detection of faint, extended sources.
//!
//! Bright compact objects are found first with a high threshold, their
//! low-threshold footprints are replaced with sky noise, and the cleaned image
//! is searched again with a broad kernel at a medium threshold.

mod config;

use common::parallel::par_map_limited;
use common::Buffer2;

use crate::associate::{associate, Association, Seeds};
use crate::background::Background;
use crate::catalog::{apply_selection, deduplicate, Catalog, Deduplicated, Pass, Selection};
use crate::combine::{run_hot_cold, DetectionRun, HotColdResult};
use crate::error::{Error, Result};
use crate::image::{Image, Mask, MaskPlane, SegmentationMap};
use crate::kernel::Kernel;
use crate::noise::replace_footprints;
use crate::segment::{DeblendConfig, SegmentConfig, Segmenter, Threshold};
use crate::sky::Wcs;

pub use config::{PassValues, PipelineConfig};

// =============================================================================
// Results
// =============================================================================

/// Catalog and footprints of one thresholding pass.
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub catalog: Catalog,
    pub segmap: SegmentationMap,
}

/// Final detection on the cleaned image.
#[derive(Debug, Clone)]
pub enum Detection {
    Single(DetectionRun),
    HotCold(HotColdResult),
}

impl Detection {
    pub fn catalog(&self) -> &Catalog {
        match self {
            Detection::Single(run) => &run.catalog,
            Detection::HotCold(result) => &result.combined.catalog,
        }
    }
}

/// Every intermediate product of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Background of the input image.
    pub background: Background,
    /// Input mask with THRESH_HIGH, THRESH_LOW and DETECTED set.
    pub mask: Mask,
    pub high: PassOutput,
    pub low: PassOutput,
    pub association: Association,
    /// Input image with associated footprints replaced by noise.
    pub cleaned: Image,
    pub detection: Detection,
    pub selection: Selection,
}

impl PipelineOutput {
    /// Selected final catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.selection.catalog
    }
}

// =============================================================================
// Pipeline
// =============================================================================

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, image: &Image, mask: &Mask) -> Result<PipelineOutput> {
        let config = &self.config;
        if mask.shape() != image.shape() {
            return Err(Error::shape("mask", image.shape(), mask.shape()));
        }

        let mut mask = mask.clone();
        mask.clear_plane(MaskPlane::Detected);
        mask.clear_plane(MaskPlane::DetectedNegative);
        let bad = mask.select(config.bad_flags()?);

        // Step 1: Background of the raw image
        let background = Background::estimate(image, Some(&bad), &config.background)?;
        let subtracted = background.subtract_from(image)?;

        // Step 2: Noise of the PSF-smoothed image
        let psf_kernel = config.psf_kernel();
        let noise = self.smoothed_noise(&subtracted, psf_kernel.as_ref(), &bad, &background)?;

        // Step 3: High threshold pass
        let grow = config.grow_radius();
        let high = self.threshold_pass(&subtracted, &noise, &bad, Pass::High)?;
        mask.set_plane_from_segmentation(&high.segmap, MaskPlane::ThreshHigh, grow)?;

        // Step 4: Low threshold pass
        let low = self.threshold_pass(&subtracted, &noise, &bad, Pass::Low)?;
        mask.set_plane_from_segmentation(&low.segmap, MaskPlane::ThreshLow, grow)?;
        tracing::info!(
            "Threshold passes: {} high, {} low footprints (grown by {} px)",
            high.catalog.len(),
            low.catalog.len(),
            grow
        );

        // Step 5: Low footprints belonging to bright objects
        let association = associate(
            &low.catalog,
            &low.segmap,
            Seeds::Mask(&mask),
            &config.association,
        )?;

        // Step 6: Replace them with sky noise
        let cleaned = replace_footprints(image, &association.segmap, &background, &config.noise)?;

        // Step 7: Detection on the cleaned image
        let detection = match &config.hot_cold {
            Some(hot_cold) => {
                let result = run_hot_cold(&cleaned, Some(&bad), hot_cold)?;
                mask.set_plane_from_segmentation(&result.hot.segmap, MaskPlane::Detected, 0)?;
                mask.set_plane_from_segmentation(&result.cold.segmap, MaskPlane::Detected, 0)?;
                Detection::HotCold(result)
            }
            None => {
                let run = self.detect(&cleaned, &bad)?;
                mask.set_plane_from_segmentation(&run.segmap, MaskPlane::Detected, 0)?;
                Detection::Single(run)
            }
        };

        // Step 8: Selection
        let selection = apply_selection(detection.catalog(), &config.selection)?;

        tracing::info!(
            "Pipeline: {} associated of {} low footprints, {} detected, {} selected",
            association.len(),
            low.catalog.len(),
            detection.catalog().len(),
            selection.after
        );

        Ok(PipelineOutput {
            background,
            mask,
            high,
            low,
            association,
            cleaned,
            detection,
            selection,
        })
    }

    fn smoothed_noise(
        &self,
        subtracted: &Image,
        kernel: Option<&Kernel>,
        bad: &Buffer2<bool>,
        background: &Background,
    ) -> Result<Buffer2<f32>> {
        match kernel {
            Some(kernel) => {
                let smoothed = Image::new(kernel.convolve(&subtracted.pixels)?);
                Ok(Background::estimate(&smoothed, Some(bad), &self.config.background)?.rms)
            }
            None => Ok(background.rms.clone()),
        }
    }

    fn threshold_pass(
        &self,
        subtracted: &Image,
        noise: &Buffer2<f32>,
        bad: &Buffer2<bool>,
        pass: Pass,
    ) -> Result<PassOutput> {
        let config = &self.config;
        let (k, min_area) = match pass {
            Pass::High => (config.thresholds.high, config.min_area.high),
            _ => (config.thresholds.low, config.min_area.low),
        };
        let segment = SegmentConfig {
            threshold: Threshold::Relative(k),
            min_area,
            kernel: config.psf_kernel(),
            deblend: DeblendConfig::disabled(),
            connectivity: config.connectivity,
        };
        let (mut catalog, segmap) = Segmenter::new(subtracted, &segment)
            .with_noise_map(noise)
            .with_exclusion(bad)
            .run()?;
        catalog.set_provenance(None, None, Some(pass));
        Ok(PassOutput { catalog, segmap })
    }

    /// Re-estimate the background of `cleaned` and detect at the medium threshold.
    fn detect(&self, cleaned: &Image, bad: &Buffer2<bool>) -> Result<DetectionRun> {
        let config = &self.config;
        let background = Background::estimate(cleaned, Some(bad), &config.background)?;
        let subtracted = background.subtract_from(cleaned)?;
        let noise = self.smoothed_noise(
            &subtracted,
            config.detection_kernel.as_ref(),
            bad,
            &background,
        )?;

        let segment = SegmentConfig {
            threshold: Threshold::Relative(config.thresholds.medium),
            min_area: config.min_area.medium,
            kernel: config.detection_kernel.clone(),
            deblend: config.detection_deblend.clone(),
            connectivity: config.connectivity,
        };
        let (mut catalog, segmap) = Segmenter::new(&subtracted, &segment)
            .with_noise_map(&noise)
            .with_exclusion(bad)
            .run()?;
        catalog.set_provenance(None, None, Some(Pass::Detect));

        Ok(DetectionRun {
            catalog,
            segmap,
            background,
        })
    }
}

// =============================================================================
// Batch
// =============================================================================

/// One image of a survey region.
#[derive(Debug, Clone)]
pub struct PatchJob {
    pub image: Image,
    pub mask: Mask,
    pub tract: Option<u32>,
    pub patch: Option<String>,
    /// Sky mapping of the mosaic the image origin is placed in.
    pub wcs: Option<Wcs>,
}

impl PatchJob {
    pub fn new(image: Image, mask: Mask) -> Self {
        Self {
            image,
            mask,
            tract: None,
            patch: None,
            wcs: None,
        }
    }

    fn label(&self) -> String {
        match (&self.tract, &self.patch) {
            (Some(tract), Some(patch)) => format!("{tract}/{patch}"),
            (Some(tract), None) => tract.to_string(),
            (None, Some(patch)) => patch.clone(),
            (None, None) => "unnamed".to_string(),
        }
    }
}

/// Run the pipeline on every job with at most `max_concurrent` in flight.
/// A failed job does not affect the others.
pub fn run_batch(
    jobs: &[PatchJob],
    config: &PipelineConfig,
    max_concurrent: Option<usize>,
) -> Result<Vec<Result<PipelineOutput>>> {
    let pipeline = Pipeline::new(config.clone())?;
    let results = par_map_limited(jobs, max_concurrent, |_, job| {
        let result = pipeline.run(&job.image, &job.mask);
        if let Err(err) = &result {
            tracing::warn!("Patch {} failed: {err}", job.label());
        }
        result
    });
    tracing::info!(
        "Batch: {} of {} patches succeeded",
        results.iter().filter(|r| r.is_ok()).count(),
        jobs.len()
    );
    Ok(results)
}

/// Merged catalog of a batch.
#[derive(Debug, Clone)]
pub struct BatchCatalog {
    pub dedup: Deduplicated,
    pub selection: Selection,
    pub failed: usize,
}

impl BatchCatalog {
    pub fn catalog(&self) -> &Catalog {
        &self.selection.catalog
    }
}

/// Concatenate the catalogs of successful jobs, tag them with tract and
/// patch, place them on the sky, drop duplicates and apply the selection.
pub fn merge_batch(
    jobs: &[PatchJob],
    results: &[Result<PipelineOutput>],
    config: &PipelineConfig,
) -> Result<BatchCatalog> {
    if jobs.len() != results.len() {
        return Err(Error::invalid(
            "results",
            format!("{} results for {} jobs", results.len(), jobs.len()),
        ));
    }

    let mut catalogs = Vec::new();
    let mut failed = 0usize;
    for (job, result) in jobs.iter().zip(results) {
        let Ok(output) = result else {
            failed += 1;
            continue;
        };
        let mut catalog = output.detection.catalog().clone();
        catalog.set_provenance(job.tract, job.patch.as_deref(), None);
        if let Some(wcs) = &job.wcs {
            catalog.assign_sky(wcs, job.image.origin)?;
        }
        catalogs.push(catalog);
    }

    let merged = Catalog::concat(&catalogs)?;
    let dedup = deduplicate(&merged, &config.dedup)?;
    let selection = apply_selection(&dedup.catalog, &config.selection)?;
    tracing::info!(
        "Merged batch: {} rows, {} duplicates removed, {} selected, {} failed patches",
        merged.len(),
        dedup.removed,
        selection.after,
        failed
    );

    Ok(BatchCatalog {
        dedup,
        selection,
        failed,
    })
}
