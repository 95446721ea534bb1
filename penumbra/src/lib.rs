//! Penumbra - detection of faint, extended sources in deep images.
//!
//! Bright compact objects and their halos are found with thresholding passes,
//! replaced by synthetic sky noise, and the cleaned image is searched again at
//! low surface brightness:
//! - Background estimation on a grid of sigma-clipped boxes
//! - Thresholded segmentation with multi-threshold deblending
//! - Footprint association and noise replacement
//! - Hot/cold detection merging
//! - Catalog deduplication, selection and CSV output
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use penumbra::{Image, Mask, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::new(PipelineConfig::from_file("detect.yaml")?)?;
//! let output = pipeline.run(&image, &Mask::new(image.width(), image.height()))?;
//! output.catalog().write_csv_path("sources.csv")?;
//! ```

pub mod associate;
pub mod background;
pub mod catalog;
pub mod combine;
pub(crate) mod dilation;
mod error;
pub mod image;
pub mod kernel;
pub(crate) mod math;
pub mod noise;
pub mod phot_mask;
pub mod pipeline;
pub mod segment;
pub mod sky;

#[cfg(test)]
pub mod testing;

pub use error::{Error, Result};

// ============================================================================
// Image model
// ============================================================================

pub use image::{
    BoundingBox, FootprintInfo, Image, Mask, MaskFlags, MaskPlane, Peak, SegmentationMap,
};
pub use kernel::Kernel;
pub use sky::Wcs;

// ============================================================================
// Detection stages
// ============================================================================

pub use associate::{associate, AssociateConfig, Association, Seeds};
pub use background::{Background, BackgroundConfig};
pub use combine::{
    combine, run_hot_cold, Combined, DetectionRun, HotColdConfig, HotColdResult, PassConfig,
};
pub use noise::{replace_footprints, replace_with_noise, NoiseReplaceConfig};
pub use phot_mask::{make_phot_mask, PhotMaskConfig};
pub use segment::{
    segment, Connectivity, DeblendConfig, SegmentConfig, Segmenter, Threshold,
};

// ============================================================================
// Catalogs
// ============================================================================

pub use catalog::{
    apply_selection, deduplicate, Catalog, DedupConfig, MatchSpace, Pass, SelectionRule, Source,
};

// ============================================================================
// Pipeline
// ============================================================================

pub use pipeline::{
    merge_batch, run_batch, BatchCatalog, Detection, PatchJob, Pipeline, PipelineConfig,
    PipelineOutput,
};
