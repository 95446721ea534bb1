//! Configuration of the multi-pass pipeline.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::associate::AssociateConfig;
use crate::background::BackgroundConfig;
use crate::catalog::{DedupConfig, SelectionRule};
use crate::combine::HotColdConfig;
use crate::error::{Error, Result};
use crate::image::{MaskFlags, MaskPlane};
use crate::kernel::Kernel;
use crate::noise::NoiseReplaceConfig;
use crate::segment::{Connectivity, DeblendConfig};

/// Detection kernel FWHM for the final pass: 3.5 arcsec at 0.168 arcsec/px.
const DETECTION_FWHM_PX: f32 = 3.5 / 0.168;

/// Per-pass values: high, low and medium (final detection) thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassValues<T> {
    pub high: T,
    pub low: T,
    pub medium: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub background: BackgroundConfig,
    /// Mask planes ignored by background estimation and detection.
    pub bad_planes: Vec<String>,
    /// PSF sigma in pixels. The thresholding passes smooth at this scale.
    pub psf_sigma: Option<f32>,
    /// Detection thresholds in units of the detection image noise.
    pub thresholds: PassValues<f32>,
    pub min_area: PassValues<usize>,
    /// Disk radius THRESH_HIGH/THRESH_LOW footprints are grown by.
    /// `None` derives it from the PSF as `round(2.4 σ)`.
    pub grow: Option<usize>,
    pub association: AssociateConfig,
    pub noise: NoiseReplaceConfig,
    /// Smoothing for the final detection pass.
    pub detection_kernel: Option<Kernel>,
    pub detection_deblend: DeblendConfig,
    pub connectivity: Connectivity,
    /// Replace the single final pass with a hot/cold pair.
    pub hot_cold: Option<HotColdConfig>,
    pub selection: Vec<SelectionRule>,
    pub dedup: DedupConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            background: BackgroundConfig::default(),
            bad_planes: [MaskPlane::Bad, MaskPlane::NoData, MaskPlane::Saturated]
                .iter()
                .map(|p| p.to_string())
                .collect(),
            psf_sigma: Some(1.6),
            thresholds: PassValues {
                high: 18.0,
                low: 3.0,
                medium: 4.0,
            },
            min_area: PassValues {
                high: 1,
                low: 50,
                medium: 100,
            },
            grow: None,
            association: AssociateConfig::default(),
            noise: NoiseReplaceConfig::default(),
            detection_kernel: Some(Kernel::Gaussian {
                fwhm: DETECTION_FWHM_PX,
            }),
            detection_deblend: DeblendConfig::default(),
            connectivity: Connectivity::Eight,
            hot_cold: None,
            selection: Vec::new(),
            dedup: DedupConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a YAML or JSON file, chosen by extension, and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: PipelineConfig = common::file_format::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        common::file_format::save_to_file(self, path)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.background.validate()?;
        self.bad_flags()?;
        if let Some(sigma) = self.psf_sigma {
            if !(sigma.is_finite() && sigma > 0.0) {
                return Err(Error::invalid("psf_sigma", format!("must be > 0, got {sigma}")));
            }
        }
        for (name, k) in [
            ("high", self.thresholds.high),
            ("low", self.thresholds.low),
            ("medium", self.thresholds.medium),
        ] {
            if !(k.is_finite() && k > 0.0) {
                return Err(Error::InvalidThreshold(format!(
                    "{name} threshold must be > 0, got {k}"
                )));
            }
        }
        if self.min_area.high == 0 || self.min_area.low == 0 || self.min_area.medium == 0 {
            return Err(Error::invalid("min_area", "must be >= 1 for every pass"));
        }
        self.association.validate()?;
        self.association.seed_flags()?;
        self.noise.validate()?;
        if let Some(kernel) = &self.detection_kernel {
            kernel.validate()?;
        }
        self.detection_deblend.validate()?;
        if let Some(hot_cold) = &self.hot_cold {
            hot_cold.validate()?;
        }
        self.dedup.validate()
    }

    pub fn bad_flags(&self) -> Result<MaskFlags> {
        MaskFlags::from_names(&self.bad_planes)
    }

    /// Footprint growth radius in pixels.
    pub fn grow_radius(&self) -> usize {
        match (self.grow, self.psf_sigma) {
            (Some(grow), _) => grow,
            (None, Some(sigma)) => (2.4 * sigma + 0.5) as usize,
            (None, None) => 0,
        }
    }

    pub fn psf_kernel(&self) -> Option<Kernel> {
        self.psf_sigma.map(|sigma| Kernel::Gaussian {
            fwhm: sigma * crate::kernel::SIGMA_TO_FWHM,
        })
    }
}
