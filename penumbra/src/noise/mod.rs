//! Replace selected pixels with synthetic sky noise.

#[cfg(test)]
mod tests;

use common::Buffer2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::background::Background;
use crate::dilation::dilate_square;
use crate::error::{Error, Result};
use crate::image::{Image, SegmentationMap};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseReplaceConfig {
    /// Grow the replaced region with a square structuring element of this
    /// side before replacing. `None` replaces exactly the given pixels.
    pub dilate: Option<usize>,
    /// RNG seed. `None` draws a fresh seed per call.
    pub seed: Option<u64>,
}

impl NoiseReplaceConfig {
    pub fn with_dilation(size: usize) -> Self {
        Self {
            dilate: Some(size),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dilate == Some(0) {
            return Err(Error::invalid("dilate", "structuring element size must be >= 1"));
        }
        Ok(())
    }
}

/// New image where every pixel selected by `region` is drawn from
/// `N(level, rms²)` at that pixel; `level` defaults to zero.
pub fn replace_with_noise(
    image: &Image,
    region: &Buffer2<bool>,
    rms: &Buffer2<f32>,
    level: Option<&Buffer2<f32>>,
    config: &NoiseReplaceConfig,
) -> Result<Image> {
    config.validate()?;
    image.check_shape("replacement region", region)?;
    image.check_shape("noise rms", rms)?;
    if let Some(level) = level {
        image.check_shape("noise level", level)?;
    }

    let region = match config.dilate {
        Some(size) => dilate_square(region, size),
        None => region.clone(),
    };

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut output = image.clone();
    let mut replaced = 0usize;
    for (i, value) in output.pixels.iter_mut().enumerate() {
        if !region[i] {
            continue;
        }
        let sigma = rms[i];
        if !(sigma.is_finite() && sigma >= 0.0) {
            let (x, y) = region.coords(i);
            return Err(Error::invalid(
                "rms",
                format!("noise rms at ({x}, {y}) must be finite and >= 0, got {sigma}"),
            ));
        }
        let mean = level.map_or(0.0, |l| l[i]);
        let z: f32 = rng.sample(StandardNormal);
        *value = mean + sigma * z;
        replaced += 1;
    }

    tracing::debug!(
        "Noise replacement: {} pixels replaced (dilation {:?})",
        replaced,
        config.dilate
    );
    Ok(output)
}

/// Replace every labelled pixel of `segmap` with noise drawn from `background`.
pub fn replace_footprints(
    image: &Image,
    segmap: &SegmentationMap,
    background: &Background,
    config: &NoiseReplaceConfig,
) -> Result<Image> {
    replace_with_noise(
        image,
        &segmap.nonzero(),
        &background.rms,
        Some(&background.level),
        config,
    )
}
