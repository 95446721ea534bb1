//! Hot/cold detection: two runs with different background and deblending
//! settings, merged so that each object is represented once.
//!
//! The hot run (small background boxes, high threshold, gentle deblending)
//! finds compact objects cleanly; the cold run (large boxes, low threshold,
//! aggressive deblending) recovers faint extended ones. Peaks closer than the
//! tolerance are the same object. Hot shapes are rescaled by the median
//! cold/hot ratio measured on small matched objects before merging.


use common::Buffer2;
use serde::{Deserialize, Serialize};

use crate::background::{Background, BackgroundConfig};
use crate::catalog::{Catalog, Pass, Source};
use crate::error::{Error, Result};
use crate::image::{Image, SegmentationMap};
use crate::math::nanmedian;
use crate::segment::{DeblendConfig, SegmentConfig, Segmenter, Threshold};

/// Objects with at least this many pixels are left out of the shape
/// calibration (`10^2.6`).
pub const DEFAULT_CALIBRATION_NPIX_CEILING: f64 = 398.107_170_553_497_25;

// ============================================================================
// Config
// ============================================================================

/// Background and segmentation settings of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    pub background: BackgroundConfig,
    pub segment: SegmentConfig,
}

impl PassConfig {
    pub fn validate(&self) -> Result<()> {
        self.background.validate()?;
        self.segment.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotColdConfig {
    pub hot: PassConfig,
    pub cold: PassConfig,
    /// Peaks closer than this many pixels are the same object.
    pub tolerance: f64,
    /// Keep every hot row and only unmatched cold rows (otherwise the reverse).
    pub prefer_hot: bool,
    pub calibration_npix_ceiling: f64,
}

impl Default for HotColdConfig {
    fn default() -> Self {
        Self {
            hot: PassConfig {
                background: BackgroundConfig::with_box_size(32),
                segment: SegmentConfig {
                    threshold: Threshold::Relative(3.0),
                    deblend: DeblendConfig {
                        n_thresholds: 16,
                        min_contrast: 0.05,
                    },
                    ..SegmentConfig::default()
                },
            },
            cold: PassConfig {
                background: BackgroundConfig::with_box_size(128),
                segment: SegmentConfig {
                    threshold: Threshold::Relative(1.5),
                    deblend: DeblendConfig {
                        n_thresholds: 64,
                        min_contrast: 0.001,
                    },
                    ..SegmentConfig::default()
                },
            },
            tolerance: 6.0,
            prefer_hot: false,
            calibration_npix_ceiling: DEFAULT_CALIBRATION_NPIX_CEILING,
        }
    }
}

impl HotColdConfig {
    pub fn validate(&self) -> Result<()> {
        self.hot.validate()?;
        self.cold.validate()?;
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(Error::invalid(
                "tolerance",
                format!("must be > 0, got {}", self.tolerance),
            ));
        }
        if self.calibration_npix_ceiling.is_nan() || self.calibration_npix_ceiling <= 0.0 {
            return Err(Error::invalid(
                "calibration_npix_ceiling",
                format!("must be > 0, got {}", self.calibration_npix_ceiling),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Results
// ============================================================================

/// Output of one detection run.
#[derive(Debug, Clone)]
pub struct DetectionRun {
    pub catalog: Catalog,
    pub segmap: SegmentationMap,
    pub background: Background,
}

impl DetectionRun {
    /// Estimate the background, subtract it and segment. Relative thresholds
    /// scale the global background rms.
    pub fn detect(image: &Image, exclude: Option<&Buffer2<bool>>, config: &PassConfig) -> Result<DetectionRun> {
        config.validate()?;
        let background = Background::estimate(image, exclude, &config.background)?;
        let subtracted = background.subtract_from(image)?;

        let mut segmenter =
            Segmenter::new(&subtracted, &config.segment).with_global_rms(background.global_rms);
        if let Some(exclude) = exclude {
            segmenter = segmenter.with_exclusion(exclude);
        }
        let (catalog, segmap) = segmenter.run()?;

        Ok(DetectionRun {
            catalog,
            segmap,
            background,
        })
    }
}

/// Nearest-peak matching between two catalogs.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub hot_matched: Vec<bool>,
    pub cold_matched: Vec<bool>,
    /// Per hot row: nearest cold row and its distance.
    pub hot_nearest: Vec<Option<(usize, f64)>>,
    /// Per cold row: nearest hot row and its distance.
    pub cold_nearest: Vec<Option<(usize, f64)>>,
}

impl MatchResult {
    pub fn hot_match_count(&self) -> usize {
        self.hot_matched.iter().filter(|&&m| m).count()
    }

    pub fn cold_match_count(&self) -> usize {
        self.cold_matched.iter().filter(|&&m| m).count()
    }
}

/// Median cold/hot shape ratios.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub axis_ratio: f64,
    pub npix_ratio: f64,
    pub hot_samples: usize,
    pub cold_samples: usize,
}

#[derive(Debug, Clone)]
pub struct Combined {
    pub catalog: Catalog,
    pub matches: MatchResult,
    pub calibration: Calibration,
}

#[derive(Debug, Clone)]
pub struct HotColdResult {
    pub hot: DetectionRun,
    pub cold: DetectionRun,
    pub combined: Combined,
}

// ============================================================================
// Matching and merging
// ============================================================================

/// Match rows of `hot` and `cold` by peak position: a row is matched when its
/// nearest peak in the other catalog is closer than `tolerance`.
pub fn match_peaks(hot: &Catalog, cold: &Catalog, tolerance: f64) -> MatchResult {
    let peaks = |catalog: &Catalog| -> Vec<(f64, f64)> {
        catalog.iter().map(|s| (s.x_peak, s.y_peak)).collect()
    };
    let hot_peaks = peaks(hot);
    let cold_peaks = peaks(cold);

    let hot_nearest: Vec<_> = hot_peaks.iter().map(|&p| nearest(p, &cold_peaks)).collect();
    let cold_nearest: Vec<_> = cold_peaks.iter().map(|&p| nearest(p, &hot_peaks)).collect();
    let matched = |n: &Option<(usize, f64)>| n.is_some_and(|(_, d)| d < tolerance);

    MatchResult {
        hot_matched: hot_nearest.iter().map(matched).collect(),
        cold_matched: cold_nearest.iter().map(matched).collect(),
        hot_nearest,
        cold_nearest,
    }
}

/// Ties go to the earlier row.
fn nearest(p: (f64, f64), others: &[(f64, f64)]) -> Option<(usize, f64)> {
    others
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| (i, (x - p.0).hypot(y - p.1)))
        .fold(None, |best, (i, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((i, d)),
        })
}

/// Median cold/hot ratios of `a` and `npix` over matched rows below the
/// pixel-count ceiling. Each side's subset is filtered independently.
pub fn calibrate(hot: &Catalog, cold: &Catalog, matches: &MatchResult, npix_ceiling: f64) -> Result<Calibration> {
    let subset = |catalog: &Catalog, matched: &[bool]| -> Vec<usize> {
        catalog
            .iter()
            .zip(matched)
            .enumerate()
            .filter(|(_, (s, &m))| m && s.npix < npix_ceiling)
            .map(|(i, _)| i)
            .collect()
    };
    let hot_rows = subset(hot, &matches.hot_matched);
    let cold_rows = subset(cold, &matches.cold_matched);

    let median_of = |catalog: &Catalog, rows: &[usize], f: fn(&Source) -> f64| {
        nanmedian(rows.iter().map(|&i| f(&catalog.sources[i])))
    };
    let ratio = |what: &str, f: fn(&Source) -> f64| -> Result<f64> {
        let (Some(c), Some(h)) = (median_of(cold, &cold_rows, f), median_of(hot, &hot_rows, f)) else {
            return Err(Error::InsufficientCalibrationData(format!(
                "no matched objects below {npix_ceiling} px to calibrate {what} ({} hot, {} cold)",
                hot_rows.len(),
                cold_rows.len()
            )));
        };
        let r = c / h;
        if !(r.is_finite() && r > 0.0) {
            return Err(Error::InsufficientCalibrationData(format!(
                "{what} ratio {c} / {h} is not a positive number"
            )));
        }
        Ok(r)
    };

    Ok(Calibration {
        axis_ratio: ratio("axis", |s| s.a)?,
        npix_ratio: ratio("npix", |s| s.npix)?,
        hot_samples: hot_rows.len(),
        cold_samples: cold_rows.len(),
    })
}

/// Merge the two catalogs.
///
/// Every hot row has `a`, `b` and `npix` rescaled by the calibration. The
/// preferred run contributes all of its rows, the other run only the rows
/// not matched to it. Rows are tagged with their pass.
pub fn combine(hot: &Catalog, cold: &Catalog, config: &HotColdConfig) -> Result<Combined> {
    config.validate()?;
    let matches = match_peaks(hot, cold, config.tolerance);
    let calibration = calibrate(hot, cold, &matches, config.calibration_npix_ceiling)?;

    let mut hot = hot.clone();
    for source in &mut hot.sources {
        source.a *= calibration.axis_ratio;
        source.b *= calibration.axis_ratio;
        source.npix *= calibration.npix_ratio;
    }
    hot.set_provenance(None, None, Some(Pass::Hot));
    let mut cold = cold.clone();
    cold.set_provenance(None, None, Some(Pass::Cold));

    let unmatched = |matched: &[bool]| -> Vec<bool> { matched.iter().map(|&m| !m).collect() };
    let catalog = if config.prefer_hot {
        Catalog::concat([&hot, &cold.filter_rows(&unmatched(&matches.cold_matched))])?
    } else {
        Catalog::concat([&cold, &hot.filter_rows(&unmatched(&matches.hot_matched))])?
    };

    tracing::info!(
        "Hot/cold: {} hot, {} cold, {} / {} matched, axis ratio {:.3}, npix ratio {:.3}, {} merged",
        hot.len(),
        cold.len(),
        matches.hot_match_count(),
        matches.cold_match_count(),
        calibration.axis_ratio,
        calibration.npix_ratio,
        catalog.len()
    );

    Ok(Combined {
        catalog,
        matches,
        calibration,
    })
}

/// Run both passes on `image` and merge them.
pub fn run_hot_cold(image: &Image, exclude: Option<&Buffer2<bool>>, config: &HotColdConfig) -> Result<HotColdResult> {
    config.validate()?;
    let hot = DetectionRun::detect(image, exclude, &config.hot)?;
    let cold = DetectionRun::detect(image, exclude, &config.cold)?;
    tracing::debug!("Hot run: {} objects, cold run: {} objects", hot.catalog.len(), cold.catalog.len());

    let combined = combine(&hot.catalog, &cold.catalog, config)?;
    Ok(HotColdResult { hot, cold, combined })
}
