use serde::{Deserialize, Serialize};

use super::Catalog;
use crate::error::{Error, Result};
use crate::sky::angular_separation;

/// Coordinates used to measure separations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSpace {
    /// `ra`/`dec` in degrees; `min_separation` in arcseconds.
    #[default]
    Sky,
    /// `x`/`y` in pixels; `min_separation` in pixels.
    Pixel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub min_separation: f64,
    pub space: MatchSpace,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            min_separation: 0.7,
            space: MatchSpace::Sky,
        }
    }
}

impl DedupConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_separation.is_finite() && self.min_separation >= 0.0) {
            return Err(Error::invalid(
                "min_separation",
                format!("must be finite and >= 0, got {}", self.min_separation),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Deduplicated {
    pub catalog: Catalog,
    /// Per input row: whether it survived.
    pub kept: Vec<bool>,
    pub removed: usize,
}

/// Drop near-duplicate rows, keeping the first row of each close group.
///
/// Rows are visited in catalog order; every still-kept row suppresses all
/// later kept rows closer than `min_separation`. The result therefore depends
/// on input order: of two duplicates, the earlier one always survives.
pub fn deduplicate(catalog: &Catalog, config: &DedupConfig) -> Result<Deduplicated> {
    config.validate()?;

    let positions: Vec<(f64, f64)> = match config.space {
        MatchSpace::Sky => catalog
            .sources
            .iter()
            .enumerate()
            .map(|(row, s)| s.sky().ok_or(Error::MissingSkyPosition { row }))
            .collect::<Result<_>>()?,
        MatchSpace::Pixel => catalog.sources.iter().map(|s| (s.x, s.y)).collect(),
    };

    let separation = |i: usize, j: usize| -> f64 {
        let (x1, y1) = positions[i];
        let (x2, y2) = positions[j];
        match config.space {
            MatchSpace::Sky => angular_separation(x1, y1, x2, y2) * 3600.0,
            MatchSpace::Pixel => ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt(),
        }
    };

    let n = positions.len();
    let mut kept = vec![true; n];
    for i in 0..n {
        if !kept[i] {
            continue;
        }
        for j in (i + 1)..n {
            if kept[j] && separation(i, j) < config.min_separation {
                kept[j] = false;
            }
        }
    }

    let removed = kept.iter().filter(|&&k| !k).count();
    tracing::info!(
        "Deduplication: {} rows in, {} duplicates removed (min separation {})",
        n,
        removed,
        config.min_separation
    );

    Ok(Deduplicated {
        catalog: catalog.filter_rows(&kept),
        kept,
        removed,
    })
}
