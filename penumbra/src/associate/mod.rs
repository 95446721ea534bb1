//! Footprint association: keep the footprints that sit near seed pixels.
//!
//! A footprint is associated when any pixel inside the disk of `radius`
//! around the mean of its peak positions carries a seed flag (or, with point
//! seeds, when a seed point lies inside that disk). The boundary is inclusive.


use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::image::{FootprintInfo, Mask, MaskFlags, MaskPlane, SegmentationMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociateConfig {
    /// Association radius in pixels.
    pub radius: f64,
    /// Mask planes that count as seeds, by name.
    pub seed_planes: Vec<String>,
}

impl Default for AssociateConfig {
    fn default() -> Self {
        Self {
            radius: 15.0,
            seed_planes: vec![
                MaskPlane::ThreshHigh.to_string(),
                MaskPlane::BrightObject.to_string(),
            ],
        }
    }
}

impl AssociateConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.radius.is_finite() && self.radius >= 0.0) {
            return Err(Error::invalid(
                "radius",
                format!("must be finite and >= 0, got {}", self.radius),
            ));
        }
        Ok(())
    }

    /// Resolve `seed_planes`, failing with `MissingFlag` on unknown names.
    pub fn seed_flags(&self) -> Result<MaskFlags> {
        MaskFlags::from_names(&self.seed_planes)
    }
}

/// What footprints are associated with.
#[derive(Debug, Clone, Copy)]
pub enum Seeds<'a> {
    /// Pixels of this mask carrying any of the configured seed planes.
    Mask(&'a Mask),
    /// Explicit seed positions in local pixel coordinates.
    Points(&'a [DVec2]),
}

/// Associated footprints, renumbered `1..=m`, and their catalog rows.
#[derive(Debug, Clone)]
pub struct Association {
    pub catalog: Catalog,
    pub segmap: SegmentationMap,
    /// Per input footprint: whether it was associated.
    pub associated: Vec<bool>,
}

impl Association {
    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    /// The complement: footprints of the input `segmap` (and rows of
    /// `catalog`) that were not associated, renumbered the same way.
    pub fn unassociated(
        &self,
        catalog: &Catalog,
        segmap: &SegmentationMap,
    ) -> Result<(Catalog, SegmentationMap)> {
        if segmap.len() != self.associated.len() || catalog.len() != self.associated.len() {
            return Err(Error::invalid(
                "segmap",
                format!(
                    "association covered {} footprints, got {} footprints and {} rows",
                    self.associated.len(),
                    segmap.len(),
                    catalog.len()
                ),
            ));
        }
        let keep: Vec<bool> = self.associated.iter().map(|&a| !a).collect();
        Ok((renumbered(catalog.filter_rows(&keep)), segmap.retain_labels(&keep)?))
    }
}

fn renumbered(mut catalog: Catalog) -> Catalog {
    for (row, source) in catalog.sources.iter_mut().enumerate() {
        source.id = row as u64 + 1;
    }
    catalog
}

/// Keep the footprints of `segmap` (and rows of `catalog`) associated with `seeds`.
///
/// `catalog` row `L - 1` must describe label `L`. Surviving rows get their
/// new label as `id`, so running the association again on the result is a
/// no-op.
pub fn associate(
    catalog: &Catalog,
    segmap: &SegmentationMap,
    seeds: Seeds<'_>,
    config: &AssociateConfig,
) -> Result<Association> {
    config.validate()?;
    let flags = config.seed_flags()?;

    if catalog.len() != segmap.len() {
        return Err(Error::invalid(
            "catalog",
            format!(
                "{} rows for {} footprints; row L-1 must describe label L",
                catalog.len(),
                segmap.len()
            ),
        ));
    }
    if let Seeds::Mask(mask) = seeds {
        if mask.shape() != segmap.shape() {
            return Err(Error::shape("seed mask", segmap.shape(), mask.shape()));
        }
    }

    let associated: Vec<bool> = segmap
        .footprints()
        .iter()
        .map(|footprint| match seeds {
            Seeds::Mask(mask) => near_flagged_pixel(footprint, mask, flags, config.radius),
            Seeds::Points(points) => near_point(footprint, points, config.radius),
        })
        .collect();

    let segmap = segmap.retain_labels(&associated)?;
    let catalog = renumbered(catalog.filter_rows(&associated));

    tracing::info!(
        "Association: {} of {} footprints within {} px of seeds",
        catalog.len(),
        associated.len(),
        config.radius
    );

    Ok(Association {
        catalog,
        segmap,
        associated,
    })
}

fn near_flagged_pixel(footprint: &FootprintInfo, mask: &Mask, flags: MaskFlags, radius: f64) -> bool {
    if flags.is_empty() {
        return false;
    }
    let center = footprint.mean_peak();
    let (width, height) = mask.shape();
    if width == 0 || height == 0 {
        return false;
    }
    let r2 = radius * radius;

    let x_lo = (center.x - radius).ceil().max(0.0) as usize;
    let y_lo = (center.y - radius).ceil().max(0.0) as usize;
    let x_hi = (center.x + radius).floor().min((width - 1) as f64);
    let y_hi = (center.y + radius).floor().min((height - 1) as f64);
    if x_hi < 0.0 || y_hi < 0.0 {
        return false;
    }
    let (x_hi, y_hi) = (x_hi as usize, y_hi as usize);

    for y in y_lo..=y_hi {
        let dy = y as f64 - center.y;
        for x in x_lo..=x_hi {
            let dx = x as f64 - center.x;
            if dx * dx + dy * dy <= r2 && mask.has(x, y, flags) {
                return true;
            }
        }
    }
    false
}

fn near_point(footprint: &FootprintInfo, points: &[DVec2], radius: f64) -> bool {
    let center = footprint.mean_peak();
    points.iter().any(|p| p.distance_squared(center) <= radius * radius)
}
