//! Tangent-plane world coordinates and angular separations.

use glam::{DMat2, DVec2, IVec2};
use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;
use crate::error::{Error, Result};

/// Gnomonic (TAN) world coordinate system.
///
/// `crpix` is in mosaic pixel coordinates, `crval` is (RA, Dec) in degrees and
/// `cd` maps pixel offsets to intermediate world coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wcs {
    pub crpix: DVec2,
    pub crval: DVec2,
    pub cd: DMat2,
}

impl Wcs {
    /// North-up WCS with `pixel_scale` arcsec/pixel, rotated by `rotation` degrees.
    /// RA increases towards -x, as on the sky.
    pub fn from_scale_rotation(crpix: DVec2, crval: DVec2, pixel_scale: f64, rotation: f64) -> Self {
        let scale_deg = pixel_scale / 3600.0;
        let (sin_r, cos_r) = rotation.to_radians().sin_cos();
        let cd = DMat2::from_cols(
            DVec2::new(-scale_deg * cos_r, scale_deg * sin_r),
            DVec2::new(scale_deg * sin_r, scale_deg * cos_r),
        );
        Self { crpix, crval, cd }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cd.determinant().abs() <= 1e-20 {
            return Err(Error::invalid("wcs.cd", "CD matrix is singular"));
        }
        Ok(())
    }

    /// Pixel position to (RA, Dec) in degrees, RA normalised to `[0, 360)`.
    pub fn pixel_to_sky(&self, pixel: DVec2) -> DVec2 {
        let world = self.cd * (pixel - self.crpix);
        let xi = world.x.to_radians();
        let eta = world.y.to_radians();

        let ra0 = self.crval.x.to_radians();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let denom = cos_dec0 - eta * sin_dec0;

        let ra = (ra0 + xi.atan2(denom)).to_degrees().rem_euclid(360.0);
        let dec = (sin_dec0 + eta * cos_dec0).atan2((xi * xi + denom * denom).sqrt());
        DVec2::new(ra, dec.to_degrees())
    }

    /// (RA, Dec) in degrees to pixel position.
    pub fn sky_to_pixel(&self, sky: DVec2) -> DVec2 {
        let (sin_dec, cos_dec) = sky.y.to_radians().sin_cos();
        let (sin_dec0, cos_dec0) = self.crval.y.to_radians().sin_cos();
        let (sin_dra, cos_dra) = (sky.x - self.crval.x).to_radians().sin_cos();

        let d = sin_dec * sin_dec0 + cos_dec * cos_dec0 * cos_dra;
        let xi = (cos_dec * sin_dra / d).to_degrees();
        let eta = ((sin_dec * cos_dec0 - cos_dec * sin_dec0 * cos_dra) / d).to_degrees();

        self.crpix + self.cd.inverse() * DVec2::new(xi, eta)
    }

    pub fn pixel_scale_arcsec(&self) -> f64 {
        self.cd.determinant().abs().sqrt() * 3600.0
    }
}

/// Great-circle separation in degrees (Vincenty formula).
pub fn angular_separation(ra1: f64, dec1: f64, ra2: f64, dec2: f64) -> f64 {
    let delta_ra = (ra2 - ra1).to_radians();
    let (sin_dec1, cos_dec1) = dec1.to_radians().sin_cos();
    let (sin_dec2, cos_dec2) = dec2.to_radians().sin_cos();
    let (sin_dra, cos_dra) = delta_ra.sin_cos();

    let term1 = (cos_dec2 * sin_dra).powi(2);
    let term2 = (cos_dec1 * sin_dec2 - sin_dec1 * cos_dec2 * cos_dra).powi(2);
    let numerator = (term1 + term2).sqrt();
    let denominator = sin_dec1 * sin_dec2 + cos_dec1 * cos_dec2 * cos_dra;

    numerator.atan2(denominator).to_degrees()
}

impl Catalog {
    /// Fill `ra`/`dec` of every row from its local pixel centroid placed at `origin`.
    pub fn assign_sky(&mut self, wcs: &Wcs, origin: IVec2) -> Result<()> {
        wcs.validate()?;
        let offset = DVec2::new(origin.x as f64, origin.y as f64);
        for source in &mut self.sources {
            let sky = wcs.pixel_to_sky(DVec2::new(source.x, source.y) + offset);
            source.ra = Some(sky.x);
            source.dec = Some(sky.y);
        }
        Ok(())
    }
}
