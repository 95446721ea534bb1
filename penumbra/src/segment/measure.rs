//! Catalog measurements from footprint pixels.

use std::f64::consts::PI;

use common::Buffer2;

use crate::catalog::Source;

/// Floor added to both second moments of degenerate footprints (a single
/// pixel has variance 1/12 along each axis).
const MOMENT_FLOOR: f64 = 1.0 / 12.0;

/// Measure one footprint of `pixels` (flat indices) on `values`.
///
/// Centroid and second moments are weighted by the positive pixel values,
/// falling back to uniform weights when no pixel is positive.
pub(super) fn measure(label: u32, pixels: &[usize], values: &Buffer2<f32>) -> Source {
    let width = values.width();
    let xy = |idx: usize| ((idx % width) as f64, (idx / width) as f64);

    let mut flux = 0.0;
    let mut peak_idx = pixels[0];
    for &idx in pixels {
        let v = values[idx] as f64;
        flux += v;
        if values[idx] > values[peak_idx] {
            peak_idx = idx;
        }
    }

    let positive: f64 = pixels.iter().map(|&i| (values[i] as f64).max(0.0)).sum();
    let weight = |idx: usize| {
        if positive > 0.0 {
            (values[idx] as f64).max(0.0)
        } else {
            1.0
        }
    };
    let total: f64 = pixels.iter().map(|&i| weight(i)).sum();

    let (mut cx, mut cy) = (0.0, 0.0);
    for &idx in pixels {
        let (x, y) = xy(idx);
        let w = weight(idx);
        cx += w * x;
        cy += w * y;
    }
    cx /= total;
    cy /= total;

    let (mut x2, mut y2, mut xy2) = (0.0, 0.0, 0.0);
    for &idx in pixels {
        let (x, y) = xy(idx);
        let w = weight(idx);
        let dx = x - cx;
        let dy = y - cy;
        x2 += w * dx * dx;
        y2 += w * dy * dy;
        xy2 += w * dx * dy;
    }
    x2 /= total;
    y2 /= total;
    xy2 /= total;

    if x2 * y2 - xy2 * xy2 < MOMENT_FLOOR * MOMENT_FLOOR {
        x2 += MOMENT_FLOOR;
        y2 += MOMENT_FLOOR;
    }

    let (a, b, theta) = ellipse_from_moments(x2, y2, xy2);
    let (x_peak, y_peak) = xy(peak_idx);
    let npix = pixels.len() as f64;

    Source {
        id: label as u64,
        x: cx,
        y: cy,
        x_peak,
        y_peak,
        peak: values[peak_idx] as f64,
        flux,
        npix,
        a,
        b,
        theta,
        r_circ: (npix / PI).sqrt(),
        ..Source::default()
    }
}

/// Semi-axes and position angle of the ellipse with the given second moments.
pub(crate) fn ellipse_from_moments(x2: f64, y2: f64, xy: f64) -> (f64, f64, f64) {
    let mean = 0.5 * (x2 + y2);
    let diff = (0.5 * (x2 - y2)).hypot(xy);
    let a = (mean + diff).max(0.0).sqrt();
    let b = (mean - diff).max(0.0).sqrt();
    let theta = 0.5 * (2.0 * xy).atan2(x2 - y2);
    (a, b, theta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_moments() {
        let (a, b, _) = ellipse_from_moments(4.0, 4.0, 0.0);
        assert!((a - 2.0).abs() < 1e-12);
        assert!((b - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_elongated_along_diagonal() {
        let (a, b, theta) = ellipse_from_moments(5.0, 5.0, 3.0);
        assert!((a - 8f64.sqrt()).abs() < 1e-12);
        assert!((b - 2f64.sqrt()).abs() < 1e-12);
        assert!((theta - PI / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_single_pixel_gets_floor() {
        let values = Buffer2::new_filled(3, 3, 1.0);
        let source = measure(1, &[4], &values);
        assert_eq!((source.x, source.y), (1.0, 1.0));
        assert!(source.a > 0.0 && source.b > 0.0);
        assert_eq!(source.npix, 1.0);
    }

    #[test]
    fn test_flux_weighted_centroid() {
        let mut values = Buffer2::new_filled(4, 1, 0.0);
        values[(1, 0)] = 1.0;
        values[(2, 0)] = 3.0;
        let source = measure(2, &[1, 2], &values);
        assert!((source.x - 1.75).abs() < 1e-12);
        assert_eq!(source.x_peak, 2.0);
        assert_eq!(source.flux, 4.0);
        assert_eq!(source.id, 2);
    }
}
