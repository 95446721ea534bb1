use super::*;
use crate::testing::{add_gaussian, add_gaussian_noise, constant_image, disk_segmap};

fn ellipse(x: f64, y: f64, a: f64, b: f64, theta: f64) -> Source {
    Source {
        x,
        y,
        a,
        b,
        theta,
        ..Source::default()
    }
}

#[test]
fn test_paint_circle() {
    let mut mask = Buffer2::new_filled(21, 21, false);
    let catalog = Catalog::from_sources(vec![ellipse(10.0, 10.0, 2.0, 2.0, 0.0)]);
    paint_ellipses(&mut mask, &catalog, 1.0);
    assert!(mask[(12, 10)] && mask[(10, 8)]);
    assert!(!mask[(13, 10)]);
    assert!(!mask[(12, 12)], "corner at distance 2.83 lies outside");
}

#[test]
fn test_paint_rotated_ellipse() {
    let mut mask = Buffer2::new_filled(30, 30, false);
    let catalog = Catalog::from_sources(vec![ellipse(15.0, 15.0, 4.0, 1.0, std::f64::consts::FRAC_PI_2)]);
    paint_ellipses(&mut mask, &catalog, 1.0);
    assert!(mask[(15, 18)], "major axis points along +y");
    assert!(!mask[(19, 15)]);
}

#[test]
fn test_paint_scale_grows_ellipse() {
    let mut mask = Buffer2::new_filled(30, 30, false);
    let catalog = Catalog::from_sources(vec![ellipse(15.0, 15.0, 2.0, 1.0, 0.0)]);
    paint_ellipses(&mut mask, &catalog, 3.0);
    assert!(mask[(21, 15)] && mask[(15, 18)]);
    assert!(!mask[(22, 15)] && !mask[(15, 19)]);
}

#[test]
fn test_paint_ignores_degenerate_rows_and_edges() {
    let mut mask = Buffer2::new_filled(10, 10, false);
    let catalog = Catalog::from_sources(vec![
        ellipse(5.0, 5.0, 0.0, 0.0, 0.0),
        ellipse(-1.0, -1.0, 2.0, 2.0, 0.0),
    ]);
    paint_ellipses(&mut mask, &catalog, 1.0);
    assert_eq!(mask.iter().filter(|&&m| m).count(), 1, "only the corner pixel of the clipped disk");
    assert!(mask[(0, 0)]);
}

#[test]
fn test_grown_segmentation_extends_footprints() {
    let segmap = disk_segmap(40, 40, &[(20.0, 20.0, 2.0)]);
    let exact = grown_segmentation(&segmap, 0.0, 0.01).unwrap();
    assert_eq!(exact, segmap.nonzero());

    let grown = grown_segmentation(&segmap, 2.0, 0.01).unwrap();
    let footprint = exact.iter().filter(|&&m| m).count();
    let masked = grown.iter().filter(|&&m| m).count();
    assert!(masked > 2 * footprint, "grown mask {masked} vs footprint {footprint}");
    assert!(exact.iter().zip(grown.iter()).all(|(&e, &g)| !e || g), "growth must cover the footprint");
    assert!(!grown[(0, 0)]);
}

#[test]
fn test_phot_mask_spares_target() {
    crate::testing::init_tracing();
    let mut image = constant_image(128, 128, 100.0);
    add_gaussian(&mut image, 64.0, 64.0, 80.0, 4.0);
    add_gaussian(&mut image, 20.0, 20.0, 60.0, 2.0);
    add_gaussian_noise(&mut image, 2.0, 21);

    let mut mask = Mask::new(128, 128);
    mask.set(100, 5, MaskPlane::Bad);
    mask.set(5, 100, MaskPlane::Detected);

    let config = PhotMaskConfig {
        seg_rmin: 10.0,
        obj_rmin: 10.0,
        ..PhotMaskConfig::default()
    };
    let output = make_phot_mask(&image, Some(&mask), &config).unwrap();

    assert!(!output[(64, 64)], "target must stay unmasked");
    assert!(output[(20, 20)], "neighbour must be masked");
    assert!(output[(100, 5)], "bad pixel from the input mask");
    assert!(!output[(5, 100)], "DETECTED alone is not a bad pixel");

    let without_input = PhotMaskConfig {
        use_input_mask: false,
        ..config
    };
    let output = make_phot_mask(&image, Some(&mask), &without_input).unwrap();
    assert!(!output[(100, 5)]);
}

#[test]
fn test_phot_mask_validation() {
    let image = constant_image(16, 16, 0.0);
    let config = PhotMaskConfig {
        mask_threshold: 0.0,
        ..PhotMaskConfig::default()
    };
    assert!(make_phot_mask(&image, None, &config).is_err());

    let mask = Mask::new(15, 16);
    let err = make_phot_mask(&image, Some(&mask), &PhotMaskConfig::default()).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}
