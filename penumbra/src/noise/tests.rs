use super::*;
use crate::testing::{constant_image, disk_segmap};

fn seeded(seed: u64) -> NoiseReplaceConfig {
    NoiseReplaceConfig {
        seed: Some(seed),
        ..NoiseReplaceConfig::default()
    }
}

/// The `count` pixels nearest to `(cx, cy)`.
fn nearest_pixels(width: usize, height: usize, cx: f32, cy: f32, count: usize) -> Buffer2<bool> {
    let mut order: Vec<usize> = (0..width * height).collect();
    let d2 = |i: usize| {
        let dx = (i % width) as f32 - cx;
        let dy = (i / width) as f32 - cy;
        dx * dx + dy * dy
    };
    order.sort_by(|&a, &b| d2(a).total_cmp(&d2(b)).then(a.cmp(&b)));
    let mut region = Buffer2::new_filled(width, height, false);
    for &i in &order[..count] {
        region[i] = true;
    }
    region
}

#[test]
fn test_replaced_pixels_follow_background_statistics() {
    let image = constant_image(50, 50, 100.0);
    let background = Background::constant(50, 50, 100.0, 5.0);
    let region = nearest_pixels(50, 50, 25.0, 25.0, 200);

    let output = replace_with_noise(
        &image,
        &region,
        &background.rms,
        Some(&background.level),
        &seeded(42),
    )
    .unwrap();

    let samples: Vec<f64> = output
        .pixels
        .iter()
        .zip(region.iter())
        .filter(|(_, &r)| r)
        .map(|(&v, _)| v as f64)
        .collect();
    assert_eq!(samples.len(), 200);

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let std = (samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    let standard_error = 5.0 / n.sqrt();
    assert!(
        (mean - 100.0).abs() < 3.0 * standard_error,
        "mean {mean} outside 3 standard errors of 100"
    );
    assert!((std - 5.0).abs() < 1.0, "std {std} not within 20% of 5");
}

#[test]
fn test_pixels_outside_region_untouched() {
    let image = Image::new(Buffer2::from_fn(20, 20, |x, y| (x + 20 * y) as f32));
    let segmap = disk_segmap(20, 20, &[(10.0, 10.0, 3.0)]);
    let background = Background::constant(20, 20, 0.0, 1.0);

    let output = replace_footprints(&image, &segmap, &background, &seeded(1)).unwrap();
    for (i, (&before, &after)) in image.pixels.iter().zip(output.pixels.iter()).enumerate() {
        let (x, y) = image.pixels.coords(i);
        if segmap.label_at(x, y) == 0 {
            assert_eq!(before, after, "pixel ({x}, {y}) outside the footprint changed");
        }
    }
}

#[test]
fn test_missing_level_means_zero_mean() {
    let image = constant_image(64, 64, 1000.0);
    let region = Buffer2::new_filled(64, 64, true);
    let rms = Buffer2::new_filled(64, 64, 2.0);
    let output = replace_with_noise(&image, &region, &rms, None, &seeded(3)).unwrap();
    let mean = output.pixels.iter().map(|&v| v as f64).sum::<f64>() / output.pixels.len() as f64;
    assert!(mean.abs() < 0.2, "mean {mean} should be near zero");
}

#[test]
fn test_zero_rms_copies_level() {
    let image = constant_image(8, 8, 5.0);
    let region = Buffer2::from_fn(8, 8, |x, _| x < 4);
    let rms = Buffer2::new_filled(8, 8, 0.0);
    let level = Buffer2::new_filled(8, 8, -1.5);
    let output = replace_with_noise(&image, &region, &rms, Some(&level), &seeded(0)).unwrap();
    assert_eq!(output.get(0, 0), -1.5);
    assert_eq!(output.get(7, 7), 5.0);
}

#[test]
fn test_dilation_grows_region() {
    let image = constant_image(9, 9, 0.0);
    let mut region = Buffer2::new_filled(9, 9, false);
    region[(4, 4)] = true;
    let rms = Buffer2::new_filled(9, 9, 1.0);
    let level = Buffer2::new_filled(9, 9, 50.0);

    let config = NoiseReplaceConfig {
        dilate: Some(3),
        seed: Some(11),
    };
    let output = replace_with_noise(&image, &region, &rms, Some(&level), &config).unwrap();
    let changed = output.pixels.iter().filter(|&&v| v != 0.0).count();
    assert_eq!(changed, 9, "3x3 dilation should replace 9 pixels");
    assert!(output.get(3, 3) > 40.0 && output.get(5, 5) > 40.0);
    assert_eq!(output.get(2, 4), 0.0);
}

#[test]
fn test_seed_makes_draws_reproducible() {
    let image = constant_image(16, 16, 0.0);
    let region = Buffer2::new_filled(16, 16, true);
    let rms = Buffer2::new_filled(16, 16, 1.0);
    let a = replace_with_noise(&image, &region, &rms, None, &seeded(99)).unwrap();
    let b = replace_with_noise(&image, &region, &rms, None, &seeded(99)).unwrap();
    let c = replace_with_noise(&image, &region, &rms, None, &seeded(100)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_rejects_bad_inputs() {
    let image = constant_image(8, 8, 0.0);
    let region = Buffer2::new_filled(8, 8, true);
    let rms = Buffer2::new_filled(8, 7, 1.0);
    let err = replace_with_noise(&image, &region, &rms, None, &seeded(0)).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));

    let rms = Buffer2::new_filled(8, 8, -1.0);
    let err = replace_with_noise(&image, &region, &rms, None, &seeded(0)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));

    let rms = Buffer2::new_filled(8, 8, 1.0);
    let config = NoiseReplaceConfig {
        dilate: Some(0),
        seed: None,
    };
    assert!(replace_with_noise(&image, &region, &rms, None, &config).is_err());
}
