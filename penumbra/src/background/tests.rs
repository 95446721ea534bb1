//! Tests for background estimation.

use super::*;
use crate::testing::{add_gaussian_noise, constant_image};

fn unfiltered(box_size: usize) -> BackgroundConfig {
    BackgroundConfig {
        box_size,
        filter_fraction: 0.0,
        ..BackgroundConfig::default()
    }
}

#[test]
fn test_uniform_background() {
    let image = constant_image(96, 64, 250.0);
    let bg = Background::estimate(&image, None, &unfiltered(32)).unwrap();

    assert_eq!(bg.shape(), (96, 64));
    for &v in bg.level.iter() {
        assert!((v - 250.0).abs() < 1e-4, "level {v}, expected 250");
    }
    assert_eq!(bg.global_rms, 0.0);
}

#[test]
fn test_noise_rms_recovered() {
    let mut image = constant_image(128, 128, 100.0);
    add_gaussian_noise(&mut image, 5.0, 7);
    let bg = Background::estimate(&image, None, &unfiltered(32)).unwrap();

    assert!(
        (bg.global_level - 100.0).abs() < 0.5,
        "global level {} should be close to 100",
        bg.global_level
    );
    assert!(
        (bg.global_rms - 5.0).abs() < 0.5,
        "global rms {} should be close to 5",
        bg.global_rms
    );
}

#[test]
fn test_gradient_preserved() {
    let pixels = Buffer2::from_fn(128, 128, |x, _| x as f32);
    let bg = Background::estimate(&Image::new(pixels), None, &unfiltered(16)).unwrap();

    let left = bg.level_at(8, 64);
    let right = bg.level_at(120, 64);
    assert!(right > left + 90.0, "gradient lost: left {left}, right {right}");
    assert!((bg.level_at(64, 64) - 64.0).abs() < 1.5);
}

#[test]
fn test_excluded_pixels_do_not_bias_level() {
    let mut image = constant_image(64, 64, 10.0);
    let mut exclude = Buffer2::new_filled(64, 64, false);
    // A bright blob covering most of one box would drag its median up.
    for y in 0..24 {
        for x in 0..24 {
            image.pixels[(x, y)] = 1000.0;
            exclude[(x, y)] = true;
        }
    }

    let config = BackgroundConfig {
        min_valid_fraction: 0.0,
        ..unfiltered(32)
    };
    let masked = Background::estimate(&image, Some(&exclude), &config).unwrap();
    assert!((masked.level_at(5, 5) - 10.0).abs() < 1e-4);

    let unmasked = Background::estimate(&image, None, &config).unwrap();
    assert!(unmasked.box_grids().0[(0, 0)] > 10.0, "unmasked box is biased");
}

#[test]
fn test_sparse_box_filled_from_neighbours() {
    let image = constant_image(64, 64, 42.0);
    let mut exclude = Buffer2::new_filled(64, 64, false);
    for y in 0..32 {
        for x in 0..32 {
            exclude[(x, y)] = true;
        }
    }
    let bg = Background::estimate(&image, Some(&exclude), &unfiltered(32)).unwrap();
    assert_eq!(bg.box_grids().0[(0, 0)], 42.0);
}

#[test]
fn test_everything_excluded_fails() {
    let image = constant_image(16, 16, 1.0);
    let exclude = Buffer2::new_filled(16, 16, true);
    let err = Background::estimate(&image, Some(&exclude), &unfiltered(8)).unwrap_err();
    assert!(matches!(err, Error::InvalidParameter { .. }));
}

#[test]
fn test_zero_box_size_is_invalid() {
    let image = constant_image(16, 16, 1.0);
    let err = Background::estimate(&image, None, &BackgroundConfig::with_box_size(0)).unwrap_err();
    assert!(
        matches!(err, Error::InvalidParameter { name: "box_size", .. }),
        "unexpected {err:?}"
    );
}

#[test]
fn test_exclusion_shape_checked() {
    let image = constant_image(16, 16, 1.0);
    let exclude = Buffer2::new_filled(15, 16, false);
    let err = Background::estimate(&image, Some(&exclude), &unfiltered(8)).unwrap_err();
    assert!(matches!(err, Error::ShapeMismatch { .. }));
}

#[test]
fn test_filter_boxes_is_odd() {
    let cfg = BackgroundConfig {
        box_size: 10,
        filter_fraction: 0.4,
        ..BackgroundConfig::default()
    };
    assert_eq!(cfg.filter_boxes(), 5);
    let cfg = BackgroundConfig {
        box_size: 10,
        filter_fraction: 0.3,
        ..BackgroundConfig::default()
    };
    assert_eq!(cfg.filter_boxes(), 3);
    assert_eq!(unfiltered(64).filter_boxes(), 1);
}

#[test]
fn test_median_filter_removes_single_outlier_box() {
    let mut pixels = Buffer2::new_filled(48, 48, 5.0);
    for y in 16..32 {
        for x in 16..32 {
            pixels[(x, y)] = 80.0;
        }
    }
    let config = BackgroundConfig {
        box_size: 16,
        filter_fraction: 3.0 / 16.0,
        ..BackgroundConfig::default()
    };
    let bg = Background::estimate(&Image::new(pixels), None, &config).unwrap();
    assert_eq!(bg.box_grids().0[(1, 1)], 5.0, "3x3 filter removes the centre box");
}

#[test]
fn test_box_larger_than_image() {
    let mut image = constant_image(64, 48, 100.0);
    add_gaussian_noise(&mut image, 2.0, 5);
    let bg = Background::estimate(&image, None, &BackgroundConfig::with_box_size(1 << 20)).unwrap();

    assert_eq!(bg.shape(), (64, 48));
    assert_eq!(bg.box_grids().0.shape(), (1, 1));
    assert!((bg.global_level - 100.0).abs() < 0.5, "level {}", bg.global_level);
    assert!(bg.level.iter().all(|&v| v == bg.global_level));
}

#[test]
fn test_filter_window_wider_than_grid() {
    let grid = Buffer2::new(3, 1, vec![1.0, 9.0, 2.0]);
    let filtered = median_filter_grid(&grid, 1_000_001);
    assert_eq!(filtered.pixels(), &[2.0, 2.0, 2.0]);
}

#[test]
fn test_subtract_from() {
    let image = constant_image(20, 20, 7.0);
    let bg = Background::constant(20, 20, 2.0, 1.0);
    let sub = bg.subtract_from(&image).unwrap();
    assert!(sub.pixels.iter().all(|&v| v == 5.0));
}
