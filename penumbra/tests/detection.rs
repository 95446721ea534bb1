//! End-to-end checks through the public API.

use penumbra::{
    apply_selection, associate, deduplicate, replace_with_noise, run_hot_cold, segment,
    AssociateConfig, Background, BackgroundConfig, Catalog, DedupConfig, HotColdConfig, Image,
    Mask, MaskPlane, MatchSpace, NoiseReplaceConfig, SegmentConfig, Seeds, SelectionRule, Source,
    Threshold,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn add_gaussian(image: &mut Image, cx: f32, cy: f32, amplitude: f32, sigma: f32) {
    let width = image.width();
    for (i, v) in image.pixels.iter_mut().enumerate() {
        let dx = (i % width) as f32 - cx;
        let dy = (i / width) as f32 - cy;
        *v += amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
    }
}

fn add_noise(image: &mut Image, sigma: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for v in image.pixels.iter_mut() {
        let n: f32 = rng.sample(StandardNormal);
        *v += sigma * n;
    }
}

#[test]
fn constant_image_has_no_sources() {
    let image = Image::filled(64, 64, 100.0);
    let config = SegmentConfig {
        threshold: Threshold::Absolute(100.01),
        ..SegmentConfig::default()
    };
    let (catalog, segmap) = segment(&image, None, &config).unwrap();
    assert!(catalog.is_empty());
    assert!(segmap.is_empty());
}

#[test]
fn single_blob_gives_one_row() {
    init_tracing();
    let mut image = Image::filled(50, 50, 100.0);
    add_gaussian(&mut image, 25.0, 25.0, 150.0, 3.0);
    let config = SegmentConfig {
        threshold: Threshold::Absolute(120.0),
        ..SegmentConfig::default()
    };
    let (catalog, segmap) = segment(&image, None, &config).unwrap();

    assert_eq!(catalog.len(), 1);
    let row = &catalog.sources[0];
    assert!((row.x - 25.0).abs() < 0.1 && (row.y - 25.0).abs() < 0.1);
    assert_eq!((row.x_peak, row.y_peak), (25.0, 25.0));
    assert_eq!(segmap.label_at(25, 25), 1);
    assert_eq!(segmap.label_at(0, 0), 0);
}

#[test]
fn noise_replacement_matches_sky_statistics() {
    let mut image = Image::filled(60, 60, 100.0);
    add_noise(&mut image, 2.0, 1);
    let background = Background::estimate(&image, None, &BackgroundConfig::with_box_size(30)).unwrap();

    let mut region = common::Buffer2::new_filled(60, 60, false);
    for y in 10..50 {
        for x in 10..50 {
            region[(x, y)] = true;
        }
    }
    let config = NoiseReplaceConfig {
        seed: Some(42),
        ..NoiseReplaceConfig::default()
    };
    let replaced =
        replace_with_noise(&image, &region, &background.rms, Some(&background.level), &config).unwrap();

    let values: Vec<f32> = (0..replaced.pixels.len())
        .filter(|&i| region[i])
        .map(|i| replaced.pixels[i])
        .collect();
    let mean = values.iter().sum::<f32>() / values.len() as f32;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / values.len() as f32;
    assert!((mean - 100.0).abs() < 0.3, "mean {mean}");
    assert!((var.sqrt() - 2.0).abs() < 0.3, "std {}", var.sqrt());
    assert_eq!(replaced.get(0, 0), image.get(0, 0));
}

#[test]
fn association_is_idempotent() {
    let mut image = Image::filled(80, 80, 0.0);
    for &(x, y) in &[(20.0, 20.0), (60.0, 60.0)] {
        add_gaussian(&mut image, x, y, 50.0, 2.5);
    }
    let config = SegmentConfig {
        threshold: Threshold::Absolute(5.0),
        ..SegmentConfig::default()
    };
    let (catalog, segmap) = segment(&image, None, &config).unwrap();
    assert_eq!(catalog.len(), 2);

    let mut mask = Mask::new(80, 80);
    mask.set(22, 20, MaskPlane::BrightObject);
    let assoc = AssociateConfig::default();
    let once = associate(&catalog, &segmap, Seeds::Mask(&mask), &assoc).unwrap();
    let twice = associate(&once.catalog, &once.segmap, Seeds::Mask(&mask), &assoc).unwrap();

    assert_eq!(once.len(), 1);
    assert_eq!(once.catalog.sources, twice.catalog.sources);
    assert_eq!(once.segmap, twice.segmap);
}

#[test]
fn hot_cold_merge_size() {
    let mut image = Image::filled(128, 128, 100.0);
    for &(x, y) in &[(30.0, 30.0), (90.0, 40.0), (60.0, 100.0)] {
        add_gaussian(&mut image, x, y, 60.0, 2.5);
    }
    add_noise(&mut image, 2.0, 8);

    for prefer_hot in [false, true] {
        let config = HotColdConfig {
            prefer_hot,
            ..HotColdConfig::default()
        };
        let result = run_hot_cold(&image, None, &config).unwrap();
        let matches = &result.combined.matches;
        let dropped = if prefer_hot {
            matches.cold_match_count()
        } else {
            matches.hot_match_count()
        };
        assert_eq!(
            result.combined.catalog.len(),
            result.hot.catalog.len() + result.cold.catalog.len() - dropped
        );
    }
}

fn sky_row(ra: f64, dec: f64) -> Source {
    Source {
        ra: Some(ra),
        dec: Some(dec),
        ..Source::default()
    }
}

#[test]
fn dedup_keeps_first_of_close_pair() {
    let arcsec = 1.0 / 3600.0;
    let catalog = Catalog::from_sources(vec![
        sky_row(150.0, 2.0),
        sky_row(150.0, 2.0 + 0.5 * arcsec),
        sky_row(150.0, 2.0 + 5.0 * arcsec),
    ]);
    let result = deduplicate(&catalog, &DedupConfig::default()).unwrap();
    assert_eq!(result.kept, vec![true, false, true]);

    let pixel = DedupConfig {
        min_separation: 1.0,
        space: MatchSpace::Pixel,
    };
    let rows = Catalog::from_sources(vec![Source::default(), Source::default()]);
    assert_eq!(deduplicate(&rows, &pixel).unwrap().catalog.len(), 1);
}

#[test]
fn empty_selection_is_identity() {
    let catalog = Catalog::from_sources(
        (0..5)
            .map(|i| Source {
                id: i + 1,
                x: i as f64,
                ..Source::default()
            })
            .collect(),
    );
    let selection = apply_selection(&catalog, &[]).unwrap();
    assert_eq!(selection.catalog.sources, catalog.sources);

    let unset = SelectionRule {
        threshold: None,
        ..SelectionRule::min("no_such_column", 0.0)
    };
    let selection = apply_selection(&catalog, &[unset]).unwrap();
    assert_eq!(selection.after, 5);

    let cut = apply_selection(&catalog, &[SelectionRule::min("x", 2.0)]).unwrap();
    assert_eq!(cut.after, 2);
    assert!(cut.catalog.iter().all(|s| s.x > 2.0));
}
