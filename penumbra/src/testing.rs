//! Synthetic data for tests.

#![allow(dead_code)]

use common::Buffer2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::image::{Image, SegmentationMap};

/// Initialize tracing subscriber for tests.
/// Safe to call multiple times - will only initialize once.
/// Respects RUST_LOG env var, defaults to "info".
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn constant_image(width: usize, height: usize, value: f32) -> Image {
    Image::filled(width, height, value)
}

/// Add a circular Gaussian of peak `amplitude` and width `sigma` centred at `(cx, cy)`.
pub fn add_gaussian(image: &mut Image, cx: f32, cy: f32, amplitude: f32, sigma: f32) {
    let two_s2 = 2.0 * sigma * sigma;
    let width = image.width();
    for (i, v) in image.pixels.iter_mut().enumerate() {
        let dx = (i % width) as f32 - cx;
        let dy = (i / width) as f32 - cy;
        *v += amplitude * (-(dx * dx + dy * dy) / two_s2).exp();
    }
}

/// Constant background with one Gaussian blob.
pub fn gaussian_blob(
    width: usize,
    height: usize,
    background: f32,
    center: (f32, f32),
    amplitude: f32,
    sigma: f32,
) -> Image {
    let mut image = constant_image(width, height, background);
    add_gaussian(&mut image, center.0, center.1, amplitude, sigma);
    image
}

/// Add seeded zero-mean Gaussian noise with standard deviation `sigma`.
pub fn add_gaussian_noise(image: &mut Image, sigma: f32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for v in image.pixels.iter_mut() {
        let n: f32 = rng.sample(StandardNormal);
        *v += sigma * n;
    }
}

/// Boolean disk of pixels within `radius` of `(cx, cy)`.
pub fn disk(width: usize, height: usize, cx: f32, cy: f32, radius: f32) -> Buffer2<bool> {
    Buffer2::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        dx * dx + dy * dy <= radius * radius
    })
}

/// Segmentation map with one disk footprint per `(cx, cy, radius)`, labelled in order.
pub fn disk_segmap(width: usize, height: usize, disks: &[(f32, f32, f32)]) -> SegmentationMap {
    let mut labels = Buffer2::new_default(width, height);
    let mut values = Buffer2::new_filled(width, height, 0.0f32);
    for (i, &(cx, cy, r)) in disks.iter().enumerate() {
        let footprint = disk(width, height, cx, cy, r);
        for (idx, &on) in footprint.iter().enumerate() {
            if on {
                labels[idx] = i as u32 + 1;
                let (x, y) = labels.coords(idx);
                let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
                values[idx] = 1.0 / (1.0 + d2);
            }
        }
    }
    SegmentationMap::from_labels(labels, &values).expect("disk labels are contiguous")
}
