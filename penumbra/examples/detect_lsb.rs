//! Example: Find a faint extended galaxy next to a bright star
//!
//! Builds a synthetic field, runs the multi-pass pipeline, and writes the
//! selected catalog as CSV.
//!
//! Output:
//! ```text
//! test_output/
//!   lsb_sources.csv
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --example detect_lsb [config.yaml]
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use penumbra::{Image, Mask, MaskPlane, NoiseReplaceConfig, Pipeline, PipelineConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const WIDTH: usize = 512;
const HEIGHT: usize = 512;
const SKY_LEVEL: f32 = 1000.0;
const SKY_SIGMA: f32 = 5.0;

fn main() -> anyhow::Result<()> {
    common::log_setup::setup_logging("info", "detect_lsb")?;

    let config = match env::args().nth(1) {
        Some(path) => PipelineConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => PipelineConfig {
            noise: NoiseReplaceConfig {
                seed: Some(1),
                ..NoiseReplaceConfig::default()
            },
            ..PipelineConfig::default()
        },
    };

    let (image, mask) = synthetic_field(7);
    tracing::info!(width = WIDTH, height = HEIGHT, "Synthetic field ready");

    let pipeline = Pipeline::new(config)?;
    let start = Instant::now();
    let output = pipeline.run(&image, &mask)?;
    tracing::info!(
        elapsed_ms = start.elapsed().as_millis() as u64,
        high = output.high.catalog.len(),
        low = output.low.catalog.len(),
        associated = output.association.len(),
        selected = output.catalog().len(),
        "Pipeline finished"
    );

    for source in output.catalog().iter() {
        tracing::info!(
            "#{:<3} x={:7.1} y={:7.1} npix={:6.0} r_circ={:5.1} flux={:.0}",
            source.id,
            source.x,
            source.y,
            source.npix,
            source.r_circ,
            source.flux
        );
    }

    let out_dir = PathBuf::from("test_output");
    std::fs::create_dir_all(&out_dir)?;
    let path = out_dir.join("lsb_sources.csv");
    output.catalog().write_csv_path(&path)?;
    tracing::info!(path = %path.display(), "Catalog written");
    Ok(())
}

/// Sky with stars of varied brightness, one saturated star flagged in the
/// mask, and a large low-surface-brightness galaxy.
fn synthetic_field(seed: u64) -> (Image, Mask) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut image = Image::filled(WIDTH, HEIGHT, SKY_LEVEL);
    let mut mask = Mask::new(WIDTH, HEIGHT);

    for _ in 0..40 {
        let x = rng.random_range(10.0..WIDTH as f32 - 10.0);
        let y = rng.random_range(10.0..HEIGHT as f32 - 10.0);
        let amplitude = 10f32.powf(rng.random_range(1.5..3.5));
        add_gaussian(&mut image, x, y, amplitude, 1.6);
    }

    add_gaussian(&mut image, 140.0, 380.0, 60_000.0, 2.0);
    for y in 376..=384 {
        for x in 136..=144 {
            mask.set(x, y, MaskPlane::Saturated);
        }
    }

    add_gaussian(&mut image, 300.0, 260.0, 6.0, 25.0);

    for v in image.pixels.iter_mut() {
        let n: f32 = rng.sample(StandardNormal);
        *v += SKY_SIGMA * n;
    }
    (image, mask)
}

fn add_gaussian(image: &mut Image, cx: f32, cy: f32, amplitude: f32, sigma: f32) {
    let reach = (5.0 * sigma).ceil() as isize;
    let (x0, y0) = (cx.round() as isize, cy.round() as isize);
    for y in (y0 - reach).max(0)..(y0 + reach + 1).min(HEIGHT as isize) {
        for x in (x0 - reach).max(0)..(x0 + reach + 1).min(WIDTH as isize) {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            image.pixels[(x as usize, y as usize)] +=
                amplitude * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
        }
    }
}
