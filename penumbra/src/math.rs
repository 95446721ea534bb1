//! Robust statistics: median, MAD and sigma-clipped estimates.

/// For a normal distribution, σ ≈ 1.4826 × MAD.
pub const MAD_TO_SIGMA: f32 = 1.4826022;

#[inline]
pub fn mad_to_sigma(mad: f32) -> f32 {
    mad * MAD_TO_SIGMA
}

/// Median of `data`, reordering it in place. Returns `None` for an empty slice.
///
/// Values are ordered with `total_cmp`, so callers must drop NaNs first.
pub fn median_f32_mut(data: &mut [f32]) -> Option<f32> {
    if data.is_empty() {
        return None;
    }

    let len = data.len();
    let mid = len / 2;
    let (left, median, _) = data.select_nth_unstable_by(mid, f32::total_cmp);
    let upper = *median;

    if len % 2 == 1 {
        return Some(upper);
    }
    let lower = left.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    Some((lower + upper) * 0.5)
}

/// Median of the finite values in `values`; NaNs and infinities are skipped.
pub fn nanmedian(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let len = finite.len();
    let mid = len / 2;
    let (left, median, _) = finite.select_nth_unstable_by(mid, f64::total_cmp);
    let upper = *median;
    if len % 2 == 1 {
        return Some(upper);
    }
    let lower = left.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some((lower + upper) * 0.5)
}

/// Sigma-clipped median and MAD-based sigma.
///
/// Rejects values further than `kappa × sigma` from the median for up to
/// `iterations` rounds, stopping early once nothing is clipped. `values` is
/// reordered; `scratch` is reused between calls. Returns `None` when `values`
/// is empty.
pub fn sigma_clipped_median_mad(
    values: &mut [f32],
    scratch: &mut Vec<f32>,
    kappa: f32,
    iterations: usize,
) -> Option<(f32, f32)> {
    let mut len = values.len();
    if len == 0 {
        return None;
    }

    for _ in 0..iterations {
        if len < 3 {
            break;
        }
        let (median, sigma) = median_and_sigma(&mut values[..len], scratch)?;
        if sigma <= f32::EPSILON {
            return Some((median, 0.0));
        }

        let limit = kappa * sigma;
        let mut kept = 0;
        for i in 0..len {
            if (values[i] - median).abs() <= limit {
                values[kept] = values[i];
                kept += 1;
            }
        }
        if kept == len {
            return Some((median, sigma));
        }
        len = kept;
    }

    median_and_sigma(&mut values[..len], scratch)
}

fn median_and_sigma(values: &mut [f32], scratch: &mut Vec<f32>) -> Option<(f32, f32)> {
    let median = median_f32_mut(values)?;
    scratch.clear();
    scratch.extend(values.iter().map(|v| (v - median).abs()));
    let mad = median_f32_mut(scratch)?;
    Some((median, mad_to_sigma(mad)))
}
