//! Order statistics on residual samples.

/// Median of `values`, averaging the two central elements for even lengths.
///
/// Sorts the slice in place. Returns `None` for an empty slice.
pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len().is_multiple_of(2) {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Percentile `p` (0..=100) with linear interpolation between closest ranks.
///
/// `sorted` must be in ascending order. Returns `None` when empty.
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Half the 16th-84th percentile spread; equals sigma for a normal sample.
///
/// Sorts the slice in place.
pub fn percentile_sigma_mut(values: &mut [f64]) -> Option<f64> {
    values.sort_by(f64::total_cmp);
    let low = percentile_sorted(values, 16.0)?;
    let high = percentile_sorted(values, 84.0)?;
    Some(0.5 * (high - low))
}

/// Root mean square of `values`, `None` when empty.
pub fn rms(values: impl ExactSizeIterator<Item = f64>) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let sum_sq: f64 = values.map(|v| v * v).sum();
    Some((sum_sq / n as f64).sqrt())
}
