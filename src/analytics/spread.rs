// =============================================================================
// Spread, rolling z-score and correlation
// =============================================================================

use std::collections::BTreeMap;

use tracing::debug;

use super::{mean, AnalyticsError, Outcome};

/// Default trailing window for the rolling z-score.
pub const DEFAULT_ZSCORE_WINDOW: usize = 20;

/// Floor applied to the rolling standard deviation.
pub const STD_FLOOR: f64 = 1e-8;

/// `spread[i] = y[i] − beta · x[i]`.
pub fn compute_spread(y: &[f64], x: &[f64], beta: f64) -> Vec<f64> {
    y.iter().zip(x).map(|(a, b)| a - beta * b).collect()
}

/// Rolling z-score over a trailing window that grows from one observation
/// up to `window`.
///
/// Uses the sample standard deviation; a single-observation window has a
/// deviation of zero. Any deviation below `STD_FLOOR` is replaced by it, so a
/// flat stretch of the spread scores 0 rather than NaN. The floor also covers
/// non-zero deviations under `STD_FLOOR` (rounding residue of a flat window),
/// which therefore score smaller than a zero-only replacement would give.
pub fn compute_zscore(spread: &[f64], window: usize) -> Vec<f64> {
    let window = window.max(1);

    (0..spread.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let slice = &spread[start..=i];
            let m = mean(slice);
            let std = sample_std(slice, m).max(STD_FLOOR);
            (spread[i] - m) / std
        })
        .collect()
}

fn sample_std(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Population standard deviation.
pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / values.len() as f64).sqrt()
}

/// Pearson correlation over the most recent common tail of `a` and `b`.
///
/// Falls back to 0.0 with fewer than two points, a constant series, or
/// non-finite input.
pub fn correlation(a: &[f64], b: &[f64]) -> Outcome<f64> {
    Outcome::or_fallback(pearson(a, b), || 0.0)
}

fn pearson(a: &[f64], b: &[f64]) -> Result<f64, AnalyticsError> {
    let n = a.len().min(b.len());
    if n < 2 {
        return Err(AnalyticsError::InsufficientData { needed: 2, got: n });
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];

    let ma = mean(a);
    let mb = mean(b);
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }

    if !(sab.is_finite() && saa.is_finite() && sbb.is_finite()) {
        return Err(AnalyticsError::NonFinite("correlation input"));
    }
    if saa == 0.0 || sbb == 0.0 {
        return Err(AnalyticsError::Degenerate("zero variance"));
    }
    Ok((sab / (saa * sbb).sqrt()).clamp(-1.0, 1.0))
}

/// Pairwise Pearson correlation for every label pair. Symmetric with a unit
/// diagonal; pairs that cannot be computed are 0.0.
pub fn correlation_matrix(
    series: &BTreeMap<String, Vec<f64>>,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let labels: Vec<&String> = series.keys().collect();
    let mut matrix: BTreeMap<String, BTreeMap<String, f64>> = labels
        .iter()
        .map(|label| ((*label).clone(), BTreeMap::new()))
        .collect();

    for (i, a) in labels.iter().enumerate() {
        if let Some(row) = matrix.get_mut(*a) {
            row.insert((*a).clone(), 1.0);
        }
        for b in &labels[i + 1..] {
            let outcome = correlation(&series[*a], &series[*b]);
            if let Some(reason) = outcome.reason() {
                debug!(a = %a, b = %b, reason = %reason, "correlation unavailable");
            }
            let value = outcome.into_value();
            if let Some(row) = matrix.get_mut(*a) {
                row.insert((*b).clone(), value);
            }
            if let Some(row) = matrix.get_mut(*b) {
                row.insert((*a).clone(), value);
            }
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_is_elementwise_residual() {
        let s = compute_spread(&[10.0, 12.0, 14.0], &[4.0, 5.0, 6.0], 2.0);
        assert_eq!(s, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn constant_spread_scores_zero_everywhere() {
        let z = compute_zscore(&[3.5; 40], DEFAULT_ZSCORE_WINDOW);
        assert_eq!(z.len(), 40);
        assert!(z.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zscore_uses_growing_then_trailing_window() {
        let spread = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let z = compute_zscore(&spread, 3);

        assert_eq!(z[0], 0.0);
        // [1, 2]: mean 1.5, sample std sqrt(0.5).
        assert!((z[1] - 0.5 / 0.5f64.sqrt()).abs() < 1e-12);
        // Full windows [k-2, k-1, k]: mean k-1, sample std 1.
        for v in &z[2..] {
            assert!((v - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn zscore_is_finite_for_tiny_variation() {
        let spread: Vec<f64> = (0..30).map(|i| 1.0 + (i % 2) as f64 * 1e-12).collect();
        let z = compute_zscore(&spread, 20);
        assert!(z.iter().all(|v| v.is_finite() && v.abs() < 1e-3));

        // Sub-floor deviation: (1e-10 − 5e-11) / 1e-8.
        let z = compute_zscore(&[0.0, 1e-10], 2);
        assert!((z[1] - 0.005).abs() < 1e-12);
    }

    #[test]
    fn population_std_matches_definition() {
        assert_eq!(population_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]), 2.0);
        assert_eq!(population_std(&[]), 0.0);
    }

    #[test]
    fn correlation_of_linear_series_is_one() {
        let a: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let b: Vec<f64> = (0..20).map(|i| 50.0 + 0.5 * i as f64).collect();
        let c: Vec<f64> = b.iter().map(|v| -v).collect();

        assert!((correlation(&a, &b).into_value() - 1.0).abs() < 1e-12);
        assert!((correlation(&a, &c).into_value() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn correlation_falls_back_to_zero() {
        let flat = correlation(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]);
        assert_eq!(flat.reason(), Some(&AnalyticsError::Degenerate("zero variance")));
        assert_eq!(flat.into_value(), 0.0);

        let short = correlation(&[1.0], &[2.0]);
        assert!(short.is_fallback());
        assert_eq!(*short.value(), 0.0);
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let mut series = BTreeMap::new();
        series.insert("BTCUSDT".to_string(), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        series.insert("ETHUSDT".to_string(), vec![2.0, 4.1, 5.9, 8.2, 9.9]);
        // Shorter series aligns on the most recent tail.
        series.insert("SOLUSDT".to_string(), vec![5.0, 3.0, 4.0]);

        let m = correlation_matrix(&series);
        assert_eq!(m.len(), 3);
        for (a, row) in &m {
            assert_eq!(row.len(), 3);
            assert_eq!(row[a], 1.0);
            for (b, v) in row {
                assert_eq!(*v, m[b][a]);
                assert!((-1.0..=1.0).contains(v));
            }
        }
        assert!(m["BTCUSDT"]["ETHUSDT"] > 0.99);
        // Tail of BTC is [3, 4, 5] vs [5, 3, 4].
        let expected = correlation(&[3.0, 4.0, 5.0], &[5.0, 3.0, 4.0]).into_value();
        assert_eq!(m["BTCUSDT"]["SOLUSDT"], expected);
    }
}
