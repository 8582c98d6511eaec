// =============================================================================
// Augmented Dickey-Fuller test (constant, AIC lag selection)
// =============================================================================
//
//   Δs_t = α + γ·s_{t−1} + Σ_{i=1..k} φ_i·Δs_{t−i} + ε_t
//
// The statistic is the t-value of γ. The lag order k is chosen by minimum
// AIC over 0..=maxlag, with every candidate fitted on the same sample (the
// one left after dropping maxlag differences) so the criteria are
// comparable. The chosen order is then refitted on all observations it
// allows.
//
// p-values and critical values come from MacKinnon's response surfaces for
// the single-series, constant-only case (1994 p-value polynomials, 2010
// finite-sample critical values). They are not normal quantiles.
// =============================================================================

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{trace, warn};

use super::linalg::{least_squares, LeastSquaresFit};
use super::{all_finite, sanitize, AnalyticsError, Outcome};

/// p-value below which the spread is called stationary.
pub const SIGNIFICANCE: f64 = 0.05;

// MacKinnon (1994) p-value surface, constant, one series.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

// MacKinnon (2010) critical values, constant, one series:
// crit = b0 + b1/T + b2/T² + b3/T³.
const CRIT_1: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
const CRIT_5: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.040];
const CRIT_10: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub pvalue: f64,
    pub is_stationary: bool,
    /// Keys `1%`, `5%`, `10%`; empty on fallback.
    pub critical_values: BTreeMap<String, f64>,
    #[serde(skip)]
    pub used_lag: usize,
    #[serde(skip)]
    pub nobs: usize,
}

impl AdfResult {
    /// Neutral "not stationary" verdict.
    pub fn fallback() -> Self {
        Self {
            statistic: 0.0,
            pvalue: 1.0,
            is_stationary: false,
            critical_values: BTreeMap::new(),
            used_lag: 0,
            nobs: 0,
        }
    }

    /// Copy with every float passed through `sanitize`.
    pub fn sanitized(mut self) -> Self {
        self.statistic = sanitize(self.statistic);
        self.pvalue = sanitize(self.pvalue);
        for v in self.critical_values.values_mut() {
            *v = sanitize(*v);
        }
        self
    }
}

/// Run the ADF test on `series`. Degenerate input (too short, constant,
/// non-finite, singular regression) yields `AdfResult::fallback()`.
pub fn adf_test(series: &[f64]) -> Outcome<AdfResult> {
    let outcome = Outcome::or_fallback(run(series), AdfResult::fallback);
    if let Some(reason) = outcome.reason() {
        warn!(n = series.len(), reason = %reason, "ADF test fell back to non-stationary");
    }
    outcome
}

fn run(series: &[f64]) -> Result<AdfResult, AnalyticsError> {
    let n = series.len();
    if !all_finite(series) {
        return Err(AnalyticsError::NonFinite("spread"));
    }
    let (lo, hi) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if n > 0 && lo == hi {
        return Err(AnalyticsError::Degenerate("constant series"));
    }

    let maxlag = max_lag(n)?;
    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    // Lag selection on the common sample.
    let mut best: Option<(f64, usize)> = None;
    for lag in 0..=maxlag {
        match fit_lag(series, &diffs, lag, maxlag) {
            Ok(fit) => {
                let aic = fit.aic();
                trace!(lag, aic, "ADF candidate");
                if best.map_or(true, |(best_aic, _)| aic < best_aic) {
                    best = Some((aic, lag));
                }
            }
            Err(e) => trace!(lag, error = %e, "ADF candidate skipped"),
        }
    }
    let (_, used_lag) = best.ok_or(AnalyticsError::Singular)?;

    let fit = fit_lag(series, &diffs, used_lag, used_lag)?;
    let statistic = fit.t_value(0)?;
    let pvalue = mackinnon_p(statistic);
    let nobs = fit.nobs;

    Ok(AdfResult {
        statistic,
        pvalue,
        is_stationary: pvalue < SIGNIFICANCE,
        critical_values: critical_values(nobs),
        used_lag,
        nobs,
    })
}

/// Upper bound of the lag grid: ⌈12·(n/100)^¼⌉, capped at n/2 − 2.
fn max_lag(n: usize) -> Result<usize, AnalyticsError> {
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as i64;
    let cap = (n / 2) as i64 - 2;
    let maxlag = schwert.min(cap);
    if maxlag < 0 {
        return Err(AnalyticsError::InsufficientData { needed: 4, got: n });
    }
    Ok(maxlag as usize)
}

/// Fit Δs_t on [s_{t−1}, Δs_{t−1}..Δs_{t−lag}, 1] using differences from
/// index `skip` onward (`skip >= lag`). Column 0 is the level term.
fn fit_lag(
    series: &[f64],
    diffs: &[f64],
    lag: usize,
    skip: usize,
) -> Result<LeastSquaresFit, AnalyticsError> {
    let nrows = diffs.len().saturating_sub(skip);
    if nrows <= lag + 2 {
        return Err(AnalyticsError::InsufficientData {
            needed: lag + 3,
            got: nrows,
        });
    }

    // Columns: level, lagged differences, constant.
    let design = DMatrix::from_fn(nrows, lag + 2, |r, c| {
        let t = skip + r;
        match c {
            0 => series[t],
            c if c <= lag => diffs[t - c],
            _ => 1.0,
        }
    });
    let y = DVector::from_column_slice(&diffs[skip..]);
    least_squares(&design, &y)
}

/// Approximate asymptotic p-value of an ADF statistic.
pub fn mackinnon_p(tau: f64) -> f64 {
    if tau > TAU_MAX {
        return 1.0;
    }
    if tau < TAU_MIN {
        return 0.0;
    }
    let coef: &[f64] = if tau <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    normal_cdf(polyval(coef, tau))
}

/// Finite-sample critical values for `nobs` observations.
pub fn critical_values(nobs: usize) -> BTreeMap<String, f64> {
    let inv = 1.0 / nobs.max(1) as f64;
    [("1%", CRIT_1), ("5%", CRIT_5), ("10%", CRIT_10)]
        .into_iter()
        .map(|(label, b)| (label.to_string(), polyval(&b, inv)))
        .collect()
}

/// c0 + c1·t + c2·t² + …
fn polyval(coef: &[f64], t: f64) -> f64 {
    coef.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

fn normal_cdf(x: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) => normal.cdf(x),
        Err(_) => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic xorshift noise in [-0.5, 0.5).
    fn noise(n: usize, mut state: u64) -> Vec<f64> {
        (0..n)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                (state >> 11) as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect()
    }

    #[test]
    fn mean_reverting_series_is_stationary() {
        // AR(1) with φ = 0.3 around zero.
        let eps = noise(200, 0x9E37_79B9_7F4A_7C15);
        let mut s = vec![0.0; 200];
        for t in 1..200 {
            s[t] = 0.3 * s[t - 1] + eps[t];
        }

        let out = adf_test(&s);
        assert!(!out.is_fallback());
        let res = out.value();
        assert!(res.statistic < -3.5, "statistic = {}", res.statistic);
        assert!(res.pvalue < 0.01);
        assert!(res.is_stationary);
        assert_eq!(res.critical_values.len(), 3);
    }

    #[test]
    fn random_walk_is_not_stationary() {
        let eps = noise(200, 0xD1B5_4A32_D192_ED03);
        let mut s = vec![100.0; 200];
        for t in 1..200 {
            // Upward drift keeps the walk away from its start.
            s[t] = s[t - 1] + eps[t] + 0.05;
        }

        let res = adf_test(&s).into_value();
        assert!(res.pvalue > SIGNIFICANCE, "pvalue = {}", res.pvalue);
        assert!(!res.is_stationary);
    }

    #[test]
    fn constant_series_falls_back() {
        let out = adf_test(&[2.5; 50]);
        assert_eq!(out.reason(), Some(&AnalyticsError::Degenerate("constant series")));
        assert_eq!(out.into_value(), AdfResult::fallback());
    }

    #[test]
    fn short_series_falls_back() {
        let out = adf_test(&[1.0, 2.0, 1.5]);
        assert!(out.is_fallback());
        let res = out.into_value();
        assert_eq!(res.statistic, 0.0);
        assert_eq!(res.pvalue, 1.0);
        assert!(res.critical_values.is_empty());
    }

    #[test]
    fn non_finite_series_falls_back() {
        let mut s: Vec<f64> = (0..30).map(|i| (i as f64).sin()).collect();
        s[7] = f64::NAN;
        assert!(adf_test(&s).is_fallback());
    }

    #[test]
    fn lag_grid_bound() {
        assert_eq!(max_lag(100).unwrap(), 12);
        assert_eq!(max_lag(20).unwrap(), 8);
        assert_eq!(max_lag(10).unwrap(), 3);
        assert_eq!(max_lag(4).unwrap(), 0);
        assert!(max_lag(3).is_err());
    }

    #[test]
    fn pvalue_surface_landmarks() {
        // The asymptotic 5% critical value maps to p ≈ 0.05.
        assert!((mackinnon_p(-2.86) - 0.05).abs() < 0.005);
        assert!((mackinnon_p(-3.43) - 0.01).abs() < 0.003);
        assert_eq!(mackinnon_p(3.0), 1.0);
        assert_eq!(mackinnon_p(-20.0), 0.0);
        assert!(mackinnon_p(0.0) > 0.9);
        // Monotone through the switch between polynomials.
        assert!(mackinnon_p(-1.62) < mackinnon_p(-1.60));
    }

    #[test]
    fn critical_values_approach_asymptotes() {
        let cv = critical_values(1_000_000);
        assert!((cv["1%"] + 3.43035).abs() < 1e-4);
        assert!((cv["5%"] + 2.86154).abs() < 1e-4);
        assert!((cv["10%"] + 2.56677).abs() < 1e-4);

        let small = critical_values(100);
        assert!(small["1%"] < small["5%"] && small["5%"] < small["10%"]);
        assert!((small["5%"] + 2.8909).abs() < 1e-3);
    }

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.959964) - 0.975).abs() < 1e-6);
        assert!((normal_cdf(-1.644854) - 0.05).abs() < 1e-6);
    }
}
