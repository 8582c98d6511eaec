// =============================================================================
// Hedge Ratio Estimator
// =============================================================================
//
// Estimates beta in `priceA ≈ intercept + beta * priceB` with one of four
// interchangeable methods:
//
//   ols       — least squares on the design [1, x]
//   kalman    — recursive filter on the state [intercept, slope]
//   huber     — IRLS with the Huber loss (robust to outlier candles)
//   theilsen  — median of pairwise slopes
//
// Any numerical failure degrades to a neutral 1:1 hedge (beta 1.0,
// intercept 0.0) and is logged; callers see the reason in the `Outcome`.
// =============================================================================

use nalgebra::{DVector, Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::linalg::{least_squares, weighted_least_squares, with_intercept};
use super::{all_finite, median, AnalyticsError, Outcome};

/// Huber threshold in units of the residual scale.
const HUBER_EPSILON: f64 = 1.35;
const HUBER_MAX_ITER: usize = 100;
const HUBER_TOL: f64 = 1e-8;
/// MAD → standard deviation under normality.
const MAD_TO_SIGMA: f64 = 1.4826;

// ---------------------------------------------------------------------------
// Method selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegressionMethod {
    #[default]
    Ols,
    Kalman,
    Huber,
    #[serde(rename = "theilsen")]
    TheilSen,
}

impl RegressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ols => "ols",
            Self::Kalman => "kalman",
            Self::Huber => "huber",
            Self::TheilSen => "theilsen",
        }
    }

    /// Strict lookup (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ols" => Some(Self::Ols),
            "kalman" => Some(Self::Kalman),
            "huber" => Some(Self::Huber),
            "theilsen" | "theil-sen" | "theil_sen" => Some(Self::TheilSen),
            _ => None,
        }
    }

    /// Lenient lookup: unknown names log a warning and select OLS.
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_else(|| {
            warn!(method = %name, "unknown regression method, using ols");
            Self::Ols
        })
    }
}

impl std::fmt::Display for RegressionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kalman filter noise parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanParams {
    /// Process noise scale; `Vw = delta / (1 - delta) * I`.
    pub delta: f64,
    /// Observation noise variance `Ve`.
    pub observation_noise: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            delta: 1e-5,
            observation_noise: 0.001,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HedgeRatioEstimate {
    pub beta: f64,
    /// Zero for the slope-only methods (Kalman, Theil-Sen).
    pub intercept: f64,
    pub method: RegressionMethod,
}

impl HedgeRatioEstimate {
    fn neutral(method: RegressionMethod) -> Self {
        Self {
            beta: 1.0,
            intercept: 0.0,
            method,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Estimate the hedge ratio of `y` (price A) against `x` (price B).
pub fn compute_hedge_ratio(
    y: &[f64],
    x: &[f64],
    method: RegressionMethod,
    kalman: &KalmanParams,
) -> Outcome<HedgeRatioEstimate> {
    let result = match method {
        RegressionMethod::Ols => ols(y, x),
        RegressionMethod::Kalman => kalman_slope(y, x, kalman).map(|beta| (beta, 0.0)),
        RegressionMethod::Huber => huber(y, x),
        RegressionMethod::TheilSen => theil_sen(y, x).map(|beta| (beta, 0.0)),
    };

    let outcome = Outcome::or_fallback(
        result.map(|(beta, intercept)| HedgeRatioEstimate {
            beta,
            intercept,
            method,
        }),
        || HedgeRatioEstimate::neutral(method),
    );

    match outcome.reason() {
        Some(reason) => warn!(method = %method, reason = %reason, "hedge ratio fell back to 1.0"),
        None => trace!(method = %method, beta = outcome.value().beta, "hedge ratio estimated"),
    }
    outcome
}

fn check_pair(y: &[f64], x: &[f64]) -> Result<usize, AnalyticsError> {
    if y.len() != x.len() {
        return Err(AnalyticsError::Degenerate("series length mismatch"));
    }
    if y.len() < 2 {
        return Err(AnalyticsError::InsufficientData { needed: 2, got: y.len() });
    }
    if !all_finite(y) || !all_finite(x) {
        return Err(AnalyticsError::NonFinite("price series"));
    }
    Ok(y.len())
}

// ---------------------------------------------------------------------------
// OLS
// ---------------------------------------------------------------------------

/// Least squares fit of `y = intercept + beta * x`. Returns `(beta, intercept)`.
pub fn ols(y: &[f64], x: &[f64]) -> Result<(f64, f64), AnalyticsError> {
    check_pair(y, x)?;
    let fit = least_squares(&with_intercept(x), &DVector::from_column_slice(y))?;
    Ok((fit.coefficients[1], fit.coefficients[0]))
}

// ---------------------------------------------------------------------------
// Kalman
// ---------------------------------------------------------------------------

/// Final filtered slope of the random-walk regression
/// `y_t = θ0_t + θ1_t * x_t + e_t`.
///
/// The predict step `R = P + Vw` runs on every observation, the first
/// included, starting from `θ = [0, 0]` and `P = 0`.
pub fn kalman_slope(y: &[f64], x: &[f64], params: &KalmanParams) -> Result<f64, AnalyticsError> {
    check_pair(y, x)?;
    if !(params.delta > 0.0 && params.delta < 1.0) || !(params.observation_noise >= 0.0) {
        return Err(AnalyticsError::Degenerate("kalman noise parameters"));
    }

    let vw = params.delta / (1.0 - params.delta);
    let ve = params.observation_noise;

    let mut theta = Vector2::<f64>::zeros();
    let mut p = Matrix2::<f64>::zeros();
    let process = Matrix2::<f64>::identity() * vw;

    for (&yt, &xt) in y.iter().zip(x) {
        // Predict.
        let r = p + process;

        // Observe with F = [1, x_t].
        let f = Vector2::new(1.0, xt);
        let e = yt - f.dot(&theta);
        let rf = r * f;
        let q = f.dot(&rf) + ve;
        if !(q.is_finite() && q > 0.0) {
            return Err(AnalyticsError::Degenerate("non-positive innovation variance"));
        }

        // Update; F·R = rfᵀ for symmetric R.
        let k = rf / q;
        theta += k * e;
        p = r - k * rf.transpose();
    }

    if !theta[1].is_finite() {
        return Err(AnalyticsError::NonFinite("kalman state"));
    }
    Ok(theta[1])
}

// ---------------------------------------------------------------------------
// Huber
// ---------------------------------------------------------------------------

/// Huber M-estimate via iteratively reweighted least squares, starting from
/// the OLS fit. Residual scale is the normalised MAD, re-estimated on every
/// iteration. Returns `(beta, intercept)`.
///
/// Scale is not estimated jointly with the coefficients and there is no L2
/// penalty, so on outlier-heavy data the slope can differ slightly from a
/// joint-scale Huber regressor such as scikit-learn's `HuberRegressor`.
pub fn huber(y: &[f64], x: &[f64]) -> Result<(f64, f64), AnalyticsError> {
    let n = check_pair(y, x)?;
    let rows = with_intercept(x);
    let target = DVector::from_column_slice(y);
    let mut coef = least_squares(&rows, &target)?.coefficients;

    for iter in 0..HUBER_MAX_ITER {
        let residuals: Vec<f64> = y
            .iter()
            .zip(x)
            .map(|(&yi, &xi)| yi - (coef[0] + coef[1] * xi))
            .collect();

        let center = median(&residuals).unwrap_or(0.0);
        let deviations: Vec<f64> = residuals.iter().map(|r| (r - center).abs()).collect();
        let scale = median(&deviations).unwrap_or(0.0) * MAD_TO_SIGMA;
        if scale < 1e-12 {
            // At least half the points lie on the current line.
            break;
        }

        let threshold = HUBER_EPSILON * scale;
        let weights = DVector::from_iterator(
            n,
            residuals.iter().map(|r| {
                let a = r.abs();
                if a <= threshold {
                    1.0
                } else {
                    threshold / a
                }
            }),
        );

        let next = weighted_least_squares(&rows, &target, &weights)?.coefficients;
        let shift = next
            .iter()
            .zip(coef.iter())
            .map(|(a, b)| (a - b).abs() / (1.0 + b.abs()))
            .fold(0.0, f64::max);
        coef = next;

        if shift < HUBER_TOL {
            trace!(iterations = iter + 1, n, "huber converged");
            break;
        }
    }

    Ok((coef[1], coef[0]))
}

// ---------------------------------------------------------------------------
// Theil-Sen
// ---------------------------------------------------------------------------

/// Median of `(y_j − y_i) / (x_j − x_i)` over all pairs with `x_j ≠ x_i`.
pub fn theil_sen(y: &[f64], x: &[f64]) -> Result<f64, AnalyticsError> {
    let n = check_pair(y, x)?;

    let mut slopes = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = x[j] - x[i];
            if dx != 0.0 {
                slopes.push((y[j] - y[i]) / dx);
            }
        }
    }

    median(&slopes).ok_or(AnalyticsError::Degenerate("no pairs with distinct x"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
