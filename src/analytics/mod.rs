// =============================================================================
// Analytics — hedge ratio, spread, stationarity and the result bundle
// =============================================================================
//
// Every numerical routine here is pure and synchronous. Failures never
// escape as errors to the request path: each operation returns an
// `Outcome`, which is either the computed value or a documented neutral
// fallback together with the reason it was used.
// =============================================================================

pub mod adf;
pub mod bundle;
pub mod hedge_ratio;
pub mod linalg;
pub mod spread;

pub use adf::{adf_test, AdfResult};
pub use bundle::{compute_full_analytics, sanitized_matrix, AnalyticsBundle, AnalyticsSettings};
pub use hedge_ratio::{compute_hedge_ratio, KalmanParams, RegressionMethod};
pub use spread::{compute_spread, compute_zscore, correlation, correlation_matrix};

use thiserror::Error;

/// Why a numerical routine fell back to its neutral value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("singular design matrix")]
    Singular,

    #[error("degenerate input: {0}")]
    Degenerate(&'static str),

    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Result of a numerical operation that always yields a usable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Computed(T),
    Fallback { value: T, reason: AnalyticsError },
}

impl<T> Outcome<T> {
    /// Wrap a fallible computation, substituting `fallback` on error.
    pub fn or_fallback(result: Result<T, AnalyticsError>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => Self::Computed(value),
            Err(reason) => Self::Fallback {
                value: fallback(),
                reason,
            },
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Computed(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Computed(value) | Self::Fallback { value, .. } => value,
        }
    }

    #[cfg(test)]
    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }

    pub fn reason(&self) -> Option<&AnalyticsError> {
        match self {
            Self::Computed(_) => None,
            Self::Fallback { reason, .. } => Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Replace NaN and ±Inf with 0.0.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

pub fn sanitize_all(values: &[f64]) -> Vec<f64> {
    values.iter().copied().map(sanitize).collect()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of a slice (average of the two middle values for even lengths).
pub(crate) fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub(crate) fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}
