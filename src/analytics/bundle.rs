// =============================================================================
// Analytics Orchestrator — one sanitized result bundle per pair request
// =============================================================================
//
// hedge ratio → spread → z-score → correlation → ADF, assembled into the
// JSON shape existing dashboards consume:
//
//   { hedge_ratio, regression_type,
//     spread:   { values, mean, std, timestamps },
//     zscore:   { values, current },
//     correlation,
//     adf_test: { statistic, pvalue, is_stationary, critical_values } }
//
// Every float is sanitized (NaN/Inf → 0.0) before it leaves this module.
// Nothing escapes as an error or panic: failures become the error bundle
// `{ error, hedge_ratio: 1.0, regression_type }`.
// =============================================================================

use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, error, warn};

use super::adf::{adf_test, AdfResult};
use super::hedge_ratio::{compute_hedge_ratio, KalmanParams, RegressionMethod};
use super::spread::{compute_spread, compute_zscore, correlation, population_std, DEFAULT_ZSCORE_WINDOW};
use super::{mean, sanitize, sanitize_all, AnalyticsError, Outcome};

/// Tunables for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsSettings {
    pub zscore_window: usize,
    pub kalman: KalmanParams,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            zscore_window: DEFAULT_ZSCORE_WINDOW,
            kalman: KalmanParams::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpreadSummary {
    pub values: Vec<f64>,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub timestamps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZScoreSummary {
    pub values: Vec<f64>,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsBundle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub hedge_ratio: f64,
    /// The method name as requested, even when it fell back to OLS.
    pub regression_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spread: Option<SpreadSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zscore: Option<ZScoreSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adf_test: Option<AdfResult>,
    /// Steps that used a neutral fallback, as `step: reason`.
    #[serde(skip)]
    pub fallbacks: Vec<String>,
}

impl AnalyticsBundle {
    fn error(message: impl Into<String>, regression_type: &str) -> Self {
        Self {
            error: Some(message.into()),
            hedge_ratio: 1.0,
            regression_type: regression_type.to_string(),
            spread: None,
            zscore: None,
            correlation: None,
            adf_test: None,
            fallbacks: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Orchestration
// ---------------------------------------------------------------------------

/// Full pipeline for one pair.
///
/// Inputs of different length are truncated to the shortest of the three
/// (leading prefix). The caller is expected to have enforced its own minimum
/// length; below two points the error bundle is returned.
pub fn compute_full_analytics(
    prices_a: &[f64],
    prices_b: &[f64],
    timestamps: &[String],
    regression_type: &str,
    settings: &AnalyticsSettings,
) -> AnalyticsBundle {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        try_compute(prices_a, prices_b, timestamps, regression_type, settings)
    }));

    match result {
        Ok(Ok(bundle)) => bundle,
        Ok(Err(e)) => {
            warn!(error = %e, "full analytics computation failed");
            AnalyticsBundle::error(e.to_string(), regression_type)
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "analytics pipeline panicked".to_string());
            error!(error = %message, "full analytics computation panicked");
            AnalyticsBundle::error(message, regression_type)
        }
    }
}

fn try_compute(
    prices_a: &[f64],
    prices_b: &[f64],
    timestamps: &[String],
    regression_type: &str,
    settings: &AnalyticsSettings,
) -> Result<AnalyticsBundle, AnalyticsError> {
    let n = prices_a.len().min(prices_b.len()).min(timestamps.len());
    if n < 2 {
        return Err(AnalyticsError::InsufficientData { needed: 2, got: n });
    }
    if n != prices_a.len() || n != prices_b.len() || n != timestamps.len() {
        debug!(
            a = prices_a.len(),
            b = prices_b.len(),
            timestamps = timestamps.len(),
            n,
            "truncating analytics inputs"
        );
    }
    let (a, b, ts) = (&prices_a[..n], &prices_b[..n], &timestamps[..n]);

    let method = RegressionMethod::resolve(regression_type);
    let mut fallbacks = Vec::new();

    let hedge = compute_hedge_ratio(a, b, method, &settings.kalman);
    record("hedge_ratio", &hedge, &mut fallbacks);
    let beta = hedge.into_value().beta;

    let spread = compute_spread(a, b, beta);
    let zscore = compute_zscore(&spread, settings.zscore_window);

    let corr = correlation(a, b);
    record("correlation", &corr, &mut fallbacks);

    let adf = adf_test(&spread);
    record("adf_test", &adf, &mut fallbacks);
    let adf = adf.into_value().sanitized();

    let spread_summary = SpreadSummary {
        mean: sanitize(mean(&spread)),
        std: sanitize(population_std(&spread)),
        values: sanitize_all(&spread),
        timestamps: ts.to_vec(),
    };
    let zscore_summary = ZScoreSummary {
        current: zscore.last().copied().map_or(0.0, sanitize),
        values: sanitize_all(&zscore),
    };

    Ok(AnalyticsBundle {
        error: None,
        hedge_ratio: sanitize(beta),
        regression_type: regression_type.to_string(),
        spread: Some(spread_summary),
        zscore: Some(zscore_summary),
        correlation: Some(sanitize(corr.into_value())),
        adf_test: Some(adf),
        fallbacks,
    })
}

fn record<T>(step: &str, outcome: &Outcome<T>, fallbacks: &mut Vec<String>) {
    if let Some(reason) = outcome.reason() {
        fallbacks.push(format!("{step}: {reason}"));
    }
}

/// Sanitized correlation matrix, ready to serialise.
pub fn sanitized_matrix(
    matrix: BTreeMap<String, BTreeMap<String, f64>>,
) -> BTreeMap<String, BTreeMap<String, f64>> {
    matrix
        .into_iter()
        .map(|(k, row)| (k, row.into_iter().map(|(c, v)| (c, sanitize(v))).collect()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stamps(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("2024-01-01T00:{i:02}:00")).collect()
    }

    fn all_floats(bundle: &AnalyticsBundle) -> Vec<f64> {
        let mut out = vec![bundle.hedge_ratio];
        if let Some(s) = &bundle.spread {
            out.extend(&s.values);
            out.extend([s.mean, s.std]);
        }
        if let Some(z) = &bundle.zscore {
            out.extend(&z.values);
            out.push(z.current);
        }
        out.extend(bundle.correlation);
        if let Some(adf) = &bundle.adf_test {
            out.extend([adf.statistic, adf.pvalue]);
            out.extend(adf.critical_values.values());
        }
        out
    }

    #[test]
    fn ramp_pair_end_to_end() {
        let a: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let b: Vec<f64> = (0..20).map(|i| 50.0 + 0.5 * i as f64).collect();

        let bundle = compute_full_analytics(&a, &b, &stamps(20), "ols", &AnalyticsSettings::default());

        assert!(!bundle.is_error());
        assert!((bundle.hedge_ratio - 2.0).abs() < 1e-9);
        assert_eq!(bundle.regression_type, "ols");

        let spread = bundle.spread.as_ref().unwrap();
        assert_eq!(spread.values.len(), 20);
        assert_eq!(spread.timestamps.len(), 20);
        assert!(spread.values.iter().all(|v| v.abs() < 1e-6));

        let zscore = bundle.zscore.as_ref().unwrap();
        assert!(zscore.values.iter().all(|v| v.abs() < 1e-3));
        assert!(zscore.current.abs() < 1e-3);

        assert!((bundle.correlation.unwrap() - 1.0).abs() < 1e-9);
        assert!(bundle.adf_test.is_some());
        assert!(all_floats(&bundle).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn degenerate_pair_is_fully_sanitized() {
        // Constant B: hedge ratio, correlation and ADF all fall back.
        let a: Vec<f64> = (0..30).map(|i| 10.0 + (i % 3) as f64).collect();
        let b = vec![5.0; 30];

        let bundle = compute_full_analytics(&a, &b, &stamps(30), "huber", &AnalyticsSettings::default());

        assert!(!bundle.is_error());
        assert_eq!(bundle.hedge_ratio, 1.0);
        assert_eq!(bundle.correlation, Some(0.0));
        assert!(bundle.fallbacks.iter().any(|f| f.starts_with("hedge_ratio")));
        assert!(bundle.fallbacks.iter().any(|f| f.starts_with("correlation")));
        assert!(all_floats(&bundle).iter().all(|v| v.is_finite()));
    }

    #[test]
    fn constant_spread_gives_empty_adf_and_zero_zscore() {
        // a = 2b exactly: the spread is identically zero.
        let b: Vec<f64> = (0..25).map(|i| 10.0 + i as f64).collect();
        let a: Vec<f64> = b.iter().map(|v| 2.0 * v).collect();

        let bundle = compute_full_analytics(&a, &b, &stamps(25), "theilsen", &AnalyticsSettings::default());
        let adf = bundle.adf_test.as_ref().unwrap();
        assert_eq!(adf.statistic, 0.0);
        assert_eq!(adf.pvalue, 1.0);
        assert!(!adf.is_stationary);
        assert!(adf.critical_values.is_empty());
        assert!(bundle.zscore.unwrap().values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn non_finite_prices_never_leak() {
        let mut a: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let b: Vec<f64> = (0..30).map(|i| 50.0 + (i as f64).sin()).collect();
        a[3] = f64::INFINITY;

        let bundle = compute_full_analytics(&a, &b, &stamps(30), "kalman", &AnalyticsSettings::default());
        assert!(all_floats(&bundle).iter().all(|v| v.is_finite()));
        let json = serde_json::to_string(&bundle).unwrap();
        assert!(!json.contains("null"));
    }

    #[test]
    fn truncates_to_shortest_input() {
        let a: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let b: Vec<f64> = (0..25).map(|i| 50.0 + 0.5 * i as f64).collect();

        let bundle = compute_full_analytics(&a, &b, &stamps(22), "ols", &AnalyticsSettings::default());
        let spread = bundle.spread.unwrap();
        assert_eq!(spread.values.len(), 22);
        assert_eq!(spread.timestamps, stamps(22));
    }

    #[test]
    fn too_short_input_yields_error_bundle() {
        let bundle = compute_full_analytics(&[1.0], &[2.0], &stamps(1), "kalman", &AnalyticsSettings::default());
        assert!(bundle.is_error());
        assert_eq!(bundle.hedge_ratio, 1.0);
        assert_eq!(bundle.regression_type, "kalman");

        let json = serde_json::to_value(&bundle).unwrap();
        let keys: Vec<&String> = json.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 3);
        assert_eq!(json["hedge_ratio"], 1.0);
    }

    #[test]
    fn unknown_method_runs_ols_but_echoes_name() {
        let a: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let b: Vec<f64> = (0..20).map(|i| 50.0 + 0.5 * i as f64).collect();

        let bundle = compute_full_analytics(&a, &b, &stamps(20), "lasso", &AnalyticsSettings::default());
        assert_eq!(bundle.regression_type, "lasso");
        assert!((bundle.hedge_ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn wire_schema_field_names() {
        let a: Vec<f64> = (0..20).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let b: Vec<f64> = (0..20).map(|i| 50.0 + (i as f64 * 0.3).cos()).collect();

        let bundle = compute_full_analytics(&a, &b, &stamps(20), "ols", &AnalyticsSettings::default());
        let json = serde_json::to_value(&bundle).unwrap();

        assert!(json.get("error").is_none());
        assert!(json.get("fallbacks").is_none());
        for key in ["hedge_ratio", "regression_type", "spread", "zscore", "correlation", "adf_test"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        for key in ["values", "mean", "std", "timestamps"] {
            assert!(json["spread"].get(key).is_some(), "missing spread.{key}");
        }
        assert!(json["zscore"].get("current").is_some());
        for key in ["statistic", "pvalue", "is_stationary", "critical_values"] {
            assert!(json["adf_test"].get(key).is_some(), "missing adf_test.{key}");
        }
        assert!(json["adf_test"].get("used_lag").is_none());
    }

    #[test]
    fn matrix_sanitization() {
        let mut row = BTreeMap::new();
        row.insert("A".to_string(), f64::NAN);
        let mut m = BTreeMap::new();
        m.insert("A".to_string(), row);
        assert_eq!(sanitized_matrix(m)["A"]["A"], 0.0);
    }
}
