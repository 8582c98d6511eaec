// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Paths match the existing dashboard:
//
//   GET  /                                  service banner
//   GET  /health                            feed status
//   POST /api/analytics/compute             full analytics bundle
//   POST /api/analytics/adf-test            OLS hedge + ADF only
//   GET  /api/analytics/export              CSV of prices, spread, z-score
//   GET  /api/analytics/correlation-matrix  all tracked symbols
//   GET  /api/test/prices                   raw feed state
//   GET  /api/test/ohlc/:symbol             last 10 candles
//
// The WebSocket routes from `api::ws` are mounted on the same router.
// Handlers only read copies from the feed; they never wait on the network.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, HeaderValue},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::analytics::{
    adf_test, compute_full_analytics, compute_hedge_ratio, compute_spread, compute_zscore,
    correlation_matrix, sanitize, sanitized_matrix, AdfResult, AnalyticsBundle, RegressionMethod,
};
use crate::api::pair::{load_pair, PairSeries};
use crate::api::{ws, ApiError};
use crate::app_state::AppState;
use crate::market_data::Candle;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full HTTP router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        // ── Service ─────────────────────────────────────────────────
        .route("/", get(root))
        .route("/health", get(health))
        // ── Analytics ───────────────────────────────────────────────
        .route("/api/analytics/compute", post(compute_analytics))
        .route("/api/analytics/adf-test", post(adf_test_handler))
        .route("/api/analytics/export", get(export_csv))
        .route("/api/analytics/correlation-matrix", get(correlation_matrix_handler))
        // ── Diagnostics ─────────────────────────────────────────────
        .route("/api/test/prices", get(test_prices))
        .route("/api/test/ohlc/:symbol", get(test_ohlc))
        // ── WebSocket ───────────────────────────────────────────────
        .route("/ws/live", get(ws::live_handler))
        .route("/ws/analytics/:symbol_a/:symbol_b", get(ws::analytics_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

/// CORS restricted to `origins`; an empty list allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(allowed))
    }
}

// =============================================================================
// Service status
// =============================================================================

async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.feed.is_running() {
        "connected"
    } else {
        "disconnected"
    };
    Json(serde_json::json!({
        "status": "running",
        "service": "Pairs Trading Analytics API",
        "version": env!("CARGO_PKG_VERSION"),
        "binance_status": status,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    binance_client: bool,
    feed_state: String,
    active_symbols: Vec<String>,
    price_count: usize,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let prices = state.feed.all_prices();
    let mut active_symbols: Vec<String> = prices.keys().cloned().collect();
    active_symbols.sort();

    Json(HealthResponse {
        status: "healthy",
        binance_client: state.feed.is_running(),
        feed_state: state.feed.state().to_string(),
        price_count: prices.len(),
        active_symbols,
        uptime_secs: state.uptime_secs(),
    })
}

// =============================================================================
// Analytics
// =============================================================================

fn default_timeframe() -> String {
    "1m".to_string()
}

fn default_regression_type() -> String {
    RegressionMethod::Ols.as_str().to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRequest {
    symbol_a: String,
    symbol_b: String,
    #[serde(default = "default_timeframe")]
    timeframe: String,
    #[serde(default = "default_regression_type")]
    regression_type: String,
}

fn load(state: &AppState, symbol_a: &str, symbol_b: &str) -> Result<PairSeries, ApiError> {
    let cfg = &state.config.analytics;
    Ok(load_pair(&state.feed, symbol_a, symbol_b, cfg.lookback, cfg.min_points)?)
}

async fn compute_analytics(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ComputeRequest>,
) -> Result<Json<AnalyticsBundle>, ApiError> {
    info!(
        symbol_a = %req.symbol_a,
        symbol_b = %req.symbol_b,
        timeframe = %req.timeframe,
        regression = %req.regression_type,
        "analytics requested"
    );

    let pair = load(&state, &req.symbol_a, &req.symbol_b)?;
    let bundle = compute_full_analytics(
        &pair.prices_a,
        &pair.prices_b,
        &pair.timestamps,
        &req.regression_type,
        &state.analytics,
    );

    if bundle.is_error() {
        warn!(error = ?bundle.error, "analytics returned the error bundle");
    } else if !bundle.fallbacks.is_empty() {
        warn!(fallbacks = ?bundle.fallbacks, "analytics used fallback values");
    }
    Ok(Json(bundle))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdfRequest {
    symbol_a: String,
    symbol_b: String,
}

#[derive(Serialize)]
struct AdfResponse {
    #[serde(rename = "symbolA")]
    symbol_a: String,
    #[serde(rename = "symbolB")]
    symbol_b: String,
    hedge_ratio: f64,
    adf_test: AdfResult,
}

async fn adf_test_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdfRequest>,
) -> Result<Json<AdfResponse>, ApiError> {
    let pair = load(&state, &req.symbol_a, &req.symbol_b)?;

    let beta = compute_hedge_ratio(
        &pair.prices_a,
        &pair.prices_b,
        RegressionMethod::Ols,
        &state.analytics.kalman,
    )
    .into_value()
    .beta;
    let spread = compute_spread(&pair.prices_a, &pair.prices_b, beta);
    let adf = adf_test(&spread).into_value().sanitized();

    Ok(Json(AdfResponse {
        symbol_a: req.symbol_a,
        symbol_b: req.symbol_b,
        hedge_ratio: sanitize(beta),
        adf_test: adf,
    }))
}

fn default_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(rename = "symbolA")]
    symbol_a: String,
    #[serde(rename = "symbolB")]
    symbol_b: String,
    #[serde(default = "default_format")]
    format: String,
}

async fn export_csv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if !query.format.eq_ignore_ascii_case("csv") {
        return Err(ApiError::BadRequest(format!(
            "Unsupported export format: {}",
            query.format
        )));
    }

    let pair = load(&state, &query.symbol_a, &query.symbol_b)?;
    let beta = compute_hedge_ratio(
        &pair.prices_a,
        &pair.prices_b,
        RegressionMethod::Ols,
        &state.analytics.kalman,
    )
    .into_value()
    .beta;
    let spread = compute_spread(&pair.prices_a, &pair.prices_b, beta);
    let zscore = compute_zscore(&spread, state.analytics.zscore_window);

    let body = render_csv(&pair, &spread, &zscore)?;
    let disposition = format!(
        "attachment; filename=analytics_{}_{}.csv",
        query.symbol_a, query.symbol_b
    );
    info!(rows = pair.len(), "analytics CSV exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    ))
}

/// `timestamp,price_a,price_b,spread,zscore`, one row per aligned candle.
fn render_csv(pair: &PairSeries, spread: &[f64], zscore: &[f64]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["timestamp", "price_a", "price_b", "spread", "zscore"])?;

    for i in 0..pair.len() {
        writer.write_record([
            pair.timestamps[i].clone(),
            pair.prices_a[i].to_string(),
            pair.prices_b[i].to_string(),
            sanitize(spread[i]).to_string(),
            sanitize(zscore[i]).to_string(),
        ])?;
    }

    writer.into_inner().context("failed to flush CSV buffer")
}

async fn correlation_matrix_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let lookback = state.config.analytics.lookback;

    let mut series: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for symbol in state.feed.symbols() {
        let candles = state.feed.recent_candles(symbol, lookback);
        if !candles.is_empty() {
            series.insert(
                symbol.to_uppercase(),
                candles.iter().map(|c| c.close).collect(),
            );
        }
    }

    if series.len() < 2 {
        return Err(ApiError::NotFound("Insufficient data".to_string()));
    }

    let symbols: Vec<String> = series.keys().cloned().collect();
    let matrix = sanitized_matrix(correlation_matrix(&series));
    Ok(Json(serde_json::json!({
        "symbols": symbols,
        "correlation_matrix": matrix,
    })))
}

// =============================================================================
// Diagnostics
// =============================================================================

async fn test_prices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feed = &state.feed;
    let prices: HashMap<&str, Option<f64>> = feed
        .symbols()
        .iter()
        .map(|s| (s.as_str(), feed.latest_price(s)))
        .collect();
    let volumes: HashMap<&str, Option<f64>> = feed
        .symbols()
        .iter()
        .map(|s| (s.as_str(), feed.latest_volume(s)))
        .collect();

    Json(serde_json::json!({
        "prices": prices,
        "ohlc_counts": feed.data_counts(),
        "volumes": volumes,
    }))
}

#[derive(Serialize)]
struct OhlcResponse {
    symbol: String,
    count: usize,
    data: Vec<Candle>,
}

async fn test_ohlc(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let data = state.feed.recent_candles(&symbol, 10);
    Json(OhlcResponse {
        symbol,
        count: data.len(),
        data,
    })
}

// =============================================================================
// Tests
// =============================================================================
