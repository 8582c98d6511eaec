pub mod pair;
pub mod rest;
pub mod ws;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use self::pair::PairDataError;

/// Handler error rendered as `{ "detail": "..." }`.
#[derive(Debug)]
pub enum ApiError {
    Pair(PairDataError),
    BadRequest(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<PairDataError> for ApiError {
    fn from(e: PairDataError) -> Self {
        Self::Pair(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::Pair(e) => return e.into_response(),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Internal(e) => {
                error!(error = %e, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
