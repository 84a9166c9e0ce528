use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use przetarg_adapters::AdapterError;
use przetarg_storage::StoreError;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

/// Request input rejected before any store or upstream call.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),
    #[error("`{param}` must be a calendar date in YYYY-MM-DD format, got `{value}`")]
    InvalidDate { param: &'static str, value: String },
    #[error("date_from {from} is after date_to {to}")]
    DateRangeReversed { from: NaiveDate, to: NaiveDate },
    #[error("`{param}` is not valid: `{value}`")]
    InvalidParameter { param: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("not found")]
    NotFound,
    #[error("upstream request failed: {0}")]
    Upstream(#[source] AdapterError),
    #[error("storage failure: {0}")]
    Store(#[source] StoreError),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            other => ApiError::Store(other),
        }
    }
}

impl From<AdapterError> for ApiError {
    fn from(err: AdapterError) -> Self {
        ApiError::Upstream(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Upstream(err) => warn!(error = %err, "relay upstream failure"),
            ApiError::Store(err) => error!(error = %err, "store failure"),
            _ => {}
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
