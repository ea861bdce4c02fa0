//! API error type and [`axum::response::IntoResponse`] implementation.
//!
//! Business outcomes (`limit_exceeded`, `payment_required`) are not errors
//! and never pass through here; they have their own response shapes in
//! [`crate::entitlement`]. This type covers only client mistakes and genuine
//! server failures.

use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// An error returned by an API handler.
#[derive(Debug, Error)]
pub enum ApiError {
  #[error("bad request: {0}")]
  BadRequest(String),

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ApiError {
  /// Wrap a storage error from a decisive read/write. These must surface as
  /// a retryable server error — never as a silent grant or denial.
  pub fn store<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
    ApiError::Store(Box::new(e))
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    match self {
      ApiError::BadRequest(message) => (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "bad_request", "message": message })),
      )
        .into_response(),
      ApiError::Store(e) => {
        // The cause is logged server-side; the body stays generic.
        tracing::error!(error = %e, "store failure during evaluation");
        (
          StatusCode::INTERNAL_SERVER_ERROR,
          Json(json!({ "error": "server_error" })),
        )
          .into_response()
      }
    }
  }
}
