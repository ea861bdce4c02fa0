//! HTTP boundary of the Tollbooth entitlement engine.
//!
//! Exposes an axum [`Router`] backed by any
//! [`tollbooth_core::store::EntitlementStore`]. TLS and transport concerns
//! are the caller's responsibility; the server binary must use
//! `into_make_service_with_connect_info::<SocketAddr>()` so handlers can see
//! the peer address.
//!
//! # Mounting
//!
//! ```rust,ignore
//! let app = tollbooth_api::router(state);
//! ```

#![allow(async_fn_in_trait)]

pub mod crawler;
pub mod entitlement;
pub mod error;
pub mod identity;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use tollbooth_core::store::EntitlementStore;

pub use crawler::CrawlerFilter;
pub use error::ApiError;
pub use identity::Keys;

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState<S: EntitlementStore> {
  pub store:          Arc<S>,
  pub keys:           Arc<Keys>,
  pub crawler:        Arc<CrawlerFilter>,
  /// Fallback for the cookie `Secure` flag when the request scheme cannot be
  /// determined (i.e. when not behind a forwarded-proto header).
  pub secure_cookies: bool,
}

/// Build a fully-materialised API router for `state`.
pub fn router<S>(state: AppState<S>) -> Router
where
  S: EntitlementStore + Clone + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  Router::new()
    .route("/entitlement/status", get(entitlement::status::<S>))
    .route("/entitlement/evaluate", post(entitlement::evaluate_item::<S>))
    .route("/healthz", get(entitlement::health::<S>))
    .with_state(state)
}
