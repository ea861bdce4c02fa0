//! Handlers for the entitlement endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/entitlement/status` | `{ "free_remaining": 0\|1 }`, no side effects |
//! | `POST` | `/entitlement/evaluate` | Body: `{"item_id": 7}`; walks the tiers |
//! | `GET`  | `/healthz` | Store connectivity check |

use std::net::SocketAddr;

use axum::{
  Json,
  extract::{ConnectInfo, State, rejection::JsonRejection},
  http::{HeaderMap, HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tollbooth_core::{
  ItemId,
  evaluate::{EvalContext, evaluate, free_remaining_today},
  plan::Plan,
  store::EntitlementStore,
  verdict::{AccessTier, Verdict},
};

use crate::{
  AppState,
  error::ApiError,
  identity::{client_ip, resolve_identity},
};

// ─── Status ──────────────────────────────────────────────────────────────────

/// `GET /entitlement/status`
pub async fn status<S>(
  State(state): State<AppState<S>>,
  ConnectInfo(peer): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
) -> Result<Response, ApiError>
where
  S: EntitlementStore + Clone + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  let identity = resolve_identity(
    state.store.as_ref(),
    &state.keys,
    &headers,
    peer.ip(),
    state.secure_cookies,
  )
  .await;

  let today = Utc::now().date_naive();
  let free_remaining = free_remaining_today(
    state.store.as_ref(),
    identity.subject_id,
    &identity.fingerprint,
    today,
  )
  .await
  .map_err(ApiError::store)?;

  let response = Json(json!({ "free_remaining": free_remaining })).into_response();
  Ok(with_cookie(response, identity.set_cookie))
}

// ─── Evaluate ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct EvaluateBody {
  #[serde(alias = "itemId")]
  pub item_id: ItemId,
}

/// The documented response shapes. `limit_exceeded` and `payment_required`
/// are deliberately distinct so callers can tell "you already used today's
/// allowance" apart from "try paying".
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum EvaluateResponse {
  Granted {
    #[serde(flatten)]
    access: AccessTier,
  },
  PaymentRequired {
    free_remaining: u8,
    plans:          Vec<Plan>,
  },
  LimitExceeded {
    used:  u32,
    limit: u32,
    plan:  String,
  },
}

/// `POST /entitlement/evaluate` — body: `{"item_id": 7}`
pub async fn evaluate_item<S>(
  State(state): State<AppState<S>>,
  ConnectInfo(peer): ConnectInfo<SocketAddr>,
  headers: HeaderMap,
  body: Result<Json<EvaluateBody>, JsonRejection>,
) -> Result<Response, ApiError>
where
  S: EntitlementStore + Clone + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  // Malformed input never reaches the ledger.
  let Json(body) = body.map_err(|e| ApiError::BadRequest(e.to_string()))?;

  // Verified crawlers bypass the gate entirely: read-only, short cache, no
  // ledger writes, no cookie minting.
  let ip = client_ip(&headers, peer.ip());
  if state.crawler.is_verified_crawler(ip).await {
    tracing::debug!(%ip, item_id = body.item_id, "serving verified crawler");
    let mut response =
      Json(json!({ "status": "granted", "access_type": "crawler" }))
        .into_response();
    response.headers_mut().insert(
      header::CACHE_CONTROL,
      HeaderValue::from_static("private, max-age=60"),
    );
    return Ok(response);
  }

  let identity = resolve_identity(
    state.store.as_ref(),
    &state.keys,
    &headers,
    peer.ip(),
    state.secure_cookies,
  )
  .await;

  // One UTC date per request, reused by every ledger check and write, so an
  // evaluation straddling midnight stays on one day.
  let today = Utc::now().date_naive();
  let ctx = EvalContext {
    subject_id:  identity.subject_id,
    user_id:     identity.user_id,
    fingerprint: &identity.fingerprint,
  };

  let verdict = evaluate(state.store.as_ref(), &ctx, body.item_id, today)
    .await
    .map_err(ApiError::store)?;

  let (status, payload) = match verdict {
    Verdict::Granted { access } => {
      (StatusCode::OK, EvaluateResponse::Granted { access })
    }
    Verdict::PaymentRequired { free_remaining, plans } => (
      StatusCode::OK,
      EvaluateResponse::PaymentRequired { free_remaining, plans },
    ),
    Verdict::LimitExceeded { used, limit, plan } => (
      StatusCode::FORBIDDEN,
      EvaluateResponse::LimitExceeded { used, limit, plan },
    ),
  };

  let response = (status, Json(payload)).into_response();
  Ok(with_cookie(response, identity.set_cookie))
}

// ─── Health ──────────────────────────────────────────────────────────────────

/// `GET /healthz`
pub async fn health<S>(
  State(state): State<AppState<S>>,
) -> Result<&'static str, ApiError>
where
  S: EntitlementStore + Clone + Send + Sync + 'static,
  S::Error: std::error::Error + Send + Sync + 'static,
{
  state.store.ping().await.map_err(ApiError::store)?;
  Ok("ok")
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn with_cookie(mut response: Response, set_cookie: Option<String>) -> Response {
  if let Some(cookie) = set_cookie
    && let Ok(value) = HeaderValue::from_str(&cookie)
  {
    response.headers_mut().append(header::SET_COOKIE, value);
  }
  response
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn granted_response_flattens_access_type() {
    let body = EvaluateResponse::Granted {
      access: AccessTier::Subscription { plan: "basic".into(), unlimited: false },
    };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(
      value,
      json!({
        "status": "granted",
        "access_type": "subscription",
        "plan": "basic",
        "unlimited": false,
      })
    );

    let body = EvaluateResponse::Granted { access: AccessTier::Existing };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(value, json!({ "status": "granted", "access_type": "existing" }));
  }

  #[test]
  fn limit_exceeded_response_shape() {
    let body =
      EvaluateResponse::LimitExceeded { used: 2, limit: 2, plan: "basic".into() };
    let value = serde_json::to_value(&body).unwrap();
    assert_eq!(
      value,
      json!({ "status": "limit_exceeded", "used": 2, "limit": 2, "plan": "basic" })
    );
  }

  #[test]
  fn evaluate_body_accepts_both_key_spellings() {
    let a: EvaluateBody = serde_json::from_str(r#"{"item_id": 7}"#).unwrap();
    let b: EvaluateBody = serde_json::from_str(r#"{"itemId": 7}"#).unwrap();
    assert_eq!(a.item_id, 7);
    assert_eq!(b.item_id, 7);

    // Non-numeric ids are a client error, rejected before any ledger work.
    assert!(serde_json::from_str::<EvaluateBody>(r#"{"item_id": "abc"}"#).is_err());
  }
}
