//! The `EntitlementStore` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `tollbooth-store-sqlite`). Higher layers (`tollbooth-api`, the evaluator)
//! depend on this abstraction, not on any concrete backend.
//!
//! The `try_consume_*` operations are the concurrency boundary of the whole
//! engine: each must be a single atomic conditional write that re-validates
//! its cap, so that two simultaneous requests for the same key cannot both
//! consume the last free use or the last quota slot. A lost race surfaces as
//! `false`, never as a double count.

use std::future::Future;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
  ItemId, UserId,
  identity::{Fingerprint, Owner, Subject},
  plan::{ActiveSubscription, NewPlan, NewPurchase, NewSubscription, Plan},
};

/// Abstraction over a Tollbooth storage backend.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes (e.g. tokio with `axum`).
pub trait EntitlementStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Identity ──────────────────────────────────────────────────────────

  /// Insert the subject row if absent, touch `last_seen_at` if present, and
  /// return the row. The id is caller-supplied so it can be bound into the
  /// identity cookie before or after persistence.
  fn ensure_subject(
    &self,
    subject_id: Uuid,
  ) -> impl Future<Output = Result<Subject, Self::Error>> + Send + '_;

  /// Append a fingerprint observation for the subject. Callers treat this as
  /// best-effort: an error here is logged, not propagated to the request.
  fn record_fingerprint<'a>(
    &'a self,
    subject_id: Uuid,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Map a verified account email to its user id. Registration itself is the
  /// external identity collaborator's job.
  fn find_user_by_email<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<Option<UserId>, Self::Error>> + Send + 'a;

  // ── Grant ledger ──────────────────────────────────────────────────────

  /// Fast-path lookup: has this subject ever been granted this item?
  fn has_grant(
    &self,
    subject_id: Uuid,
    item_id: ItemId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Append-once grant record. A duplicate write is a no-op, not an error —
  /// uniqueness on (subject, item) is enforced by the store.
  fn record_grant(
    &self,
    subject_id: Uuid,
    item_id: ItemId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Plans, subscriptions, purchases (settlement-populated) ────────────

  /// Find the newest active, unexpired subscription for `owner`, joined with
  /// its plan. Canceled and lapsed rows never match.
  fn find_active_subscription(
    &self,
    owner: Owner,
  ) -> impl Future<Output = Result<Option<ActiveSubscription>, Self::Error>> + Send + '_;

  /// Is there a settled one-off purchase of `item_id` by `owner`?
  fn has_paid_purchase(
    &self,
    owner: Owner,
    item_id: ItemId,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// All active plans, for the payment-required response.
  fn list_active_plans(
    &self,
  ) -> impl Future<Output = Result<Vec<Plan>, Self::Error>> + Send + '_;

  // Insert helpers used by the settlement process and by tests. The engine
  // itself never mutates these tables.

  fn add_plan(
    &self,
    plan: NewPlan,
  ) -> impl Future<Output = Result<Plan, Self::Error>> + Send + '_;

  fn add_subscription(
    &self,
    subscription: NewSubscription,
  ) -> impl Future<Output = Result<i64, Self::Error>> + Send + '_;

  fn add_purchase(
    &self,
    purchase: NewPurchase,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn add_user<'a>(
    &'a self,
    email: &'a str,
  ) -> impl Future<Output = Result<UserId, Self::Error>> + Send + 'a;

  // ── Usage ledger ──────────────────────────────────────────────────────

  /// Uses consumed today by a subscription. Read-only; quota enforcement
  /// happens in [`try_consume_subscription_use`](Self::try_consume_subscription_use).
  fn subscription_uses(
    &self,
    subscription_id: i64,
    date: NaiveDate,
  ) -> impl Future<Output = Result<u32, Self::Error>> + Send + '_;

  /// Atomically increment the subscription's daily counter iff it is below
  /// `quota`. Returns whether a slot was consumed.
  fn try_consume_subscription_use(
    &self,
    subscription_id: i64,
    date: NaiveDate,
    quota: u32,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Has the subject consumed its free use on `date`?
  fn has_free_use(
    &self,
    subject_id: Uuid,
    date: NaiveDate,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Has any subject on this network fingerprint consumed the free tier on
  /// `date`? Existence alone blocks — that is the anti-abuse control.
  fn network_used<'a>(
    &'a self,
    date: NaiveDate,
    network_hash: &'a str,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  /// Atomically consume the subject's daily free use: mark the network
  /// fingerprint used and increment the per-subject counter, both guarded,
  /// in one transaction. Returns whether the free use was consumed.
  fn try_consume_free_use<'a>(
    &'a self,
    subject_id: Uuid,
    date: NaiveDate,
    fingerprint: &'a Fingerprint,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Health ────────────────────────────────────────────────────────────

  /// Cheap connectivity check for the health endpoint.
  fn ping(&self) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
