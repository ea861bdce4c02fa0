//! The entitlement evaluator — the tier-walking decision core.
//!
//! Given a resolved identity and an item, walk the tiers in fixed precedence
//! and return a [`Verdict`], consuming quota/free-tier slots atomically along
//! the way. The precedence is a product rule, not configuration:
//!
//! 1. grant fast-path (idempotent repeat access),
//! 2. authenticated subscription,
//! 3. legacy subject-scoped subscription,
//! 4. one-off purchase,
//! 5. daily free tier,
//! 6. payment required.
//!
//! The fast-path comes first so a grant stays valid forever regardless of
//! which tier originally produced it, even after the subscription that paid
//! for it lapses. Subscriptions come before purchase and free tier so a
//! paying subscriber is never asked to spend their free allowance.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
  ItemId, UserId,
  identity::{Fingerprint, Owner},
  plan::ActiveSubscription,
  store::EntitlementStore,
  verdict::{AccessTier, Verdict},
};

/// The per-request identity the evaluator works with.
///
/// `user_id` is present only when the request carried a valid session; the
/// subject is always present. Entitlement found under either key is valid for
/// the request, but ledger writes key to the subject.
#[derive(Debug, Clone)]
pub struct EvalContext<'a> {
  pub subject_id:  Uuid,
  pub user_id:     Option<UserId>,
  pub fingerprint: &'a Fingerprint,
}

impl EvalContext<'_> {
  /// Owners to consult for subscriptions and purchases, authenticated
  /// identity first.
  fn owners(&self) -> impl Iterator<Item = Owner> + '_ {
    self
      .user_id
      .map(Owner::User)
      .into_iter()
      .chain(std::iter::once(Owner::Subject(self.subject_id)))
  }
}

/// Walk the tiers for `item_id` and return the verdict.
///
/// `today` must be computed once per request (UTC calendar date) and reused
/// for every ledger operation within it, so a request straddling midnight
/// cannot observe two different days.
///
/// Storage errors bubble up undecorated; a partial evaluation is never
/// reported as granted.
pub async fn evaluate<S: EntitlementStore>(
  store: &S,
  ctx: &EvalContext<'_>,
  item_id: ItemId,
  today: NaiveDate,
) -> Result<Verdict, S::Error> {
  // 1. Grant fast-path: repeat access never touches a counter.
  if store.has_grant(ctx.subject_id, item_id).await? {
    tracing::debug!(subject = %ctx.subject_id, item_id, "grant fast-path hit");
    return Ok(Verdict::Granted { access: AccessTier::Existing });
  }

  // 2–3. Subscription, authenticated owner first, legacy subject second.
  // The first matching subscription decides: an exhausted quota is reported
  // as limit_exceeded rather than silently spending the purchase or free
  // tiers on a paying subscriber.
  for owner in ctx.owners() {
    if let Some(sub) = store.find_active_subscription(owner).await? {
      return evaluate_subscription(store, ctx, item_id, today, sub).await;
    }
  }

  // 4. One-off purchase, under either identity.
  for owner in ctx.owners() {
    if store.has_paid_purchase(owner, item_id).await? {
      store.record_grant(ctx.subject_id, item_id).await?;
      return Ok(Verdict::Granted { access: AccessTier::Purchase });
    }
  }

  // 5. Daily free tier: one atomic consume covering both the per-subject cap
  // and the network fingerprint marker. A lost race lands here as `false`.
  if store
    .try_consume_free_use(ctx.subject_id, today, ctx.fingerprint)
    .await?
  {
    store.record_grant(ctx.subject_id, item_id).await?;
    tracing::debug!(subject = %ctx.subject_id, item_id, "free tier consumed");
    return Ok(Verdict::Granted { access: AccessTier::FreeTier });
  }

  // 6. Nothing matched; report without mutating anything.
  let free_remaining =
    free_remaining_today(store, ctx.subject_id, ctx.fingerprint, today).await?;
  let plans = store.list_active_plans().await?;
  Ok(Verdict::PaymentRequired { free_remaining, plans })
}

/// Resolve the verdict for a matched subscription: grant (consuming a quota
/// slot unless the plan is unlimited) or report the exhausted quota.
async fn evaluate_subscription<S: EntitlementStore>(
  store: &S,
  ctx: &EvalContext<'_>,
  item_id: ItemId,
  today: NaiveDate,
  sub: ActiveSubscription,
) -> Result<Verdict, S::Error> {
  let Some(quota) = sub.plan.daily_quota else {
    store.record_grant(ctx.subject_id, item_id).await?;
    return Ok(Verdict::Granted {
      access: AccessTier::Subscription { plan: sub.plan.code, unlimited: true },
    });
  };

  if store
    .try_consume_subscription_use(sub.subscription_id, today, quota)
    .await?
  {
    store.record_grant(ctx.subject_id, item_id).await?;
    return Ok(Verdict::Granted {
      access: AccessTier::Subscription {
        plan:      sub.plan.code,
        unlimited: false,
      },
    });
  }

  let used = store.subscription_uses(sub.subscription_id, today).await?;
  tracing::debug!(
    subscription = sub.subscription_id,
    used,
    quota,
    "subscription quota exhausted"
  );
  Ok(Verdict::LimitExceeded { used, limit: quota, plan: sub.plan.code })
}

/// Free uses left for the subject today: 1 unless the subject or anyone on
/// its network fingerprint has already consumed it. Read-only — shared by the
/// status endpoint and the payment-required response.
pub async fn free_remaining_today<S: EntitlementStore>(
  store: &S,
  subject_id: Uuid,
  fingerprint: &Fingerprint,
  today: NaiveDate,
) -> Result<u8, S::Error> {
  let used = store.has_free_use(subject_id, today).await?
    || store.network_used(today, &fingerprint.network_hash).await?;
  Ok(if used { 0 } else { 1 })
}
