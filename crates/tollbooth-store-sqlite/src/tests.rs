//! Integration tests for `SqliteStore` against an in-memory database,
//! including the full evaluator scenarios run on the real store.

use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use tollbooth_core::{
  evaluate::{EvalContext, evaluate, free_remaining_today},
  identity::{Fingerprint, Owner},
  plan::{
    BillingInterval, NewPlan, NewPurchase, NewSubscription, PurchaseStatus,
    SubscriptionStatus,
  },
  store::EntitlementStore,
  verdict::{AccessTier, Verdict},
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn day() -> NaiveDate {
  NaiveDate::from_ymd_opt(2026, 8, 30).unwrap()
}

fn fp(net: &str) -> Fingerprint {
  Fingerprint {
    network_hash: net.to_owned(),
    agent_hash:   "agent-hash".to_owned(),
  }
}

fn basic_plan(quota: Option<u32>) -> NewPlan {
  NewPlan {
    code: "basic".to_owned(),
    interval: BillingInterval::Month,
    price_cents: 999,
    currency: "EUR".to_owned(),
    daily_quota: quota,
    active: true,
  }
}

// ─── Subjects ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn ensure_subject_creates_then_touches() {
  let s = store().await;
  let id = Uuid::new_v4();

  let created = s.ensure_subject(id).await.unwrap();
  assert_eq!(created.subject_id, id);

  let touched = s.ensure_subject(id).await.unwrap();
  assert_eq!(touched.subject_id, id);
  assert_eq!(touched.created_at, created.created_at);
  assert!(touched.last_seen_at >= created.last_seen_at);
}

#[tokio::test]
async fn record_fingerprint_appends() {
  let s = store().await;
  let id = Uuid::new_v4();
  s.ensure_subject(id).await.unwrap();

  s.record_fingerprint(id, &fp("net-1")).await.unwrap();
  s.record_fingerprint(id, &fp("net-2")).await.unwrap();
  // Appends only; nothing to assert beyond absence of errors here, the table
  // is read offline.
}

#[tokio::test]
async fn find_user_by_email() {
  let s = store().await;
  assert!(s.find_user_by_email("nobody@example.com").await.unwrap().is_none());

  let id = s.add_user("alice@example.com").await.unwrap();
  assert_eq!(
    s.find_user_by_email("alice@example.com").await.unwrap(),
    Some(id)
  );
}

// ─── Grant ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn grant_is_idempotent() {
  let s = store().await;
  let subject = Uuid::new_v4();

  assert!(!s.has_grant(subject, 1).await.unwrap());

  s.record_grant(subject, 1).await.unwrap();
  assert!(s.has_grant(subject, 1).await.unwrap());

  // Duplicate write: no error, still one logical grant.
  s.record_grant(subject, 1).await.unwrap();
  assert!(s.has_grant(subject, 1).await.unwrap());
  assert!(!s.has_grant(subject, 2).await.unwrap());
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn active_subscription_found_with_plan() {
  let s = store().await;
  let user = s.add_user("bob@example.com").await.unwrap();
  let plan = s.add_plan(basic_plan(Some(5))).await.unwrap();

  s.add_subscription(NewSubscription {
    owner:              Owner::User(user),
    plan_id:            plan.plan_id,
    status:             SubscriptionStatus::Active,
    current_period_end: Some(Utc::now() + Duration::days(30)),
  })
  .await
  .unwrap();

  let found = s.find_active_subscription(Owner::User(user)).await.unwrap();
  let found = found.expect("subscription");
  assert_eq!(found.plan.code, "basic");
  assert_eq!(found.plan.daily_quota, Some(5));
}

#[tokio::test]
async fn canceled_or_lapsed_subscriptions_never_match() {
  let s = store().await;
  let user = s.add_user("carol@example.com").await.unwrap();
  let plan = s.add_plan(basic_plan(Some(5))).await.unwrap();

  s.add_subscription(NewSubscription {
    owner:              Owner::User(user),
    plan_id:            plan.plan_id,
    status:             SubscriptionStatus::Canceled,
    current_period_end: None,
  })
  .await
  .unwrap();

  s.add_subscription(NewSubscription {
    owner:              Owner::User(user),
    plan_id:            plan.plan_id,
    status:             SubscriptionStatus::Active,
    current_period_end: Some(Utc::now() - Duration::days(1)),
  })
  .await
  .unwrap();

  assert!(s.find_active_subscription(Owner::User(user)).await.unwrap().is_none());
}

#[tokio::test]
async fn null_period_end_counts_as_unexpired() {
  let s = store().await;
  let subject = Uuid::new_v4();
  let plan = s.add_plan(basic_plan(None)).await.unwrap();

  s.add_subscription(NewSubscription {
    owner:              Owner::Subject(subject),
    plan_id:            plan.plan_id,
    status:             SubscriptionStatus::Active,
    current_period_end: None,
  })
  .await
  .unwrap();

  let found = s
    .find_active_subscription(Owner::Subject(subject))
    .await
    .unwrap();
  assert!(found.is_some());
}

// ─── Purchases ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn only_paid_purchases_count() {
  let s = store().await;
  let subject = Uuid::new_v4();

  s.add_purchase(NewPurchase {
    owner:   Owner::Subject(subject),
    item_id: 9,
    status:  PurchaseStatus::Pending,
  })
  .await
  .unwrap();
  assert!(!s.has_paid_purchase(Owner::Subject(subject), 9).await.unwrap());

  s.add_purchase(NewPurchase {
    owner:   Owner::Subject(subject),
    item_id: 9,
    status:  PurchaseStatus::Paid,
  })
  .await
  .unwrap();
  assert!(s.has_paid_purchase(Owner::Subject(subject), 9).await.unwrap());
  assert!(!s.has_paid_purchase(Owner::Subject(subject), 10).await.unwrap());
}

// ─── Usage ledger ────────────────────────────────────────────────────────────

#[tokio::test]
async fn subscription_quota_caps_at_limit() {
  let s = store().await;

  assert!(s.try_consume_subscription_use(1, day(), 2).await.unwrap());
  assert!(s.try_consume_subscription_use(1, day(), 2).await.unwrap());
  // Third slot denied; counter stays at the cap.
  assert!(!s.try_consume_subscription_use(1, day(), 2).await.unwrap());
  assert_eq!(s.subscription_uses(1, day()).await.unwrap(), 2);

  // A different day starts fresh.
  let tomorrow = day().succ_opt().unwrap();
  assert!(s.try_consume_subscription_use(1, tomorrow, 2).await.unwrap());
}

#[tokio::test]
async fn zero_quota_never_consumes() {
  let s = store().await;
  assert!(!s.try_consume_subscription_use(1, day(), 0).await.unwrap());
  assert_eq!(s.subscription_uses(1, day()).await.unwrap(), 0);
}

#[tokio::test]
async fn free_use_once_per_subject_per_day() {
  let s = store().await;
  let subject = Uuid::new_v4();

  assert!(!s.has_free_use(subject, day()).await.unwrap());
  assert!(s.try_consume_free_use(subject, day(), &fp("net-a")).await.unwrap());
  assert!(s.has_free_use(subject, day()).await.unwrap());

  // Second consume the same day fails, even from a different network.
  assert!(!s.try_consume_free_use(subject, day(), &fp("net-b")).await.unwrap());

  let tomorrow = day().succ_opt().unwrap();
  assert!(s.try_consume_free_use(subject, tomorrow, &fp("net-a")).await.unwrap());
}

#[tokio::test]
async fn network_marker_blocks_other_subjects() {
  let s = store().await;
  let a = Uuid::new_v4();
  let b = Uuid::new_v4();
  let shared = fp("net-shared");

  assert!(s.try_consume_free_use(a, day(), &shared).await.unwrap());
  assert!(s.network_used(day(), &shared.network_hash).await.unwrap());

  // Same network, different subject, same day: blocked, and the rolled-back
  // attempt must not burn b's own counter.
  assert!(!s.try_consume_free_use(b, day(), &shared).await.unwrap());
  assert!(!s.has_free_use(b, day()).await.unwrap());

  // b on its own network is fine.
  assert!(s.try_consume_free_use(b, day(), &fp("net-own")).await.unwrap());
}

// ─── Evaluator scenarios on the real store ───────────────────────────────────

#[tokio::test]
async fn scenario_unlimited_subscription_skips_free_tier() {
  let s = store().await;
  let subject = Uuid::new_v4();
  let user = s.add_user("dora@example.com").await.unwrap();
  let plan = s.add_plan(basic_plan(None)).await.unwrap();
  s.add_subscription(NewSubscription {
    owner:              Owner::User(user),
    plan_id:            plan.plan_id,
    status:             SubscriptionStatus::Active,
    current_period_end: None,
  })
  .await
  .unwrap();

  let fingerprint = fp("net-a");
  let ctx = EvalContext {
    subject_id:  subject,
    user_id:     Some(user),
    fingerprint: &fingerprint,
  };
  let verdict = evaluate(&s, &ctx, 1, day()).await.unwrap();

  assert_eq!(
    verdict,
    Verdict::Granted {
      access: AccessTier::Subscription { plan: "basic".into(), unlimited: true },
    }
  );
  assert!(!s.has_free_use(subject, day()).await.unwrap());
  assert!(!s.network_used(day(), "net-a").await.unwrap());
}

#[tokio::test]
async fn scenario_free_tier_then_payment_required() {
  let s = store().await;
  s.add_plan(basic_plan(Some(2))).await.unwrap();
  let subject = Uuid::new_v4();
  let fingerprint = fp("net-b");
  let ctx =
    EvalContext { subject_id: subject, user_id: None, fingerprint: &fingerprint };

  let first = evaluate(&s, &ctx, 1, day()).await.unwrap();
  assert_eq!(first, Verdict::Granted { access: AccessTier::FreeTier });

  let second = evaluate(&s, &ctx, 2, day()).await.unwrap();
  match second {
    Verdict::PaymentRequired { free_remaining, plans } => {
      assert_eq!(free_remaining, 0);
      assert_eq!(plans.len(), 1);
    }
    other => panic!("expected payment_required, got {other:?}"),
  }

  // The granted item stays accessible via the fast-path forever.
  let repeat = evaluate(&s, &ctx, 1, day()).await.unwrap();
  assert_eq!(repeat, Verdict::Granted { access: AccessTier::Existing });
}

#[tokio::test]
async fn scenario_shared_fingerprint_blocks_second_subject() {
  let s = store().await;
  let shared = fp("net-cafe");

  let a = Uuid::new_v4();
  let ctx_a = EvalContext { subject_id: a, user_id: None, fingerprint: &shared };
  assert_eq!(
    evaluate(&s, &ctx_a, 1, day()).await.unwrap(),
    Verdict::Granted { access: AccessTier::FreeTier }
  );

  let b = Uuid::new_v4();
  let ctx_b = EvalContext { subject_id: b, user_id: None, fingerprint: &shared };
  let verdict = evaluate(&s, &ctx_b, 2, day()).await.unwrap();
  assert!(matches!(
    verdict,
    Verdict::PaymentRequired { free_remaining: 0, .. }
  ));
}

#[tokio::test]
async fn scenario_quota_two_then_limit_exceeded() {
  let s = store().await;
  let subject = Uuid::new_v4();
  let user = s.add_user("eve@example.com").await.unwrap();
  let plan = s.add_plan(basic_plan(Some(2))).await.unwrap();
  let sub_id = s
    .add_subscription(NewSubscription {
      owner:              Owner::User(user),
      plan_id:            plan.plan_id,
      status:             SubscriptionStatus::Active,
      current_period_end: None,
    })
    .await
    .unwrap();

  // Two prior uses recorded today.
  assert!(s.try_consume_subscription_use(sub_id, day(), 2).await.unwrap());
  assert!(s.try_consume_subscription_use(sub_id, day(), 2).await.unwrap());

  let fingerprint = fp("net-c");
  let ctx = EvalContext {
    subject_id:  subject,
    user_id:     Some(user),
    fingerprint: &fingerprint,
  };
  let verdict = evaluate(&s, &ctx, 3, day()).await.unwrap();

  assert_eq!(
    verdict,
    Verdict::LimitExceeded { used: 2, limit: 2, plan: "basic".into() }
  );
}

#[tokio::test]
async fn concurrent_free_tier_race_consumes_exactly_once() {
  let s = store().await;
  let subject = Uuid::new_v4();
  let today = day();

  // N parallel evaluations racing for the same subject/day: exactly one may
  // win the free tier, the rest must land on payment_required.
  let mut handles = Vec::new();
  for item in 0..8i64 {
    let s = s.clone();
    handles.push(tokio::spawn(async move {
      let fingerprint = fp("net-race");
      let ctx = EvalContext {
        subject_id:  subject,
        user_id:     None,
        fingerprint: &fingerprint,
      };
      evaluate(&s, &ctx, item, today).await.unwrap()
    }));
  }

  let mut free_grants = 0;
  let mut denials = 0;
  for handle in handles {
    match handle.await.unwrap() {
      Verdict::Granted { access: AccessTier::FreeTier } => free_grants += 1,
      Verdict::PaymentRequired { .. } => denials += 1,
      other => panic!("unexpected verdict {other:?}"),
    }
  }

  assert_eq!(free_grants, 1);
  assert_eq!(denials, 7);
  assert_eq!(
    free_remaining_today(&s, subject, &fp("net-race"), today)
      .await
      .unwrap(),
    0
  );
}
