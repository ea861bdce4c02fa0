//! Reference entities consumed by the evaluator: plans, subscriptions and
//! one-off purchases.
//!
//! These tables are populated by the payment-settlement collaborator; the
//! engine only reads settled state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Error, ItemId, Result,
  identity::Owner,
};

/// Billing cadence of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
  Day,
  Week,
  Month,
  Year,
}

impl BillingInterval {
  pub fn as_str(&self) -> &'static str {
    match self {
      BillingInterval::Day => "day",
      BillingInterval::Week => "week",
      BillingInterval::Month => "month",
      BillingInterval::Year => "year",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "day" => Ok(BillingInterval::Day),
      "week" => Ok(BillingInterval::Week),
      "month" => Ok(BillingInterval::Month),
      "year" => Ok(BillingInterval::Year),
      other => Err(Error::UnknownInterval(other.to_owned())),
    }
  }
}

/// A purchasable subscription plan. `daily_quota: None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub plan_id:     i64,
  pub code:        String,
  pub interval:    BillingInterval,
  pub price_cents: i64,
  pub currency:    String,
  pub daily_quota: Option<u32>,
  pub active:      bool,
}

/// Lifecycle state of a subscription row. Only [`Active`](Self::Active) rows
/// participate in entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
  Active,
  Canceled,
  PastDue,
  Incomplete,
}

impl SubscriptionStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      SubscriptionStatus::Active => "active",
      SubscriptionStatus::Canceled => "canceled",
      SubscriptionStatus::PastDue => "past_due",
      SubscriptionStatus::Incomplete => "incomplete",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "active" => Ok(SubscriptionStatus::Active),
      "canceled" => Ok(SubscriptionStatus::Canceled),
      "past_due" => Ok(SubscriptionStatus::PastDue),
      "incomplete" => Ok(SubscriptionStatus::Incomplete),
      other => Err(Error::UnknownSubscriptionStatus(other.to_owned())),
    }
  }
}

/// The view of a subscription the evaluator works with: an active, unexpired
/// row joined with its plan.
#[derive(Debug, Clone)]
pub struct ActiveSubscription {
  pub subscription_id:    i64,
  pub owner:              Owner,
  pub plan:               Plan,
  pub current_period_end: Option<DateTime<Utc>>,
}

/// Input for a settlement-side subscription insert. Used by tests and by the
/// external settlement process.
#[derive(Debug, Clone)]
pub struct NewSubscription {
  pub owner:              Owner,
  pub plan_id:            i64,
  pub status:             SubscriptionStatus,
  pub current_period_end: Option<DateTime<Utc>>,
}

/// Input for a settlement-side plan insert.
#[derive(Debug, Clone)]
pub struct NewPlan {
  pub code:        String,
  pub interval:    BillingInterval,
  pub price_cents: i64,
  pub currency:    String,
  pub daily_quota: Option<u32>,
  pub active:      bool,
}

/// Settlement state of a one-off purchase. Only `Paid` settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
  Pending,
  Paid,
  Refunded,
}

impl PurchaseStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      PurchaseStatus::Pending => "pending",
      PurchaseStatus::Paid => "paid",
      PurchaseStatus::Refunded => "refunded",
    }
  }
}

/// A one-off purchase of a single item.
#[derive(Debug, Clone)]
pub struct NewPurchase {
  pub owner:   Owner,
  pub item_id: ItemId,
  pub status:  PurchaseStatus,
}
