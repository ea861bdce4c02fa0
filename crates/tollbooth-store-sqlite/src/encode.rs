//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings, calendar dates as `YYYY-MM-DD`,
//! UUIDs as hyphenated lowercase strings. All stored timestamps are UTC with
//! a fixed `+00:00` offset, so lexicographic comparison in SQL is
//! chronological.

use chrono::{DateTime, NaiveDate, Utc};
use tollbooth_core::{
  identity::{Owner, Subject},
  plan::{ActiveSubscription, BillingInterval, Plan},
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ─────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

// ─── DateTime<Utc> / NaiveDate ───────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subjects` row.
pub struct RawSubject {
  pub subject_id:   String,
  pub created_at:   String,
  pub last_seen_at: String,
}

impl RawSubject {
  pub fn into_subject(self) -> Result<Subject> {
    Ok(Subject {
      subject_id:   Uuid::parse_str(&self.subject_id)?,
      created_at:   decode_dt(&self.created_at)?,
      last_seen_at: decode_dt(&self.last_seen_at)?,
    })
  }
}

/// Raw values read from a `plans` row.
pub struct RawPlan {
  pub plan_id:     i64,
  pub code:        String,
  pub interval:    String,
  pub price_cents: i64,
  pub currency:    String,
  pub daily_quota: Option<i64>,
  pub active:      i64,
}

impl RawPlan {
  pub fn into_plan(self) -> Result<Plan> {
    Ok(Plan {
      plan_id:     self.plan_id,
      code:        self.code,
      interval:    BillingInterval::parse(&self.interval)?,
      price_cents: self.price_cents,
      currency:    self.currency,
      daily_quota: self.daily_quota.map(|q| q as u32),
      active:      self.active != 0,
    })
  }
}

/// Raw values from a `subscriptions` row joined with its plan.
pub struct RawActiveSubscription {
  pub subscription_id:    i64,
  pub owner_kind:         String,
  pub owner_id:           String,
  pub current_period_end: Option<String>,
  pub plan:               RawPlan,
}

impl RawActiveSubscription {
  pub fn into_subscription(self) -> Result<ActiveSubscription> {
    Ok(ActiveSubscription {
      subscription_id:    self.subscription_id,
      owner:              Owner::from_parts(&self.owner_kind, &self.owner_id)?,
      plan:               self.plan.into_plan()?,
      current_period_end: self
        .current_period_end
        .as_deref()
        .map(decode_dt)
        .transpose()?,
    })
  }
}
