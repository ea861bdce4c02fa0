//! [`SqliteStore`] — the SQLite implementation of [`EntitlementStore`].

use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tollbooth_core::{
  ItemId, UserId,
  identity::{Fingerprint, Owner, Subject},
  plan::{ActiveSubscription, NewPlan, NewPurchase, NewSubscription, Plan},
  store::EntitlementStore,
};

use crate::{
  Error, Result,
  encode::{
    RawActiveSubscription, RawPlan, RawSubject, encode_date, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tollbooth entitlement store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── EntitlementStore impl ───────────────────────────────────────────────────

impl EntitlementStore for SqliteStore {
  type Error = Error;

  // ── Identity ──────────────────────────────────────────────────────────────

  async fn ensure_subject(&self, subject_id: Uuid) -> Result<Subject> {
    let id_str = encode_uuid(subject_id);
    let now_str = encode_dt(Utc::now());

    let raw: RawSubject = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subjects (subject_id, created_at, last_seen_at)
           VALUES (?1, ?2, ?2)
           ON CONFLICT(subject_id)
           DO UPDATE SET last_seen_at = excluded.last_seen_at",
          rusqlite::params![id_str, now_str],
        )?;

        let raw = conn.query_row(
          "SELECT subject_id, created_at, last_seen_at
           FROM subjects WHERE subject_id = ?1",
          rusqlite::params![id_str],
          |row| {
            Ok(RawSubject {
              subject_id:   row.get(0)?,
              created_at:   row.get(1)?,
              last_seen_at: row.get(2)?,
            })
          },
        )?;
        Ok(raw)
      })
      .await?;

    raw.into_subject()
  }

  async fn record_fingerprint(
    &self,
    subject_id: Uuid,
    fingerprint: &Fingerprint,
  ) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    let network = fingerprint.network_hash.clone();
    let agent = fingerprint.agent_hash.clone();
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subject_fingerprints
             (subject_id, network_hash, agent_hash, seen_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, network, agent, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn find_user_by_email(&self, email: &str) -> Result<Option<UserId>> {
    let email = email.to_owned();
    let id: Option<i64> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT user_id FROM users WHERE email = ?1",
              rusqlite::params![email],
              |row| row.get(0),
            )
            .optional()?,
        )
      })
      .await?;
    Ok(id)
  }

  // ── Grant ledger ──────────────────────────────────────────────────────────

  async fn has_grant(&self, subject_id: Uuid, item_id: ItemId) -> Result<bool> {
    let id_str = encode_uuid(subject_id);
    let found: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM grants WHERE subject_id = ?1 AND item_id = ?2",
              rusqlite::params![id_str, item_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(found)
  }

  async fn record_grant(&self, subject_id: Uuid, item_id: ItemId) -> Result<()> {
    let id_str = encode_uuid(subject_id);
    let at_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        // OR IGNORE: a duplicate grant is a no-op, never an error and never
        // a second row.
        conn.execute(
          "INSERT OR IGNORE INTO grants (subject_id, item_id, granted_at)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, item_id, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Plans, subscriptions, purchases ───────────────────────────────────────

  async fn find_active_subscription(
    &self,
    owner: Owner,
  ) -> Result<Option<ActiveSubscription>> {
    let kind = owner.kind().to_owned();
    let id = owner.id_string();
    let now_str = encode_dt(Utc::now());

    let raw: Option<RawActiveSubscription> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT s.subscription_id, s.owner_kind, s.owner_id,
                      s.current_period_end,
                      p.plan_id, p.code, p.interval, p.price_cents,
                      p.currency, p.daily_quota, p.active
               FROM subscriptions s
               JOIN plans p ON p.plan_id = s.plan_id
               WHERE s.owner_kind = ?1 AND s.owner_id = ?2
                 AND s.status = 'active'
                 AND (s.current_period_end IS NULL
                      OR s.current_period_end > ?3)
               ORDER BY s.current_period_end DESC
               LIMIT 1",
              rusqlite::params![kind, id, now_str],
              |row| {
                Ok(RawActiveSubscription {
                  subscription_id:    row.get(0)?,
                  owner_kind:         row.get(1)?,
                  owner_id:           row.get(2)?,
                  current_period_end: row.get(3)?,
                  plan:               RawPlan {
                    plan_id:     row.get(4)?,
                    code:        row.get(5)?,
                    interval:    row.get(6)?,
                    price_cents: row.get(7)?,
                    currency:    row.get(8)?,
                    daily_quota: row.get(9)?,
                    active:      row.get(10)?,
                  },
                })
              },
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawActiveSubscription::into_subscription).transpose()
  }

  async fn has_paid_purchase(&self, owner: Owner, item_id: ItemId) -> Result<bool> {
    let kind = owner.kind().to_owned();
    let id = owner.id_string();

    let found: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM purchases
               WHERE owner_kind = ?1 AND owner_id = ?2 AND item_id = ?3
                 AND status = 'paid'
               LIMIT 1",
              rusqlite::params![kind, id, item_id],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(found)
  }

  async fn list_active_plans(&self) -> Result<Vec<Plan>> {
    let raws: Vec<RawPlan> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT plan_id, code, interval, price_cents, currency,
                  daily_quota, active
           FROM plans
           WHERE active = 1
           ORDER BY code, interval",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok(RawPlan {
              plan_id:     row.get(0)?,
              code:        row.get(1)?,
              interval:    row.get(2)?,
              price_cents: row.get(3)?,
              currency:    row.get(4)?,
              daily_quota: row.get(5)?,
              active:      row.get(6)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPlan::into_plan).collect()
  }

  async fn add_plan(&self, plan: NewPlan) -> Result<Plan> {
    let code = plan.code.clone();
    let interval = plan.interval.as_str().to_owned();
    let price_cents = plan.price_cents;
    let currency = plan.currency.clone();
    let daily_quota = plan.daily_quota.map(i64::from);
    let active = plan.active as i64;

    let plan_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO plans
             (code, interval, price_cents, currency, daily_quota, active)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![
            code,
            interval,
            price_cents,
            currency,
            daily_quota,
            active
          ],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;

    Ok(Plan {
      plan_id,
      code: plan.code,
      interval: plan.interval,
      price_cents: plan.price_cents,
      currency: plan.currency,
      daily_quota: plan.daily_quota,
      active: plan.active,
    })
  }

  async fn add_subscription(&self, subscription: NewSubscription) -> Result<i64> {
    let kind = subscription.owner.kind().to_owned();
    let id = subscription.owner.id_string();
    let plan_id = subscription.plan_id;
    let status = subscription.status.as_str().to_owned();
    let period_end = subscription.current_period_end.map(encode_dt);

    let subscription_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subscriptions
             (owner_kind, owner_id, plan_id, status, current_period_end)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![kind, id, plan_id, status, period_end],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(subscription_id)
  }

  async fn add_purchase(&self, purchase: NewPurchase) -> Result<()> {
    let kind = purchase.owner.kind().to_owned();
    let id = purchase.owner.id_string();
    let item_id = purchase.item_id;
    let status = purchase.status.as_str().to_owned();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO purchases (owner_kind, owner_id, item_id, status)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![kind, id, item_id, status],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn add_user(&self, email: &str) -> Result<UserId> {
    let email = email.to_owned();
    let at_str = encode_dt(Utc::now());

    let user_id: i64 = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO users (email, created_at) VALUES (?1, ?2)",
          rusqlite::params![email, at_str],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(user_id)
  }

  // ── Usage ledger ──────────────────────────────────────────────────────────

  async fn subscription_uses(
    &self,
    subscription_id: i64,
    date: NaiveDate,
  ) -> Result<u32> {
    let date_str = encode_date(date);
    let used: i64 = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT used FROM subscription_daily_uses
               WHERE subscription_id = ?1 AND date_utc = ?2",
              rusqlite::params![subscription_id, date_str],
              |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0),
        )
      })
      .await?;
    Ok(used as u32)
  }

  async fn try_consume_subscription_use(
    &self,
    subscription_id: i64,
    date: NaiveDate,
    quota: u32,
  ) -> Result<bool> {
    if quota == 0 {
      return Ok(false);
    }

    let date_str = encode_date(date);
    let quota = i64::from(quota);

    // One conditional upsert: the guarded DO UPDATE re-validates the cap, so
    // at most `quota` rows-changed ever succeed per (subscription, day) no
    // matter how many requests race.
    let consumed: bool = self
      .conn
      .call(move |conn| {
        let changed = conn.execute(
          "INSERT INTO subscription_daily_uses (subscription_id, date_utc, used)
           VALUES (?1, ?2, 1)
           ON CONFLICT(subscription_id, date_utc)
           DO UPDATE SET used = used + 1 WHERE used < ?3",
          rusqlite::params![subscription_id, date_str, quota],
        )?;
        Ok(changed > 0)
      })
      .await?;
    Ok(consumed)
  }

  async fn has_free_use(&self, subject_id: Uuid, date: NaiveDate) -> Result<bool> {
    let id_str = encode_uuid(subject_id);
    let date_str = encode_date(date);

    let used: bool = self
      .conn
      .call(move |conn| {
        let count: Option<i64> = conn
          .query_row(
            "SELECT count FROM daily_free_uses
             WHERE subject_id = ?1 AND date_utc = ?2",
            rusqlite::params![id_str, date_str],
            |row| row.get(0),
          )
          .optional()?;
        Ok(count.unwrap_or(0) >= 1)
      })
      .await?;
    Ok(used)
  }

  async fn network_used(&self, date: NaiveDate, network_hash: &str) -> Result<bool> {
    let date_str = encode_date(date);
    let network = network_hash.to_owned();

    let used: bool = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM daily_network_uses
               WHERE date_utc = ?1 AND network_hash = ?2",
              rusqlite::params![date_str, network],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    Ok(used)
  }

  async fn try_consume_free_use(
    &self,
    subject_id: Uuid,
    date: NaiveDate,
    fingerprint: &Fingerprint,
  ) -> Result<bool> {
    let id_str = encode_uuid(subject_id);
    let date_str = encode_date(date);
    let network = fingerprint.network_hash.clone();
    let agent = fingerprint.agent_hash.clone();

    // Both guards run in one transaction on the store's single connection:
    // the network marker insert fails on the unique (date, network) key when
    // anyone on this network already consumed today, and the per-subject
    // upsert is capped at count < 1. Either miss rolls the whole thing back.
    let consumed: bool = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        let marked = tx.execute(
          "INSERT OR IGNORE INTO daily_network_uses
             (date_utc, network_hash, agent_hash)
           VALUES (?1, ?2, ?3)",
          rusqlite::params![date_str, network, agent],
        )?;
        if marked == 0 {
          return Ok(false); // tx drops, rolls back
        }

        let counted = tx.execute(
          "INSERT INTO daily_free_uses (subject_id, date_utc, count)
           VALUES (?1, ?2, 1)
           ON CONFLICT(subject_id, date_utc)
           DO UPDATE SET count = count + 1 WHERE count < 1",
          rusqlite::params![id_str, date_str],
        )?;
        if counted == 0 {
          return Ok(false);
        }

        tx.commit()?;
        Ok(true)
      })
      .await?;
    Ok(consumed)
  }

  // ── Health ────────────────────────────────────────────────────────────────

  async fn ping(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
