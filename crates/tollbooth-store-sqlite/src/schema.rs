//! SQL schema for the Tollbooth SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! the `PRAGMA user_version` number.
//!
//! The ledger tables carry the engine's invariants in their keys:
//! `daily_free_uses` and `subscription_daily_uses` are keyed per (owner, day)
//! so the guarded upserts cannot double count, `daily_network_uses` is unique
//! per (day, network) so mere existence blocks the free tier for everyone on
//! that network, and `grants` is unique per (subject, item) so a duplicate
//! grant write is a no-op.
//!
//! Ledger tables keyed by subject intentionally carry no foreign key: when
//! identity resolution degrades to an ephemeral subject the ledger writes
//! must still be accepted.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subjects (
    subject_id   TEXT PRIMARY KEY,
    created_at   TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

-- Observation log linking subjects to keyed network/device hashes.
-- Best-effort appends; read offline for abuse analysis, never joined in the
-- request path.
CREATE TABLE IF NOT EXISTS subject_fingerprints (
    subject_id   TEXT NOT NULL,
    network_hash TEXT NOT NULL,
    agent_hash   TEXT NOT NULL,
    seen_at      TEXT NOT NULL
);

-- Account rows are created by the external registration collaborator; the
-- engine only resolves email -> user_id.
CREATE TABLE IF NOT EXISTS users (
    user_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    email      TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS plans (
    plan_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    code        TEXT NOT NULL,
    interval    TEXT NOT NULL,        -- 'day' | 'week' | 'month' | 'year'
    price_cents INTEGER NOT NULL,
    currency    TEXT NOT NULL DEFAULT 'EUR',
    daily_quota INTEGER,              -- NULL = unlimited
    active      INTEGER NOT NULL DEFAULT 1,
    UNIQUE (code, interval)
);

-- Owner columns hold the normalized entitlement-owner sum type:
-- ('subject', uuid) for legacy anonymous rows, ('user', id) for account rows.
CREATE TABLE IF NOT EXISTS subscriptions (
    subscription_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_kind         TEXT NOT NULL,
    owner_id           TEXT NOT NULL,
    plan_id            INTEGER NOT NULL REFERENCES plans(plan_id),
    status             TEXT NOT NULL,
    current_period_end TEXT            -- RFC 3339 UTC or NULL
);

CREATE TABLE IF NOT EXISTS purchases (
    purchase_id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_kind  TEXT NOT NULL,
    owner_id    TEXT NOT NULL,
    item_id     INTEGER NOT NULL,
    status      TEXT NOT NULL          -- 'pending' | 'paid' | 'refunded'
);

CREATE TABLE IF NOT EXISTS daily_free_uses (
    subject_id TEXT NOT NULL,
    date_utc   TEXT NOT NULL,          -- YYYY-MM-DD
    count      INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subject_id, date_utc)
);

CREATE TABLE IF NOT EXISTS daily_network_uses (
    date_utc     TEXT NOT NULL,
    network_hash TEXT NOT NULL,
    agent_hash   TEXT NOT NULL,
    PRIMARY KEY (date_utc, network_hash)
);

CREATE TABLE IF NOT EXISTS subscription_daily_uses (
    subscription_id INTEGER NOT NULL,
    date_utc        TEXT NOT NULL,
    used            INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (subscription_id, date_utc)
);

-- Permanent, append-once grant ledger. No UPDATE or DELETE is ever issued
-- against this table.
CREATE TABLE IF NOT EXISTS grants (
    subject_id TEXT NOT NULL,
    item_id    INTEGER NOT NULL,
    granted_at TEXT NOT NULL,
    PRIMARY KEY (subject_id, item_id)
);

CREATE INDEX IF NOT EXISTS subscriptions_owner_idx
    ON subscriptions(owner_kind, owner_id);
CREATE INDEX IF NOT EXISTS purchases_owner_item_idx
    ON purchases(owner_kind, owner_id, item_id);
CREATE INDEX IF NOT EXISTS subject_fingerprints_subject_idx
    ON subject_fingerprints(subject_id);

PRAGMA user_version = 1;
";
