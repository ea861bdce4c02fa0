//! SQLite backend for the Tollbooth entitlement store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! pool without blocking the async runtime. The conditional-upsert ledger
//! writes rely on SQLite's per-connection serialization plus unique keys, so
//! the caps hold under concurrent requests without application-level locks.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
