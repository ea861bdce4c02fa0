//! Core types and trait definitions for the Tollbooth entitlement engine.
//!
//! This crate is deliberately free of HTTP and database dependencies.
//! All other crates depend on it; it depends on nothing proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod error;
pub mod evaluate;
pub mod identity;
pub mod plan;
pub mod store;
pub mod verdict;

pub use error::{Error, Result};

/// Identifier of a gated content item. Client input that does not parse as an
/// integer is rejected at the request boundary and never reaches the ledger.
pub type ItemId = i64;

/// Identifier of an authenticated account, assigned by the external
/// registration collaborator.
pub type UserId = i64;
