//! Error types for `tollbooth-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown entitlement owner kind: {0:?}")]
  UnknownOwnerKind(String),

  #[error("unknown billing interval: {0:?}")]
  UnknownInterval(String),

  #[error("unknown subscription status: {0:?}")]
  UnknownSubscriptionStatus(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
