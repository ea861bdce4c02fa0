//! Identity types — the anonymous subject, the entitlement owner, and the
//! keyed network/device fingerprint.
//!
//! One real visitor is represented by two independent keys: an anonymous
//! [`Subject`] established via a signed cookie, and (when logged in) a user id
//! issued by the external registration collaborator. The two are reconciled
//! per request; ledger writes always key to the subject so a repeat visit
//! fast-paths even after logout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, Result, UserId};

/// Anonymous per-browser identity. Created on the first request without a
/// valid identity cookie; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
  pub subject_id:   Uuid,
  pub created_at:   DateTime<Utc>,
  pub last_seen_at: DateTime<Utc>,
}

/// Keyed one-way hashes over the client network address and user-agent.
///
/// Only ever compared for equality within a single UTC day; never reversible.
/// Same-day free-tier blocking keys on `network_hash` alone, so switching
/// devices on the same network does not reset the allowance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
  pub network_hash: String,
  pub agent_hash:   String,
}

/// The owner of a subscription or one-off purchase.
///
/// Subscriptions and purchases historically existed in two shapes: user-scoped
/// rows created after the account system landed, and subject-scoped rows from
/// before it. One sum type covers both; lookup branches once on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
  Subject(Uuid),
  User(UserId),
}

impl Owner {
  /// Storage discriminant, paired with [`Owner::id_string`].
  pub fn kind(&self) -> &'static str {
    match self {
      Owner::Subject(_) => "subject",
      Owner::User(_) => "user",
    }
  }

  pub fn id_string(&self) -> String {
    match self {
      Owner::Subject(id) => id.hyphenated().to_string(),
      Owner::User(id) => id.to_string(),
    }
  }

  pub fn from_parts(kind: &str, id: &str) -> Result<Self> {
    match kind {
      "subject" => Ok(Owner::Subject(
        Uuid::parse_str(id)
          .map_err(|_| Error::UnknownOwnerKind(format!("subject:{id}")))?,
      )),
      "user" => Ok(Owner::User(
        id.parse()
          .map_err(|_| Error::UnknownOwnerKind(format!("user:{id}")))?,
      )),
      other => Err(Error::UnknownOwnerKind(other.to_owned())),
    }
  }
}
