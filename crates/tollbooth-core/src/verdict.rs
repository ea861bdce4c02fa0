//! The outcome of an entitlement evaluation.

use serde::Serialize;

use crate::plan::Plan;

/// Which tier produced a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "access_type", rename_all = "snake_case")]
pub enum AccessTier {
  /// A grant already existed for this (subject, item) pair — the fast-path.
  Existing,
  Subscription { plan: String, unlimited: bool },
  Purchase,
  FreeTier,
}

/// Result of walking the tiers for one (identity, item) pair.
///
/// `LimitExceeded` and `PaymentRequired` are business outcomes, not errors:
/// the first means "you already used today's allowance", the second means
/// "try paying". They carry distinct payloads so callers can tell them apart.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
  Granted {
    access: AccessTier,
  },
  /// The matched subscription is out of quota for today.
  LimitExceeded {
    used:  u32,
    limit: u32,
    plan:  String,
  },
  /// No tier matched; no ledger mutation happened.
  PaymentRequired {
    free_remaining: u8,
    plans:          Vec<Plan>,
  },
}
