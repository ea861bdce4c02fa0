//! Identity resolution: the signed subject cookie, the session cookie, and
//! the keyed network/device fingerprint.
//!
//! Every inbound request resolves to a stable anonymous subject id via a
//! tamper-evident cookie (`value.signature`, HMAC-SHA256 over the value) and,
//! when a valid session cookie is present, additionally to a user id. A
//! storage failure here degrades to an ephemeral subject for the single
//! request — identity resolution never fails a request.

use std::net::IpAddr;

use axum::http::{HeaderMap, header};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use tollbooth_core::{
  UserId,
  identity::Fingerprint,
  store::EntitlementStore,
};

type HmacSha256 = Hmac<Sha256>;

/// Name of the anonymous-subject identity cookie.
pub const SUBJECT_COOKIE: &str = "aid";
/// Name of the session cookie set by the external auth collaborator; its
/// value is the verified account email, signed with the shared cookie key.
pub const SESSION_COOKIE: &str = "sid";

/// One year, the subject cookie lifetime.
const COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

// ─── Keys ────────────────────────────────────────────────────────────────────

/// The two keyed-hash secrets: one signs identity cookies, one derives
/// network/device fingerprints. Kept separate so rotating one does not
/// invalidate the other's ledger rows.
#[derive(Clone)]
pub struct Keys {
  cookie:      HmacSha256,
  fingerprint: HmacSha256,
}

impl Keys {
  pub fn new(
    cookie_secret: &[u8],
    fingerprint_secret: &[u8],
  ) -> Result<Self, hmac::digest::InvalidLength> {
    Ok(Self {
      cookie:      HmacSha256::new_from_slice(cookie_secret)?,
      fingerprint: HmacSha256::new_from_slice(fingerprint_secret)?,
    })
  }

  fn tag(mac: &HmacSha256, value: &str) -> String {
    let mut mac = mac.clone();
    mac.update(value.as_bytes());
    hex::encode(mac.finalize().into_bytes())
  }

  /// Produce the on-the-wire cookie form `value.signature`.
  pub fn sign(&self, value: &str) -> String {
    format!("{value}.{}", Self::tag(&self.cookie, value))
  }

  /// Verify a signed cookie and return the embedded value. The signature is
  /// everything after the last dot, so values containing dots (emails) are
  /// fine. Comparison is constant-time via `Mac::verify_slice`.
  pub fn verify<'a>(&self, signed: &'a str) -> Option<&'a str> {
    let (value, sig_hex) = signed.rsplit_once('.')?;
    if value.is_empty() {
      return None;
    }
    let sig = hex::decode(sig_hex).ok()?;
    let mut mac = self.cookie.clone();
    mac.update(value.as_bytes());
    mac.verify_slice(&sig).ok().map(|_| value)
  }

  /// Derive the one-way fingerprint for (network address, user-agent).
  pub fn fingerprint(&self, network: &str, agent: &str) -> Fingerprint {
    Fingerprint {
      network_hash: Self::tag(&self.fingerprint, network),
      agent_hash:   Self::tag(&self.fingerprint, agent),
    }
  }
}

// ─── Request helpers ─────────────────────────────────────────────────────────

/// Extract a named cookie from the `Cookie` header(s).
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
  for header_val in headers.get_all(header::COOKIE) {
    let Ok(raw) = header_val.to_str() else {
      continue;
    };
    for pair in raw.split(';') {
      if let Some((k, v)) = pair.trim().split_once('=')
        && k == name
      {
        return Some(v.to_owned());
      }
    }
  }
  None
}

/// Client network address: first hop of `X-Forwarded-For` when present and
/// parseable, otherwise the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> IpAddr {
  headers
    .get("x-forwarded-for")
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.split(',').next())
    .and_then(|first| first.trim().parse().ok())
    .unwrap_or(peer)
}

pub fn user_agent(headers: &HeaderMap) -> &str {
  headers
    .get(header::USER_AGENT)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("")
}

/// Whether the request arrived over HTTPS, judged by `X-Forwarded-Proto`;
/// falls back to the configured default when the scheme is not determinable.
pub fn request_is_secure(headers: &HeaderMap, default: bool) -> bool {
  match headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()) {
    Some(proto) => proto.eq_ignore_ascii_case("https"),
    None => default,
  }
}

/// Build the `Set-Cookie` value for a freshly minted subject.
fn build_set_cookie(signed: &str, secure: bool) -> String {
  let mut cookie = format!(
    "{SUBJECT_COOKIE}={signed}; Max-Age={COOKIE_MAX_AGE_SECS}; Path=/; HttpOnly; SameSite=Lax"
  );
  if secure {
    cookie.push_str("; Secure");
  }
  cookie
}

// ─── Resolution ──────────────────────────────────────────────────────────────

/// The identity a single request resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
  pub subject_id:  Uuid,
  pub user_id:     Option<UserId>,
  pub fingerprint: Fingerprint,
  /// Present when a new subject cookie needs to reach the client.
  pub set_cookie:  Option<String>,
}

/// Resolve the request to (subject, user?, fingerprint).
///
/// Infallible by design: storage errors degrade to an ephemeral subject id
/// and are logged, and the session lookup degrades to anonymous.
pub async fn resolve_identity<S>(
  store: &S,
  keys: &Keys,
  headers: &HeaderMap,
  peer: IpAddr,
  secure_default: bool,
) -> ResolvedIdentity
where
  S: EntitlementStore,
{
  let cookie = cookie_value(headers, SUBJECT_COOKIE);
  let known_id = cookie
    .as_deref()
    .and_then(|signed| keys.verify(signed))
    .and_then(|value| Uuid::parse_str(value).ok());

  let (subject_id, minted) = match known_id {
    Some(id) => (id, false),
    None => (Uuid::new_v4(), true),
  };

  if let Err(e) = store.ensure_subject(subject_id).await {
    // Ephemeral fallback: the request proceeds under the minted id; a later
    // visit with the same cookie re-creates the row.
    tracing::warn!(error = %e, subject = %subject_id, "subject persistence failed, using ephemeral identity");
  }

  let set_cookie = minted.then(|| {
    let signed = keys.sign(&subject_id.hyphenated().to_string());
    build_set_cookie(&signed, request_is_secure(headers, secure_default))
  });

  let ip = client_ip(headers, peer);
  let fingerprint = keys.fingerprint(&ip.to_string(), user_agent(headers));

  if let Err(e) = store.record_fingerprint(subject_id, &fingerprint).await {
    tracing::warn!(error = %e, subject = %subject_id, "fingerprint observation failed");
  }

  let user_id = match cookie_value(headers, SESSION_COOKIE)
    .as_deref()
    .and_then(|signed| keys.verify(signed))
  {
    Some(email) => match store.find_user_by_email(email).await {
      Ok(found) => found,
      Err(e) => {
        tracing::warn!(error = %e, "user lookup failed, treating request as anonymous");
        None
      }
    },
    None => None,
  };

  ResolvedIdentity { subject_id, user_id, fingerprint, set_cookie }
}
