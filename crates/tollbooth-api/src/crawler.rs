//! Verified-crawler bypass filter.
//!
//! Search-engine crawlers are exempted from the paying gate so gated pages
//! stay indexable. A spoofed user-agent is not enough: verification is the
//! double-reverse-DNS dance — reverse-resolve the client address, require the
//! PTR hostname to sit under a known crawler domain, then forward-resolve
//! that hostname and require the original address back. Any DNS failure,
//! timeout or mismatch answers "not a crawler"; the filter never grants
//! bypass speculatively.

use std::{net::IpAddr, time::Duration};

use hickory_resolver::TokioAsyncResolver;

/// DNS seam so the verification logic is testable without the network.
pub trait Dns: Send + Sync {
  /// PTR hostnames for an address, `None` on any failure.
  async fn reverse(&self, addr: IpAddr) -> Option<Vec<String>>;
  /// Forward A/AAAA addresses for a hostname, `None` on any failure.
  async fn forward(&self, hostname: &str) -> Option<Vec<IpAddr>>;
}

struct SystemDns<'a> {
  resolver: &'a TokioAsyncResolver,
}

impl Dns for SystemDns<'_> {
  async fn reverse(&self, addr: IpAddr) -> Option<Vec<String>> {
    let lookup = self.resolver.reverse_lookup(addr).await.ok()?;
    Some(lookup.iter().map(|name| name.to_utf8()).collect())
  }

  async fn forward(&self, hostname: &str) -> Option<Vec<IpAddr>> {
    let lookup = self.resolver.lookup_ip(hostname).await.ok()?;
    Some(lookup.iter().collect())
  }
}

/// The production filter: system-configured resolver, configured crawler
/// domain suffixes, bounded lookup time.
pub struct CrawlerFilter {
  resolver: TokioAsyncResolver,
  suffixes: Vec<String>,
  timeout:  Duration,
}

impl CrawlerFilter {
  pub fn new(
    suffixes: Vec<String>,
    timeout: Duration,
  ) -> Result<Self, hickory_resolver::error::ResolveError> {
    Ok(Self {
      resolver: TokioAsyncResolver::tokio_from_system_conf()?,
      suffixes,
      timeout,
    })
  }

  /// Is `addr` a verified crawler? Fails closed on timeout.
  pub async fn is_verified_crawler(&self, addr: IpAddr) -> bool {
    let dns = SystemDns { resolver: &self.resolver };
    match tokio::time::timeout(
      self.timeout,
      verify_crawler(&dns, &self.suffixes, addr),
    )
    .await
    {
      Ok(verified) => verified,
      Err(_) => {
        tracing::debug!(%addr, "crawler DNS verification timed out");
        false
      }
    }
  }
}

/// The double verification itself, generic over the DNS seam.
async fn verify_crawler<D: Dns>(
  dns: &D,
  suffixes: &[String],
  addr: IpAddr,
) -> bool {
  let Some(hostnames) = dns.reverse(addr).await else {
    return false;
  };
  // Only the first PTR hostname is considered.
  let Some(first) = hostnames.first() else {
    return false;
  };
  let hostname = first.trim_end_matches('.');

  if !suffixes.iter().any(|s| hostname.ends_with(s.as_str())) {
    return false;
  }

  match dns.forward(hostname).await {
    Some(addrs) => addrs.contains(&addr),
    None => false,
  }
}

/// Default crawler domain suffixes (Googlebot).
pub fn default_suffixes() -> Vec<String> {
  vec![".googlebot.com".to_owned(), ".google.com".to_owned()]
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  #[derive(Default)]
  struct FakeDns {
    ptr:      HashMap<IpAddr, Vec<String>>,
    forward:  HashMap<String, Vec<IpAddr>>,
  }

  impl Dns for FakeDns {
    async fn reverse(&self, addr: IpAddr) -> Option<Vec<String>> {
      self.ptr.get(&addr).cloned()
    }

    async fn forward(&self, hostname: &str) -> Option<Vec<IpAddr>> {
      self.forward.get(hostname).cloned()
    }
  }

  fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
  }

  fn googlebot_dns() -> FakeDns {
    let mut dns = FakeDns::default();
    dns.ptr.insert(
      ip("66.249.66.1"),
      vec!["crawl-66-249-66-1.googlebot.com.".to_owned()],
    );
    dns.forward.insert(
      "crawl-66-249-66-1.googlebot.com".to_owned(),
      vec![ip("66.249.66.1")],
    );
    dns
  }

  #[tokio::test]
  async fn verified_crawler_passes() {
    let dns = googlebot_dns();
    assert!(verify_crawler(&dns, &default_suffixes(), ip("66.249.66.1")).await);
  }

  #[tokio::test]
  async fn spoofed_hostname_fails_suffix_check() {
    let mut dns = FakeDns::default();
    dns.ptr.insert(
      ip("203.0.113.9"),
      vec!["googlebot.com.evil.example.".to_owned()],
    );
    assert!(!verify_crawler(&dns, &default_suffixes(), ip("203.0.113.9")).await);
  }

  #[tokio::test]
  async fn forward_mismatch_fails() {
    // PTR pretends to be googlebot but the forward record points elsewhere.
    let mut dns = FakeDns::default();
    dns.ptr.insert(
      ip("203.0.113.9"),
      vec!["crawl-66-249-66-1.googlebot.com.".to_owned()],
    );
    dns.forward.insert(
      "crawl-66-249-66-1.googlebot.com".to_owned(),
      vec![ip("66.249.66.1")],
    );
    assert!(!verify_crawler(&dns, &default_suffixes(), ip("203.0.113.9")).await);
  }

  #[tokio::test]
  async fn dns_failure_fails_closed() {
    let dns = FakeDns::default();
    assert!(!verify_crawler(&dns, &default_suffixes(), ip("66.249.66.1")).await);

    // Reverse works but forward lookup fails.
    let mut dns = googlebot_dns();
    dns.forward.clear();
    assert!(!verify_crawler(&dns, &default_suffixes(), ip("66.249.66.1")).await);
  }

  #[tokio::test]
  async fn empty_ptr_set_fails() {
    let mut dns = FakeDns::default();
    dns.ptr.insert(ip("66.249.66.1"), vec![]);
    assert!(!verify_crawler(&dns, &default_suffixes(), ip("66.249.66.1")).await);
  }
}
