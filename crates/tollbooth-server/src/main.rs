//! tollbooth-server binary.
//!
//! Reads `config.toml` (or the path specified with `--config`), opens an
//! in-process SQLite store, and serves the entitlement API over HTTP.
//!
//! # Secret generation
//!
//! Fresh random secrets for `cookie_secret` / `fingerprint_secret`:
//!
//! ```
//! cargo run -p tollbooth-server -- --gen-secret
//! ```

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::Parser;
use rand_core::{OsRng, RngCore as _};
use serde::Deserialize;
use tokio::net::TcpListener;
use tollbooth_api::{AppState, CrawlerFilter, Keys, crawler};
use tollbooth_store_sqlite::SqliteStore;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Tollbooth entitlement server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print a fresh random hex secret and exit.
  #[arg(long)]
  gen_secret: bool,
}

/// Runtime server configuration, deserialised from `config.toml` plus the
/// `TOLLBOOTH_` environment prefix.
#[derive(Deserialize, Clone)]
struct ServerConfig {
  host:               String,
  port:               u16,
  store_path:         PathBuf,
  /// Signs the subject and session cookies.
  cookie_secret:      String,
  /// Keys the network/device fingerprint hashes.
  fingerprint_secret: String,
  /// `Secure` cookie flag when the request scheme is not determinable.
  #[serde(default = "default_secure_cookies")]
  secure_cookies:     bool,
  #[serde(default = "crawler::default_suffixes")]
  crawler_suffixes:   Vec<String>,
  #[serde(default = "default_dns_timeout_ms")]
  dns_timeout_ms:     u64,
}

fn default_secure_cookies() -> bool {
  true
}

fn default_dns_timeout_ms() -> u64 {
  2_000
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  // Helper mode: print a secret and exit.
  if cli.gen_secret {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    println!("{}", hex::encode(bytes));
    return Ok(());
  }

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("TOLLBOOTH"))
    .build()
    .context("failed to read config file")?;

  let server_cfg: ServerConfig = settings
    .try_deserialize()
    .context("failed to deserialise ServerConfig")?;

  // Expand `~` in store path.
  let store_path = expand_tilde(&server_cfg.store_path);

  // Open SQLite store.
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let keys = Keys::new(
    server_cfg.cookie_secret.as_bytes(),
    server_cfg.fingerprint_secret.as_bytes(),
  )
  .map_err(|e| anyhow::anyhow!("invalid secret: {e}"))?;

  let crawler = CrawlerFilter::new(
    server_cfg.crawler_suffixes.clone(),
    Duration::from_millis(server_cfg.dns_timeout_ms),
  )
  .context("failed to build DNS resolver")?;

  // Build application state.
  let state = AppState {
    store:          Arc::new(store),
    keys:           Arc::new(keys),
    crawler:        Arc::new(crawler),
    secure_cookies: server_cfg.secure_cookies,
  };

  let app = tollbooth_api::router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", server_cfg.host, server_cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(
    listener,
    app.into_make_service_with_connect_info::<SocketAddr>(),
  )
  .await
  .context("server error")?;

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
