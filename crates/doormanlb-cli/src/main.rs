//! # doormanlb entry point
//!
//! Read-through, single-flight caching reverse proxy. Starts the HTTP
//! server from a declarative JSON configuration:
//!
//! ```bash
//! # Flags beat environment variables beat defaults
//! doormanlb --port 8080 --config config.json --redis-url redis://127.0.0.1:6379
//! PORT=9000 CONFIG_PATH=/etc/doormanlb/config.json doormanlb
//! ```
//!
//! The coordination store URL is only required when some endpoint
//! resolves to CACHE; a pure passthrough configuration runs without
//! Redis.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;

use doormanlb_common::Config;
use doormanlb_proxy::{CachingService, HttpServer, ProxyClient, UpstreamRouter};
use doormanlb_store::{RedisStore, Store};

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// doormanlb - read-through single-flight caching reverse proxy
#[derive(FromArgs)]
struct Cli {
    /// port to listen on (env PORT, default 8080)
    #[argh(option, short = 'p')]
    port: Option<u16>,

    /// path to the JSON configuration file (env CONFIG_PATH, default config.json)
    #[argh(option, short = 'c')]
    config: Option<String>,

    /// coordination store URL (env REDIS_URL; defaults to
    /// redis://127.0.0.1:6379 when some endpoint caches)
    #[argh(option)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default log level INFO, RUST_LOG overrides.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let port = resolve(cli.port.map(|p| p.to_string()), "PORT", &DEFAULT_PORT.to_string())
        .parse::<u16>()
        .context("invalid listen port")?;
    let config_path = resolve(cli.config, "CONFIG_PATH", DEFAULT_CONFIG_PATH);

    let config = Config::load(&config_path)
        .with_context(|| format!("loading config from {config_path}"))?;
    tracing::info!(
        services = config.services.len(),
        endpoints = config.endpoints.len(),
        "configuration loaded"
    );

    let router = UpstreamRouter::new(&config.services, config.strategy)
        .context("creating upstream router")?;

    let redis_url = match (cli.redis_url, std::env::var("REDIS_URL").ok()) {
        (Some(url), _) => Some(url),
        (None, Some(url)) if !url.is_empty() => Some(url),
        _ if config.uses_cache() => Some(DEFAULT_REDIS_URL.to_string()),
        _ => None,
    };

    let store: Option<Arc<dyn Store>> = match redis_url {
        Some(url) => {
            let store = RedisStore::connect(&url)
                .await
                .context("initializing redis store")?;
            tracing::info!("coordination store connected");
            Some(Arc::new(store))
        }
        None => None,
    };

    let service = Arc::new(CachingService::new(
        config,
        router,
        store,
        Arc::new(ProxyClient::new()),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    HttpServer::new(service).run(addr).await?;

    Ok(())
}

/// Resolves one setting from its command-line flag, environment
/// variable and built-in default.
///
/// # Arguments
///
/// * `flag` - Value given on the command line, if any
/// * `env_key` - Environment variable consulted when the flag is absent
/// * `fallback` - Default used when neither is set
///
/// # Returns
///
/// The first value present, in flag > environment > default order.
/// Empty environment values count as unset.
fn resolve(flag: Option<String>, env_key: &str, fallback: &str) -> String {
    if let Some(value) = flag {
        return value;
    }
    match std::env::var(env_key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}
