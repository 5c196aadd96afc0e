//! The single-flight coordination engine.
//!
//! For every CACHE-behavior request the engine runs a bounded loop:
//! read the cache, and on a miss contend for the per-fingerprint leader
//! lock. The winner fetches from upstream once, stores the response and
//! publishes a "done" notification; losers wait on that notification
//! and then re-read the cache. If the loop ends without either a hit or
//! a leadership win, the engine falls back to a direct uncached fetch
//! so the request still gets served.
//!
//! Leader cleanup (publish + fenced release) is detached from the
//! inbound request: it runs in its own short-lived task so a client
//! disconnect cannot orphan waiting followers or leave the lock to
//! expire on its own.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use doormanlb_common::{
    CacheBehavior, Config, DoormanError, EndpointPolicy, Result, UpstreamResponse,
};
use doormanlb_common::fingerprint;
use doormanlb_metrics::{MetricsSnapshot, ServiceMetrics};
use doormanlb_store::{LeaderLock, Store};

use crate::fetcher::{InboundRequest, ResponseFetcher};
use crate::router::UpstreamRouter;

const DEFAULT_LEADER_LOCK_TTL: Duration = Duration::from_secs(15);
const MAX_LEADER_LOCK_TTL: Duration = Duration::from_secs(30);
const MAX_CACHE_ATTEMPTS: usize = 3;
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(2);

/// The request-coordination engine.
///
/// Owns the endpoint policy resolver (via [`Config`]), the upstream
/// router and the fetcher; the coordination store is a shared external
/// resource and is only present when some endpoint caches.
pub struct CachingService {
    config: Config,
    router: UpstreamRouter,
    store: Option<Arc<dyn Store>>,
    fetcher: Arc<dyn ResponseFetcher>,
    metrics: ServiceMetrics,
}

impl CachingService {
    pub fn new(
        config: Config,
        router: UpstreamRouter,
        store: Option<Arc<dyn Store>>,
        fetcher: Arc<dyn ResponseFetcher>,
    ) -> Self {
        Self {
            config,
            router,
            store,
            fetcher,
            metrics: ServiceMetrics::new(),
        }
    }

    /// Handles one proxied GET and returns the buffered response to
    /// emit, cached or fresh.
    pub async fn handle(&self, request: &InboundRequest) -> Result<UpstreamResponse> {
        self.metrics.record_request();
        let endpoint = self.config.endpoint(&request.path);

        match endpoint.cache_behavior {
            CacheBehavior::Passthrough => self.fetch_from_upstream(request).await,
            CacheBehavior::Cache => self.handle_cache(request, endpoint).await,
        }
    }

    async fn handle_cache(
        &self,
        request: &InboundRequest,
        endpoint: EndpointPolicy,
    ) -> Result<UpstreamResponse> {
        let store = self.store.as_ref().ok_or_else(|| {
            DoormanError::Config("cache behavior requires a coordination store".into())
        })?;

        let cache_key = fingerprint::build(
            &request.path,
            request.raw_query.as_deref(),
            endpoint.ignore_parameters,
        );
        let ttl = endpoint.cache_ttl();
        let lock_ttl = leader_lock_ttl(ttl);

        for attempt in 0..MAX_CACHE_ATTEMPTS {
            match store.get(&cache_key).await {
                Ok(Some(cached)) => {
                    self.metrics.record_cache_hit();
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_cache_error();
                    return Err(e);
                }
            }
            self.metrics.record_cache_miss();

            match store.try_acquire_leader(&cache_key, lock_ttl).await {
                Ok(Some(lock)) => {
                    self.metrics.record_leader_acquired();
                    return self
                        .handle_as_leader(request, &cache_key, ttl, lock, store)
                        .await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.record_cache_error();
                    return Err(e);
                }
            }

            // A winner already exists. Wait for its completion, then
            // retry the cache read.
            self.metrics.record_follower_wait();
            match store.wait_for_done(&cache_key, lock_ttl).await {
                Ok(()) => {}
                Err(DoormanError::WaitTimeout) => {
                    self.metrics.record_follower_timeout();
                    sleep_backoff(attempt).await;
                }
                Err(e) => {
                    self.metrics.record_cache_error();
                    return Err(e);
                }
            }
        }

        // Lock/wait retries were inconclusive: serve directly rather
        // than fail the request.
        self.metrics.record_fallback_fetch();
        self.fetch_from_upstream(request).await
    }

    async fn handle_as_leader(
        &self,
        request: &InboundRequest,
        cache_key: &str,
        ttl: Duration,
        lock: LeaderLock,
        store: &Arc<dyn Store>,
    ) -> Result<UpstreamResponse> {
        // Wakes followers and releases the lock on every exit path,
        // including cancellation of the inbound request.
        let _cleanup = LeaderCleanup::new(Arc::clone(store), cache_key.to_string(), lock);

        let upstream_response = self.fetch_from_upstream(request).await?;

        if upstream_response.should_cache() {
            match store.set(cache_key, &upstream_response, ttl).await {
                Ok(()) => self.metrics.record_cache_set(),
                Err(e) => {
                    self.metrics.record_cache_error();
                    // Best effort: serve the response even if cache
                    // storage fails.
                    warn!(key = %cache_key, error = %e, "failed to store cached response");
                }
            }
        } else {
            self.metrics.record_cache_skip_5xx();
        }

        Ok(upstream_response)
    }

    async fn fetch_from_upstream(&self, request: &InboundRequest) -> Result<UpstreamResponse> {
        self.metrics.record_upstream_fetch();
        let lease = self.router.acquire();
        let result = self.fetcher.fetch(lease.url(), request).await;
        lease.release();
        result
    }

    /// Readiness: fails when caching is configured without a store, and
    /// otherwise defers to the store's liveness check.
    pub async fn ready(&self) -> Result<()> {
        if self.config.uses_cache() && self.store.is_none() {
            return Err(DoormanError::Config(
                "cache configured but coordination store is not initialized".into(),
            ));
        }
        if let Some(store) = &self.store {
            store.ping().await?;
        }
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Guard that publishes the "done" notification and releases the
/// leader lock when the leader path exits, however it exits. The work
/// runs in a detached task with its own timeout so a disconnecting
/// client cannot abandon the followers.
struct LeaderCleanup {
    state: Option<(Arc<dyn Store>, String, LeaderLock)>,
}

impl LeaderCleanup {
    fn new(store: Arc<dyn Store>, cache_key: String, lock: LeaderLock) -> Self {
        Self {
            state: Some((store, cache_key, lock)),
        }
    }
}

impl Drop for LeaderCleanup {
    fn drop(&mut self) {
        let Some((store, cache_key, lock)) = self.state.take() else {
            return;
        };

        tokio::spawn(async move {
            let cleanup = async {
                if let Err(e) = store.publish_done(&cache_key).await {
                    debug!(key = %cache_key, error = %e, "publish done failed");
                }
                if let Err(e) = store.release_leader(&lock).await {
                    debug!(key = %cache_key, error = %e, "leader lock release failed");
                }
            };
            if tokio::time::timeout(CLEANUP_TIMEOUT, cleanup).await.is_err() {
                debug!(key = %cache_key, "leader cleanup timed out");
            }
        });
    }
}

/// Lock TTL derived from the endpoint cache TTL, clamped to
/// [`DEFAULT_LEADER_LOCK_TTL`, `MAX_LEADER_LOCK_TTL`]. A non-positive
/// cache TTL falls back to the default.
fn leader_lock_ttl(cache_ttl: Duration) -> Duration {
    if cache_ttl.is_zero() {
        return DEFAULT_LEADER_LOCK_TTL;
    }
    cache_ttl.clamp(DEFAULT_LEADER_LOCK_TTL, MAX_LEADER_LOCK_TTL)
}

async fn sleep_backoff(attempt: usize) {
    tokio::time::sleep(Duration::from_millis(10 * (attempt as u64 + 1))).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_lock_ttl_clamps() {
        assert_eq!(
            leader_lock_ttl(Duration::ZERO),
            DEFAULT_LEADER_LOCK_TTL
        );
        assert_eq!(
            leader_lock_ttl(Duration::from_secs(1)),
            DEFAULT_LEADER_LOCK_TTL
        );
        assert_eq!(
            leader_lock_ttl(Duration::from_secs(20)),
            Duration::from_secs(20)
        );
        assert_eq!(
            leader_lock_ttl(Duration::from_secs(120)),
            MAX_LEADER_LOCK_TTL
        );
    }
}
