//! Coordination store contract and Redis implementation.
//!
//! The store is the shared fabric of the single-flight protocol: it
//! holds cached responses with a TTL, the per-fingerprint leader lock,
//! and the pub/sub channel on which a leader announces completion.
//! Implementations need atomic conditional writes, expiring keys and a
//! pub/sub notification channel; [`redis_store::RedisStore`] is the
//! production implementation.
//!
//! Keyspace conventions keep the three concerns apart in a shared
//! store: responses live under `resp:`, locks under `lock:` and
//! notification channels under `done:`, each followed by the
//! fingerprint unchanged.

pub mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use doormanlb_common::{Result, UpstreamResponse};

pub use redis_store::RedisStore;

pub const RESPONSE_PREFIX: &str = "resp:";
pub const LOCK_PREFIX: &str = "lock:";
pub const DONE_PREFIX: &str = "done:";

/// A held leader lock. The token fences the release: only the holder
/// that wrote the token may delete the lock key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLock {
    pub key: String,
    pub token: String,
}

/// Contract between the coordination engine and the shared store.
///
/// All operations are cancel-safe in the usual future sense; dropping
/// the returned future abandons the call. `wait_for_done` must complete
/// its subscription handshake before awaiting the notification so that
/// a `publish_done` racing with the subscribe is not lost.
#[async_trait]
pub trait Store: Send + Sync {
    /// Returns the cached response for a fingerprint, or `None` when
    /// absent or expired.
    async fn get(&self, key: &str) -> Result<Option<UpstreamResponse>>;

    /// Stores a response under the fingerprint with the given TTL,
    /// overwriting any prior value.
    async fn set(&self, key: &str, response: &UpstreamResponse, ttl: Duration) -> Result<()>;

    /// Atomic set-if-absent on the lock key. Returns a lock carrying a
    /// freshly generated opaque token on success, `None` when another
    /// holder already owns the key.
    async fn try_acquire_leader(&self, key: &str, ttl: Duration) -> Result<Option<LeaderLock>>;

    /// Deletes the lock key iff its current value still equals the
    /// token, so an expired-and-reacquired lock is never released by a
    /// stale holder.
    async fn release_leader(&self, lock: &LeaderLock) -> Result<()>;

    /// Broadcasts a completion notification for the fingerprint.
    async fn publish_done(&self, key: &str) -> Result<()>;

    /// Blocks until a completion notification arrives or the timeout
    /// elapses; the latter surfaces as [`DoormanError::WaitTimeout`].
    ///
    /// [`DoormanError::WaitTimeout`]: doormanlb_common::DoormanError::WaitTimeout
    async fn wait_for_done(&self, key: &str, timeout: Duration) -> Result<()>;

    /// Liveness check used by the readiness endpoint.
    async fn ping(&self) -> Result<()>;
}
