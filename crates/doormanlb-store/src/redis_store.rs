//! Redis-backed coordination store.
//!
//! Commands run over a deadpool connection pool; `wait_for_done` opens
//! a dedicated pub/sub connection per wait, because subscriptions
//! cannot share the pooled multiplexed connections.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::debug;

use doormanlb_common::{DoormanError, Result, UpstreamResponse};

use crate::{LeaderLock, Store, DONE_PREFIX, LOCK_PREFIX, RESPONSE_PREFIX};

const CONNECT_PING_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(15);
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Compare-and-delete so only the token holder can free the lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    pool: deadpool_redis::Pool,
    client: redis::Client,
}

impl RedisStore {
    /// Connects to Redis, verifying the URL and the server with a
    /// bounded ping. Failure here is fatal at startup.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| DoormanError::Config(format!("parse redis url: {e}")))?;

        let pool = deadpool_redis::Config::from_url(redis_url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| DoormanError::Config(format!("create redis pool: {e}")))?;

        let store = Self { pool, client };

        tokio::time::timeout(CONNECT_PING_TIMEOUT, store.ping())
            .await
            .map_err(|_| DoormanError::Coordination("ping redis: timed out".into()))??;

        Ok(store)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| DoormanError::Coordination(format!("get redis connection: {e}")))
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<UpstreamResponse>> {
        let mut conn = self.connection().await?;

        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(format!("{RESPONSE_PREFIX}{key}"))
            .query_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("get cached response: {e}")))?;

        match value {
            None => Ok(None),
            Some(raw) => {
                let response = serde_json::from_slice(&raw).map_err(|e| {
                    DoormanError::Coordination(format!("decode cached response: {e}"))
                })?;
                Ok(Some(response))
            }
        }
    }

    async fn set(&self, key: &str, response: &UpstreamResponse, ttl: Duration) -> Result<()> {
        let serialized = serde_json::to_vec(response)
            .map_err(|e| DoormanError::Coordination(format!("encode cached response: {e}")))?;

        let mut conn = self.connection().await?;
        let () = redis::cmd("SET")
            .arg(format!("{RESPONSE_PREFIX}{key}"))
            .arg(serialized)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("set cached response: {e}")))?;

        Ok(())
    }

    async fn try_acquire_leader(&self, key: &str, ttl: Duration) -> Result<Option<LeaderLock>> {
        let ttl = if ttl.is_zero() { DEFAULT_LOCK_TTL } else { ttl };
        let token = random_token();

        let mut conn = self.connection().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(format!("{LOCK_PREFIX}{key}"))
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("acquire leader lock: {e}")))?;

        if acquired.is_none() {
            return Ok(None);
        }

        Ok(Some(LeaderLock {
            key: key.to_string(),
            token,
        }))
    }

    async fn release_leader(&self, lock: &LeaderLock) -> Result<()> {
        let mut conn = self.connection().await?;

        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(format!("{LOCK_PREFIX}{}", lock.key))
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("release leader lock: {e}")))?;

        if deleted == 0 {
            debug!(key = %lock.key, "leader lock already expired or reacquired");
        }

        Ok(())
    }

    async fn publish_done(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        let () = redis::cmd("PUBLISH")
            .arg(format!("{DONE_PREFIX}{key}"))
            .arg("done")
            .query_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("publish done notification: {e}")))?;

        Ok(())
    }

    async fn wait_for_done(&self, key: &str, timeout: Duration) -> Result<()> {
        let timeout = if timeout.is_zero() { DEFAULT_WAIT_TIMEOUT } else { timeout };

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| DoormanError::Coordination(format!("open pubsub connection: {e}")))?;

        // The handshake completes here, before we wait: a notification
        // published after this point is not lost.
        pubsub
            .subscribe(format!("{DONE_PREFIX}{key}"))
            .await
            .map_err(|e| DoormanError::Coordination(format!("subscribe done notification: {e}")))?;

        let mut messages = pubsub.on_message();
        match tokio::time::timeout(timeout, messages.next()).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(DoormanError::Coordination(
                "done notification channel closed".into(),
            )),
            Err(_) => Err(DoormanError::WaitTimeout),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| DoormanError::Coordination(format!("ping redis: {e}")))?;
        Ok(())
    }
}

fn random_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}
