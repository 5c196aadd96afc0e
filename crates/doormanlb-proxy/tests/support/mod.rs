//! Shared test doubles: an in-memory coordination store, a scriptable
//! store for forcing follower paths, and a programmable fetcher.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use doormanlb_common::{
    CacheBehavior, Config, DoormanError, EndpointConfig, Result, Strategy, UpstreamResponse,
};
use doormanlb_proxy::{CachingService, InboundRequest, ResponseFetcher, UpstreamRouter};
use doormanlb_store::{LeaderLock, Store};

// ============================================================================
// In-memory coordination store
// ============================================================================

/// Process-local [`Store`] with the same observable semantics as the
/// Redis store: set-if-absent locks, fenced release, and a done channel
/// whose subscription is established before the wait begins. A done
/// state is also implied by a stored response, so a follower that
/// subscribes after the leader published still completes immediately.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    responses: HashMap<String, UpstreamResponse>,
    locks: HashMap<String, String>,
    channels: HashMap<String, broadcast::Sender<()>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn response_count(&self) -> usize {
        self.state.lock().unwrap().responses.len()
    }

    fn channel(state: &mut MemoryState, key: &str) -> broadcast::Sender<()> {
        state
            .channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<UpstreamResponse>> {
        Ok(self.state.lock().unwrap().responses.get(key).cloned())
    }

    async fn set(&self, key: &str, response: &UpstreamResponse, _ttl: Duration) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .responses
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn try_acquire_leader(&self, key: &str, _ttl: Duration) -> Result<Option<LeaderLock>> {
        let mut state = self.state.lock().unwrap();
        if state.locks.contains_key(key) {
            return Ok(None);
        }
        let token = format!("token-{}", state.locks.len());
        state.locks.insert(key.to_string(), token.clone());
        Ok(Some(LeaderLock {
            key: key.to_string(),
            token,
        }))
    }

    async fn release_leader(&self, lock: &LeaderLock) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.locks.get(&lock.key) == Some(&lock.token) {
            state.locks.remove(&lock.key);
        }
        Ok(())
    }

    async fn publish_done(&self, key: &str) -> Result<()> {
        let sender = Self::channel(&mut self.state.lock().unwrap(), key);
        let _ = sender.send(());
        Ok(())
    }

    async fn wait_for_done(&self, key: &str, timeout: Duration) -> Result<()> {
        let mut receiver = {
            let mut state = self.state.lock().unwrap();
            if state.responses.contains_key(key) {
                return Ok(());
            }
            Self::channel(&mut state, key).subscribe()
        };

        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DoormanError::Coordination("done channel closed".into())),
            Err(_) => Err(DoormanError::WaitTimeout),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Scriptable store for follower scenarios
// ============================================================================

/// Store whose answers are fixed up front: leader acquisition always
/// fails, `get` starts returning a response after a configured number
/// of calls, and `wait_for_done` either completes or times out.
pub struct ScriptedStore {
    hit_after_gets: Option<u64>,
    wait_outcome: WaitOutcome,
    cached: UpstreamResponse,
    get_calls: AtomicU64,
    wait_calls: AtomicU64,
}

#[derive(Clone, Copy)]
pub enum WaitOutcome {
    Done,
    Timeout,
}

impl ScriptedStore {
    /// `get` returns the response once it has been called `misses`
    /// times before.
    pub fn hit_after(misses: u64, cached: UpstreamResponse, wait_outcome: WaitOutcome) -> Self {
        Self {
            hit_after_gets: Some(misses),
            wait_outcome,
            cached,
            get_calls: AtomicU64::new(0),
            wait_calls: AtomicU64::new(0),
        }
    }

    /// `get` never returns a response.
    pub fn never_hit(wait_outcome: WaitOutcome) -> Self {
        Self {
            hit_after_gets: None,
            wait_outcome,
            cached: UpstreamResponse::new(200, HashMap::new(), vec![]),
            get_calls: AtomicU64::new(0),
            wait_calls: AtomicU64::new(0),
        }
    }

    pub fn wait_calls(&self) -> u64 {
        self.wait_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for ScriptedStore {
    async fn get(&self, _key: &str) -> Result<Option<UpstreamResponse>> {
        let calls = self.get_calls.fetch_add(1, Ordering::SeqCst);
        match self.hit_after_gets {
            Some(misses) if calls >= misses => Ok(Some(self.cached.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, _key: &str, _response: &UpstreamResponse, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn try_acquire_leader(&self, _key: &str, _ttl: Duration) -> Result<Option<LeaderLock>> {
        Ok(None)
    }

    async fn release_leader(&self, _lock: &LeaderLock) -> Result<()> {
        Ok(())
    }

    async fn publish_done(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn wait_for_done(&self, _key: &str, _timeout: Duration) -> Result<()> {
        self.wait_calls.fetch_add(1, Ordering::SeqCst);
        match self.wait_outcome {
            WaitOutcome::Done => Ok(()),
            WaitOutcome::Timeout => Err(DoormanError::WaitTimeout),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Programmable fetcher
// ============================================================================

enum BodyMode {
    Fixed(Vec<u8>),
    EchoQuery,
}

/// [`ResponseFetcher`] double that counts fetches and optionally delays
/// to widen concurrency windows.
pub struct MockFetcher {
    status: u16,
    body: BodyMode,
    delay: Option<Duration>,
    fetches: AtomicU64,
}

impl MockFetcher {
    pub fn fixed(status: u16, body: &str) -> Self {
        Self {
            status,
            body: BodyMode::Fixed(body.as_bytes().to_vec()),
            delay: None,
            fetches: AtomicU64::new(0),
        }
    }

    /// Responds with the request's raw query string as the body.
    pub fn echo_query(status: u16) -> Self {
        Self {
            status,
            body: BodyMode::EchoQuery,
            delay: None,
            fetches: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseFetcher for MockFetcher {
    async fn fetch(
        &self,
        _upstream_base_url: &str,
        request: &InboundRequest,
    ) -> Result<UpstreamResponse> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let body = match &self.body {
            BodyMode::Fixed(body) => body.clone(),
            BodyMode::EchoQuery => request
                .raw_query
                .clone()
                .unwrap_or_default()
                .into_bytes(),
        };

        Ok(UpstreamResponse::new(self.status, HashMap::new(), body))
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

pub fn passthrough_config() -> Config {
    config_with_default(EndpointConfig {
        cache_behavior: Some(CacheBehavior::Passthrough),
        ..Default::default()
    })
}

pub fn cache_config(expire_timeout: i64) -> Config {
    config_with_default(EndpointConfig {
        cache_behavior: Some(CacheBehavior::Cache),
        expire_timeout,
        ignore_parameters: None,
    })
}

fn config_with_default(default: EndpointConfig) -> Config {
    let mut endpoints = HashMap::new();
    endpoints.insert("DEFAULT".to_string(), default);
    let config = Config {
        services: vec!["http://upstream.test".to_string()],
        strategy: Strategy::RoundRobin,
        endpoints,
    };
    config.validate().unwrap();
    config
}

pub fn make_service(
    config: Config,
    store: Option<Arc<dyn Store>>,
    fetcher: Arc<dyn ResponseFetcher>,
) -> Arc<CachingService> {
    let router = UpstreamRouter::new(&config.services, config.strategy).unwrap();
    Arc::new(CachingService::new(config, router, store, fetcher))
}

pub fn request(path: &str, raw_query: Option<&str>) -> InboundRequest {
    InboundRequest::new(path, raw_query.map(str::to_string))
}

pub fn plain_response(status: u16, body: &str) -> UpstreamResponse {
    UpstreamResponse::new(status, HashMap::new(), body.as_bytes().to_vec())
}

/// Test-side convenience for asserting on response bodies.
pub trait UpstreamResponseExt {
    fn body_str(&self) -> &str;
}

impl UpstreamResponseExt for UpstreamResponse {
    fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("response body is not UTF-8")
    }
}
