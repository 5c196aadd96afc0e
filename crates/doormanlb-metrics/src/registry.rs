// Copyright 2026 doormanlb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::snapshot::MetricsSnapshot;

/// Thread-safe counter registry shared by all request handlers.
///
/// Increments use relaxed ordering; the counters are independent and
/// only ever read as a point-in-time snapshot.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    requests_total: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    leader_acquired: AtomicU64,
    follower_waits: AtomicU64,
    upstream_fetches: AtomicU64,
    cache_sets: AtomicU64,
    cache_skips_5xx: AtomicU64,
    cache_errors: AtomicU64,
    follower_timeouts: AtomicU64,
    fallback_fetches: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_leader_acquired(&self) {
        self.leader_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_follower_wait(&self) {
        self.follower_waits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upstream_fetch(&self) {
        self.upstream_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_set(&self) {
        self.cache_sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_skip_5xx(&self) {
        self.cache_skips_5xx.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_follower_timeout(&self) {
        self.follower_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback_fetch(&self) {
        self.fallback_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            cache_hits_total: self.cache_hits.load(Ordering::Relaxed),
            cache_misses_total: self.cache_misses.load(Ordering::Relaxed),
            leader_acquired_total: self.leader_acquired.load(Ordering::Relaxed),
            follower_waits_total: self.follower_waits.load(Ordering::Relaxed),
            upstream_fetches_total: self.upstream_fetches.load(Ordering::Relaxed),
            cache_sets_total: self.cache_sets.load(Ordering::Relaxed),
            cache_skips_5xx_total: self.cache_skips_5xx.load(Ordering::Relaxed),
            cache_errors_total: self.cache_errors.load(Ordering::Relaxed),
            follower_timeouts_total: self.follower_timeouts.load(Ordering::Relaxed),
            fallback_fetches_total: self.fallback_fetches.load(Ordering::Relaxed),
        }
    }
}
