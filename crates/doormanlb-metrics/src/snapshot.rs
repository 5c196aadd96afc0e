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

use serde::{Deserialize, Serialize};

/// Point-in-time view of the service counters.
///
/// Serialized as the flat JSON object served by the metrics endpoint;
/// field names are the wire names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub cache_hits_total: u64,
    pub cache_misses_total: u64,
    pub leader_acquired_total: u64,
    pub follower_waits_total: u64,
    pub upstream_fetches_total: u64,
    pub cache_sets_total: u64,
    pub cache_skips_5xx_total: u64,
    pub cache_errors_total: u64,
    pub follower_timeouts_total: u64,
    pub fallback_fetches_total: u64,
}
