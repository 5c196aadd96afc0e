//! Lock-free service counters for doormanlb.
//!
//! The proxy records every significant event of the single-flight
//! protocol as a monotonic counter. Counters are plain atomics so the
//! hot path never takes a lock; [`MetricsSnapshot`] is the serializable
//! view served by the `/__doormanlb/metrics` endpoint.

mod registry;
mod snapshot;

pub use registry::ServiceMetrics;
pub use snapshot::MetricsSnapshot;
