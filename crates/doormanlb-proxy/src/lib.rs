//! The doormanlb proxy core: upstream routing, fetching, the
//! single-flight coordination engine and the HTTP surface.
//!
//! Per-request data flow: fingerprint → cache read → on a hit serve the
//! cached response; on a miss contend for the leader lock. The leader
//! fetches once, stores the result and wakes waiting followers; the
//! followers re-read the cache. Under coordination faults the engine
//! degrades to a bounded number of duplicate fetches instead of failing
//! the request.

pub mod fetcher;
pub mod handler;
pub mod http_server;
pub mod router;
pub mod service;

pub use fetcher::{InboundRequest, ProxyClient, ResponseFetcher};
pub use http_server::HttpServer;
pub use router::{UpstreamLease, UpstreamRouter};
pub use service::CachingService;
