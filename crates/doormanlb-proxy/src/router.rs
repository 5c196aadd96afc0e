//! Upstream router: picks one node among equivalent upstreams and
//! tracks per-node in-flight counts.
//!
//! All state is atomic; no lock is taken on the request path. A lease
//! decrements its node's in-flight count exactly once, either through
//! an explicit [`UpstreamLease::release`] or on drop.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use doormanlb_common::{DoormanError, Result, Strategy};

#[derive(Debug)]
struct UpstreamNode {
    url: String,
    inflight: AtomicI64,
}

#[derive(Debug)]
pub struct UpstreamRouter {
    strategy: Strategy,
    nodes: Vec<Arc<UpstreamNode>>,
    next: AtomicU64,
}

impl UpstreamRouter {
    /// Builds a router over the configured service URLs. At least one
    /// service is required.
    pub fn new(services: &[String], strategy: Strategy) -> Result<Self> {
        if services.is_empty() {
            return Err(DoormanError::Config(
                "at least one service is required".into(),
            ));
        }

        let nodes = services
            .iter()
            .map(|url| {
                Arc::new(UpstreamNode {
                    url: url.clone(),
                    inflight: AtomicI64::new(0),
                })
            })
            .collect();

        Ok(Self {
            strategy,
            nodes,
            next: AtomicU64::new(0),
        })
    }

    /// Selects a node according to the strategy and increments its
    /// in-flight count.
    pub fn acquire(&self) -> UpstreamLease {
        let node = Arc::clone(self.select_node());
        node.inflight.fetch_add(1, Ordering::Relaxed);
        UpstreamLease {
            node,
            released: AtomicBool::new(false),
        }
    }

    fn select_node(&self) -> &Arc<UpstreamNode> {
        match self.strategy {
            Strategy::RoundRobin => {
                let index = self.next.fetch_add(1, Ordering::Relaxed);
                &self.nodes[(index % self.nodes.len() as u64) as usize]
            }
            Strategy::LeastConnections => {
                let mut selected = &self.nodes[0];
                let mut selected_load = selected.inflight.load(Ordering::Relaxed);
                for node in &self.nodes[1..] {
                    let load = node.inflight.load(Ordering::Relaxed);
                    if load < selected_load {
                        selected = node;
                        selected_load = load;
                    }
                }
                selected
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// A hold on one upstream node for the duration of a fetch.
#[derive(Debug)]
pub struct UpstreamLease {
    node: Arc<UpstreamNode>,
    released: AtomicBool,
}

impl UpstreamLease {
    pub fn url(&self) -> &str {
        &self.node.url
    }

    /// Decrements the node's in-flight count. Idempotent; dropping an
    /// unreleased lease releases it too.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.node.inflight.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

impl Drop for UpstreamLease {
    fn drop(&mut self) {
        self.release();
    }
}
