// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Configuration of a [crate::ClusterNode]

use std::net::SocketAddr;

use granary::concurrency::Duration;

use crate::ring::DEFAULT_VIRTUAL_NODES;

/// Default capacity of the candidate queue
pub const DEFAULT_CANDIDATE_CAPACITY: usize = 100;
/// Default timeout of a single connection attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings of a cluster node
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// The address the node listens on. Port 0 picks a free port
    pub bind: SocketAddr,
    /// The address peers should use to reach this node, if it differs from the
    /// bound address (e.g. when bound to `0.0.0.0`)
    pub advertise: Option<SocketAddr>,
    /// Peers contacted at startup
    pub seeds: Vec<SocketAddr>,
    /// Virtual points per member on the hash ring. Every node of a cluster must
    /// use the same value
    pub virtual_nodes: usize,
    /// Capacity of the candidate queue
    pub candidate_capacity: usize,
    /// Timeout of a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            advertise: None,
            seeds: Vec::new(),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            candidate_capacity: DEFAULT_CANDIDATE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ClusterConfig {
    /// Listen on `bind`
    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Advertise `address` to peers
    pub fn with_advertise(mut self, address: SocketAddr) -> Self {
        self.advertise = Some(address);
        self
    }

    /// Contact `seeds` at startup
    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.seeds.extend(seeds);
        self
    }

    /// Place each member at `virtual_nodes` ring points
    pub fn with_virtual_nodes(mut self, virtual_nodes: usize) -> Self {
        self.virtual_nodes = virtual_nodes;
        self
    }

    /// Bound the candidate queue to `capacity` addresses
    pub fn with_candidate_capacity(mut self, capacity: usize) -> Self {
        self.candidate_capacity = capacity;
        self
    }

    /// Give up on connection attempts after `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}
