// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Key-to-node routing over the cluster topology.
//!
//! The [Topology] holds the node table together with the hash ring, so the two
//! are always mutated as one. The membership manager is the only writer and
//! publishes a fresh snapshot after every change; the [ClusterRouter] reads
//! whichever snapshot is current.

use std::collections::HashMap;
use std::sync::Arc;

use granary::concurrency::WatchReceiver;
use granary::hash::KeyDigest;
use granary::remote::{RemoteNode, Remoting};

use crate::ring::HashRing;
use crate::{Node, NodeIdentity};

/// The joined peers and the ring placing keys over them and the local node
#[derive(Debug, Clone)]
pub struct Topology {
    local: NodeIdentity,
    ring: HashRing,
    nodes: HashMap<NodeIdentity, Node>,
}

impl Topology {
    /// A topology holding only the local node
    pub fn new(local: NodeIdentity, virtual_nodes: usize) -> Self {
        let mut ring = HashRing::new(virtual_nodes);
        ring.add(local.clone());
        Self {
            local,
            ring,
            nodes: HashMap::new(),
        }
    }

    /// The local node's identity
    pub fn local(&self) -> &NodeIdentity {
        &self.local
    }

    /// The peer owning `hash`. [None] if the local node owns it or no peer is known
    pub fn owner_of(&self, hash: u64) -> Option<&Node> {
        if self.nodes.is_empty() {
            return None;
        }
        match self.ring.owner(hash) {
            Some(owner) if owner != &self.local => self.nodes.get(owner),
            _ => None,
        }
    }

    /// The joined peer with `identity`
    pub fn node(&self, identity: &NodeIdentity) -> Option<&Node> {
        self.nodes.get(identity)
    }

    /// Determine if `identity` is a joined peer
    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.nodes.contains_key(identity)
    }

    /// Number of joined peers
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Determine if no peer has joined
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Identities of the joined peers, sorted
    pub fn members(&self) -> Vec<NodeIdentity> {
        let mut members: Vec<NodeIdentity> = self.nodes.keys().cloned().collect();
        members.sort();
        members
    }

    /// Addresses of the joined peers in the form shared through handshakes
    pub fn known_peers(&self) -> Vec<String> {
        self.members()
            .into_iter()
            .map(|identity| identity.to_string())
            .collect()
    }

    pub(crate) fn insert(&mut self, node: Node) -> bool {
        let identity = node.identity().clone();
        if self.contains(&identity) {
            return false;
        }
        self.ring.add(identity.clone());
        self.nodes.insert(identity, node);
        true
    }

    pub(crate) fn remove(&mut self, identity: &NodeIdentity) -> Option<Node> {
        let node = self.nodes.remove(identity)?;
        self.ring.remove(identity);
        Some(node)
    }

    pub(crate) fn drain_nodes(&mut self) -> Vec<Node> {
        let nodes: Vec<Node> = self.nodes.drain().map(|(_, node)| node).collect();
        for node in nodes.iter() {
            self.ring.remove(node.identity());
        }
        nodes
    }
}

/// Routes distributed grains to the peer owning their key
#[derive(Debug, Clone)]
pub struct ClusterRouter {
    topology: WatchReceiver<Arc<Topology>>,
}

impl ClusterRouter {
    /// A router following the published topology
    pub fn new(topology: WatchReceiver<Arc<Topology>>) -> Self {
        Self { topology }
    }

    /// The peer owning `digest`, or [None] if it's owned locally
    pub fn owner_of(&self, digest: &KeyDigest) -> Option<NodeIdentity> {
        self.topology
            .borrow()
            .owner_of(digest.ring)
            .map(|node| node.identity().clone())
    }
}

impl Remoting for ClusterRouter {
    fn route(&self, digest: &KeyDigest) -> Option<Arc<dyn RemoteNode>> {
        let topology = self.topology.borrow();
        let node = topology.owner_of(digest.ring)?;
        Some(Arc::new(node.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use granary::concurrency::watch;

    use super::*;
    use crate::transport::{HandlerId, RpcClient, TransportErr};

    #[derive(Debug)]
    struct NullClient(SocketAddr);

    #[async_trait::async_trait]
    impl RpcClient for NullClient {
        fn peer_address(&self) -> SocketAddr {
            self.0
        }

        async fn call(&self, _: HandlerId, _: Vec<u8>) -> Result<Vec<u8>, TransportErr> {
            Err(TransportErr::Closed)
        }

        async fn close(&self) -> Result<(), TransportErr> {
            Ok(())
        }
    }

    fn address(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn node(port: u16) -> Node {
        Node::new(Arc::new(NullClient(address(port))))
    }

    fn digest(ring: u64) -> KeyDigest {
        KeyDigest { ring, shard: 0 }
    }

    #[test]
    fn lone_node_owns_everything() {
        let topology = Topology::new(NodeIdentity::from(address(1)), 8);
        for hash in [0, 42, u64::MAX] {
            assert!(topology.owner_of(hash).is_none());
        }
    }

    #[test]
    fn keys_split_between_local_and_peers() {
        let local = NodeIdentity::from(address(1));
        let mut topology = Topology::new(local.clone(), 32);
        assert!(topology.insert(node(2)));
        assert!(!topology.insert(node(2)));
        assert_eq!(1, topology.len());

        let mut ring = HashRing::new(32);
        ring.add(local.clone());
        ring.add(NodeIdentity::from(address(2)));

        let mut remote = 0;
        for hash in (0..2000u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)) {
            let expected = ring.owner(hash).cloned();
            match topology.owner_of(hash) {
                Some(peer) => {
                    assert_eq!(expected.as_ref(), Some(peer.identity()));
                    remote += 1;
                }
                None => assert_eq!(Some(&local), expected.as_ref()),
            }
        }
        assert!(remote > 0 && remote < 2000);

        let removed = topology.remove(&NodeIdentity::from(address(2)));
        assert!(removed.is_some());
        assert!(topology.is_empty());
        assert!(topology.owner_of(7).is_none());
    }

    #[test]
    fn router_follows_published_snapshots() {
        let local = NodeIdentity::from(address(1));
        let (tx, rx) = watch(Arc::new(Topology::new(local, 16)));
        let router = ClusterRouter::new(rx);

        let hashes: Vec<u64> = (0..500u64).map(|i| i.wrapping_mul(0xA24B_AED4_963E_E407)).collect();
        assert!(hashes.iter().all(|h| router.route(&digest(*h)).is_none()));

        tx.send_modify(|topology| {
            Arc::make_mut(topology).insert(node(2));
        });
        let routed: Vec<String> = hashes
            .iter()
            .filter_map(|h| router.route(&digest(*h)))
            .map(|node| node.identity().to_string())
            .collect();
        assert!(!routed.is_empty());
        assert!(routed.iter().all(|identity| identity == "127.0.0.1:2"));
        assert_eq!(
            Some(NodeIdentity::from(address(2))),
            hashes.iter().find_map(|h| router.owner_of(&digest(*h)))
        );

        tx.send_modify(|topology| {
            Arc::make_mut(topology).drain_nodes();
        });
        assert!(hashes.iter().all(|h| router.route(&digest(*h)).is_none()));
        assert_eq!(vec![] as Vec<String>, tx.borrow().known_peers());
    }
}
