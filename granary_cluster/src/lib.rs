// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! # Clustering for [granary] grain systems.
//!
//! A **node** is a process hosting a [granary::GrainSystem] which listens for
//! its peers on a socket address. The address doubles as the node's identity
//! (see [NodeIdentity]), so every node derives the same identity for a peer no
//! matter which side opened the connection.
//!
//! Distributed grains are owned by exactly one node of the cluster: the key
//! digest of the grain is placed on a consistent-hash ring holding every
//! member (see [HashRing]), and the owning node executes every dispatch to it.
//! Grains with a local placement never leave the node they were called from.
//!
//! Nodes find each other through gossip. A node is started with a handful of
//! seed addresses, connects to them and exchanges a [protocol::membership::Handshake]
//! carrying the peers each side already knows. Those peers are in turn
//! contacted, so the cluster converges to a full mesh. Nodes stopping gracefully
//! notify their peers, and a lost connection removes the peer as well.
//!
//! ```rust,no_run
//! use granary::{GrainSystem, SystemConfig};
//! use granary_cluster::{ClusterConfig, ClusterNode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = GrainSystem::new(SystemConfig::default()).expect("Failed to start the shards");
//!     let config = ClusterConfig::default()
//!         .with_bind("127.0.0.1:7000".parse().unwrap())
//!         .with_seeds(["127.0.0.1:7001".parse().unwrap()]);
//!     let node = ClusterNode::start(system, config)
//!         .await
//!         .expect("Failed to start the node");
//!     node.membership().wait_for_members(1).await;
//!     node.stop().await;
//! }
//! ```
//!
//! Grain messages sent across the wire are serialized with
//! [granary::BytesConvertable]; prost types can use
//! [derive_serialization_for_prost_type].

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod config;
mod identity;
mod node;
mod router;

pub mod macros;
pub mod membership;
pub mod protocol;
pub mod ring;
pub mod transport;

// ============== Re-exports ============== //
pub use config::{ClusterConfig, DEFAULT_CANDIDATE_CAPACITY, DEFAULT_CONNECT_TIMEOUT};
pub use identity::{Node, NodeIdentity};
pub use membership::{Membership, MembershipErr, PeerOutcome};
pub use node::{ClusterNode, NodeStartErr};
pub use ring::HashRing;
pub use router::{ClusterRouter, Topology};
pub use transport::TransportErr;

pub use granary::serialization::BytesConvertable;
pub use granary::SerializationErr;

#[doc(hidden)]
pub use prost;
