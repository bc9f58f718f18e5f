// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The seam between the local runtime and a cluster transport.
//!
//! A [crate::GrainSystem] on its own executes every dispatch locally. Attaching a
//! [Remoting] implementation lets distributed grain dispatches be routed to the
//! node which owns the key, in which case the dispatch is serialized into an
//! [Invocation] and handed to that node's [RemoteNode].

use std::sync::Arc;

use crate::hash::KeyDigest;
use crate::GrainErr;

/// A serialized grain dispatch
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Invocation {
    /// [crate::Grain::NAME] of the target
    pub grain: String,
    /// Serialized grain key
    pub key: Vec<u8>,
    /// [crate::Message::HANDLER] of the message type
    pub handler: String,
    /// Serialized messages
    pub args: Vec<Vec<u8>>,
    /// A packed invocation delivers every argument in order as one-way sends.
    /// Otherwise `args` holds exactly one message whose reply is returned
    pub packed: bool,
}

impl Invocation {
    /// The digest of the target grain's identity
    pub fn digest(&self) -> KeyDigest {
        KeyDigest::from_parts(&self.grain, &self.key)
    }
}

/// A connection to a peer node able to execute invocations
#[async_trait::async_trait]
pub trait RemoteNode: Send + Sync + std::fmt::Debug {
    /// The node's cluster identity
    fn identity(&self) -> &str;

    /// Execute an invocation on the node, returning the serialized reply. A packed
    /// invocation replies with no bytes once every message has been handled
    async fn invoke(&self, invocation: Invocation) -> Result<Vec<u8>, GrainErr>;
}

/// Routing of distributed grains to their owning node
pub trait Remoting: Send + Sync + 'static {
    /// The node owning `digest`, or [None] if it is owned locally (including when
    /// this node is not part of any cluster)
    fn route(&self, digest: &KeyDigest) -> Option<Arc<dyn RemoteNode>>;
}
