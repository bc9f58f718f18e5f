// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Node identities and connected peer records

use std::fmt::Display;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::sync::Arc;

use granary::remote::{Invocation, RemoteNode};
use granary::{GrainErr, RemoteFailure};
use prost::Message;

use crate::protocol::grain;
use crate::transport::{RpcClient, TransportErr, INVOKE};

/// A node's cluster identity, the canonical text form of its address
/// (`a.b.c.d:port` for IPv4). Identical addresses yield identical identities
/// on every node
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeIdentity(String);

impl NodeIdentity {
    /// The identity's text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address this identity was derived from
    pub fn address(&self) -> Result<SocketAddr, AddrParseError> {
        self.0.parse()
    }
}

impl From<SocketAddr> for NodeIdentity {
    fn from(addr: SocketAddr) -> Self {
        let ip = match addr.ip() {
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => IpAddr::V4(v4),
                None => IpAddr::V6(v6),
            },
            v4 => v4,
        };
        Self(SocketAddr::new(ip, addr.port()).to_string())
    }
}

impl Display for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NodeIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A connected peer: its identity and the RPC client used to reach it
#[derive(Debug, Clone)]
pub struct Node {
    identity: NodeIdentity,
    client: Arc<dyn RpcClient>,
}

impl Node {
    /// Wrap a connected client. The identity is derived from the client's peer address
    pub fn new(client: Arc<dyn RpcClient>) -> Self {
        Self {
            identity: NodeIdentity::from(client.peer_address()),
            client,
        }
    }

    /// The node's identity
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// The node's address
    pub fn address(&self) -> SocketAddr {
        self.client.peer_address()
    }

    /// The RPC client connected to the node
    pub fn client(&self) -> &Arc<dyn RpcClient> {
        &self.client
    }

    pub(crate) fn same_connection(&self, client: &Arc<dyn RpcClient>) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.client) as *const (),
            Arc::as_ptr(client) as *const (),
        )
    }
}

#[async_trait::async_trait]
impl RemoteNode for Node {
    fn identity(&self) -> &str {
        self.identity.as_str()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Vec<u8>, GrainErr> {
        let payload = grain::Invocation::from(invocation).encode_to_vec();
        self.client
            .call(INVOKE, payload)
            .await
            .map_err(|err| {
                let (kind, reason) = match err {
                    TransportErr::Remote(failure) => (failure.kind, failure.reason),
                    other => (RemoteFailure::Unreachable, other.to_string()),
                };
                GrainErr::Remote {
                    node: self.identity.to_string(),
                    kind,
                    reason,
                }
            })
    }
}
