// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The node-to-node RPC transport.
//!
//! Connections carry length-prefixed protobuf envelopes. A request names a
//! numbered handler and carries an opaque payload; the response echoes the
//! request's tag so that many calls may be outstanding on one connection.
//!
//! The membership layer only depends on the [Connector] and [RpcClient] traits,
//! so it can be exercised without sockets.

use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;

use granary::{GrainErr, RemoteFailure};

mod server;
mod tcp;

pub use server::{RpcServer, ServerHandle};
pub use tcp::{TcpClient, TcpConnector};

/// Identifier of a remote handler
pub type HandlerId = u32;

/// Membership handshake, see [crate::protocol::membership::Handshake]
pub const HANDSHAKE: HandlerId = 0;
/// Remote grain invocation
pub const INVOKE: HandlerId = 1;
/// Graceful departure notice, see [crate::protocol::membership::Leave]
pub const LEAVE: HandlerId = 2;

/// Largest frame accepted from the wire
pub(crate) const MAX_FRAME_LEN: u64 = 64 * 1024 * 1024;

/// Transport failures
#[derive(Debug)]
pub enum TransportErr {
    /// A socket operation failed
    Io(std::io::Error),
    /// The peer did not answer in time
    Timeout,
    /// A frame couldn't be decoded
    Decode(prost::DecodeError),
    /// The remote handler reported a failure
    Remote(HandlerErr),
    /// The connection is closed
    Closed,
}

impl std::error::Error for TransportErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Io(inner) => Some(inner),
            Self::Decode(inner) => Some(inner),
            Self::Remote(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for TransportErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "Network error '{err}'"),
            Self::Timeout => write!(f, "Timed out waiting for the peer"),
            Self::Decode(err) => write!(f, "Malformed frame '{err}'"),
            Self::Remote(err) => write!(f, "{err}"),
            Self::Closed => write!(f, "Connection closed"),
        }
    }
}

impl From<std::io::Error> for TransportErr {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<prost::DecodeError> for TransportErr {
    fn from(value: prost::DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<granary::concurrency::Timeout> for TransportErr {
    fn from(_: granary::concurrency::Timeout) -> Self {
        Self::Timeout
    }
}

/// An established connection to a peer
#[async_trait::async_trait]
pub trait RpcClient: Send + Sync + std::fmt::Debug {
    /// The address of the connected peer
    fn peer_address(&self) -> SocketAddr;

    /// Call a handler on the peer and wait for its reply
    async fn call(&self, handler: HandlerId, payload: Vec<u8>) -> Result<Vec<u8>, TransportErr>;

    /// Deliver a request whose reply carries nothing, waiting for the peer's acknowledgement
    async fn send(&self, handler: HandlerId, payload: Vec<u8>) -> Result<(), TransportErr> {
        self.call(handler, payload).await.map(|_| ())
    }

    /// Close the connection. Outstanding calls fail with [TransportErr::Closed]
    async fn close(&self) -> Result<(), TransportErr>;

    /// Resolves once the connection has closed, from either side
    async fn closed(&self) {
        futures::future::pending::<()>().await
    }
}

/// Establishes connections to peers
#[async_trait::async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Connect to the peer listening at `address`
    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn RpcClient>, TransportErr>;
}

/// A failure produced by a [RequestHandler], returned to the caller as is
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct HandlerErr {
    /// What kind of failure occurred
    pub kind: RemoteFailure,
    /// Description of the failure
    pub reason: String,
}

impl HandlerErr {
    /// Create a new handler failure
    pub fn new(kind: RemoteFailure, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

impl std::error::Error for HandlerErr {}

impl Display for HandlerErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Remote {} failure: {}", self.kind, self.reason)
    }
}

impl From<prost::DecodeError> for HandlerErr {
    fn from(value: prost::DecodeError) -> Self {
        Self::new(RemoteFailure::Serialization, value.to_string())
    }
}

impl From<GrainErr> for HandlerErr {
    fn from(value: GrainErr) -> Self {
        let kind = value.remote_failure();
        let reason = match value {
            GrainErr::Processing(inner) => inner.to_string(),
            GrainErr::Serialization(inner) => inner.to_string(),
            GrainErr::Remote { reason, .. } => reason,
            other => other.to_string(),
        };
        Self::new(kind, reason)
    }
}

/// Server-side handler of one [HandlerId]
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle a request from `peer`, producing the reply payload or a failure
    /// which is returned to the caller
    async fn handle(&self, peer: SocketAddr, payload: Vec<u8>) -> Result<Vec<u8>, HandlerErr>;
}
