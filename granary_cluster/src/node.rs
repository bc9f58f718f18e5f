// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A [ClusterNode] joins a [GrainSystem] to a cluster.
//!
//! Starting a node binds the RPC listener, answers the membership and grain
//! invocation handlers on it, attaches a [ClusterRouter] to the system so that
//! distributed grains are dispatched to their owning peer, and queues the
//! configured seeds as candidates.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use granary::GrainSystem;
use prost::Message;
use tokio::net::TcpListener;

use crate::membership::Membership;
use crate::protocol::grain;
use crate::protocol::membership::{Handshake, Leave};
use crate::router::ClusterRouter;
use crate::transport::{
    Connector, HandlerErr, RequestHandler, RpcServer, ServerHandle, TcpConnector, HANDSHAKE, INVOKE, LEAVE,
};
use crate::{ClusterConfig, NodeIdentity};

/// Failure to start a [ClusterNode]
#[derive(Debug)]
pub enum NodeStartErr {
    /// The listener couldn't be bound
    Bind(std::io::Error),
    /// The system already has a remoting attached
    RemotingAttached,
}

impl std::error::Error for NodeStartErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Bind(inner) => Some(inner),
            Self::RemotingAttached => None,
        }
    }
}

impl std::fmt::Display for NodeStartErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bind(err) => write!(f, "Failed to bind the node listener '{err}'"),
            Self::RemotingAttached => {
                write!(f, "The grain system is already attached to a cluster")
            }
        }
    }
}

impl From<std::io::Error> for NodeStartErr {
    fn from(value: std::io::Error) -> Self {
        Self::Bind(value)
    }
}

struct HandshakeHandler(Membership);

#[async_trait::async_trait]
impl RequestHandler for HandshakeHandler {
    async fn handle(&self, peer: SocketAddr, payload: Vec<u8>) -> Result<Vec<u8>, HandlerErr> {
        let request = Handshake::decode(payload.as_slice())?;
        log::debug!("Handshake from {peer} (origin {})", request.origin);
        Ok(self.0.handle_handshake(request).encode_to_vec())
    }
}

struct LeaveHandler(Membership);

#[async_trait::async_trait]
impl RequestHandler for LeaveHandler {
    async fn handle(&self, _peer: SocketAddr, payload: Vec<u8>) -> Result<Vec<u8>, HandlerErr> {
        let leave = Leave::decode(payload.as_slice())?;
        self.0.handle_leave(leave).await;
        Ok(Vec::new())
    }
}

struct InvokeHandler(GrainSystem);

#[async_trait::async_trait]
impl RequestHandler for InvokeHandler {
    async fn handle(&self, peer: SocketAddr, payload: Vec<u8>) -> Result<Vec<u8>, HandlerErr> {
        let invocation = grain::Invocation::decode(payload.as_slice())?;
        log::trace!(
            "Invocation of {}::{} from {peer}",
            invocation.grain,
            invocation.handler
        );
        Ok(self.0.invoke(invocation.into()).await?)
    }
}

/// A running cluster node
#[derive(Debug)]
pub struct ClusterNode {
    system: GrainSystem,
    membership: Membership,
    server: ServerHandle,
    stopped: AtomicBool,
}

impl ClusterNode {
    /// Start a node serving `system` with TCP connections to its peers
    pub async fn start(system: GrainSystem, config: ClusterConfig) -> Result<Self, NodeStartErr> {
        let connector = Arc::new(TcpConnector::new(config.connect_timeout));
        Self::start_with_connector(system, config, connector).await
    }

    /// Start a node which reaches its peers through `connector`
    pub async fn start_with_connector(
        system: GrainSystem,
        config: ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, NodeStartErr> {
        let listener = TcpListener::bind(config.bind).await?;
        let local_address = match config.advertise {
            Some(advertise) => advertise,
            None => listener.local_addr()?,
        };

        let membership = Membership::start(local_address, connector, &config);
        let router = Arc::new(ClusterRouter::new(membership.subscribe()));
        if !system.attach_remoting(router) {
            membership.stop().await;
            return Err(NodeStartErr::RemotingAttached);
        }

        let mut server = RpcServer::new();
        server.register_handler(HANDSHAKE, Arc::new(HandshakeHandler(membership.clone())));
        server.register_handler(INVOKE, Arc::new(InvokeHandler(system.clone())));
        server.register_handler(LEAVE, Arc::new(LeaveHandler(membership.clone())));
        let server = server.serve(listener)?;

        log::info!(
            "Cluster node {} started with {} seeds",
            membership.local_identity(),
            config.seeds.len()
        );
        membership.add_candidates(config.seeds.iter().copied()).await;

        Ok(Self {
            system,
            membership,
            server,
            stopped: AtomicBool::new(false),
        })
    }

    /// This node's identity
    pub fn local_identity(&self) -> &NodeIdentity {
        self.membership.local_identity()
    }

    /// The address peers use to reach this node
    pub fn local_address(&self) -> SocketAddr {
        self.membership.local_address()
    }

    /// The address the listener is bound to
    pub fn bound_address(&self) -> SocketAddr {
        self.server.local_addr()
    }

    /// The node's membership manager
    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// The grain system served by this node
    pub fn system(&self) -> &GrainSystem {
        &self.system
    }

    /// Leave the cluster: notify and disconnect from every peer, then stop
    /// listening. Only the first call has any effect. The grain system itself
    /// keeps running
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.membership.stop().await;
        self.server.stop();
        log::info!("Cluster node {} stopped", self.local_identity());
    }
}
