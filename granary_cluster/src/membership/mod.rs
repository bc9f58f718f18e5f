// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Cluster membership.
//!
//! Addresses move through three stages: the bounded candidate queue, the set of
//! addresses currently being connected to, and finally the node table (or
//! nowhere, when the attempt fails). A background contact loop drains the
//! candidate queue, connecting and handshaking with each address. Every
//! handshake exchanges the known peer lists of both sides, and the lists
//! received are fed back in as candidates, so a node joining through a single
//! seed eventually connects to the whole cluster.
//!
//! The node table and the hash ring live together in a [Topology] which is
//! republished through a watch channel after every change. Shutdown closes a
//! [Gate] and waits for connection attempts already inside it before closing
//! every peer connection. Departure notices are sent to every peer at once and
//! each is bounded by the connect timeout, so an unresponsive peer can't hold
//! up shutdown.

use std::collections::HashSet;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::future::join_all;
use granary::concurrency::{
    spawn, timeout, watch, Duration, Gate, JoinHandle, WatchReceiver, WatchSender,
};
use prost::Message;

use crate::protocol::membership::{Handshake, Leave};
use crate::router::Topology;
use crate::transport::{Connector, RpcClient, TransportErr, HANDSHAKE, LEAVE};
use crate::{ClusterConfig, Node, NodeIdentity};

mod candidates;

use candidates::{CandidateQueue, Offer};


/// The result of a successful connection attempt
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PeerOutcome {
    /// The peer joined the node table
    Joined(NodeIdentity),
    /// The peer was already a member. No connection was kept
    AlreadyMember(NodeIdentity),
    /// Another attempt on the same address is in progress
    AlreadyConnecting,
    /// The address is this node's own
    IsLocal,
}

/// A failed connection attempt
#[derive(Debug)]
pub enum MembershipErr {
    /// Connecting to the peer failed
    Transport(SocketAddr, TransportErr),
    /// The peer didn't complete the handshake
    Handshake(SocketAddr, String),
    /// Membership is shutting down
    ShuttingDown,
}

impl std::error::Error for MembershipErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Transport(_, inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for MembershipErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(addr, err) => write!(f, "Failed to connect to {addr} '{err}'"),
            Self::Handshake(addr, reason) => write!(f, "Handshake with {addr} failed '{reason}'"),
            Self::ShuttingDown => write!(f, "Membership is shutting down"),
        }
    }
}

struct MembershipInner {
    local_address: SocketAddr,
    local: NodeIdentity,
    connector: Arc<dyn Connector>,
    candidates: Arc<CandidateQueue>,
    connecting: Mutex<HashSet<SocketAddr>>,
    topology: WatchSender<Arc<Topology>>,
    gate: Gate,
    leave_timeout: Duration,
    stopping: AtomicBool,
    stopped: WatchSender<bool>,
    contact_loop: Mutex<Option<JoinHandle<()>>>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for MembershipInner {
    fn drop(&mut self) {
        self.candidates.abort();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the address from the connecting set however the attempt ends
struct Connecting<'a> {
    set: &'a Mutex<HashSet<SocketAddr>>,
    address: SocketAddr,
}

impl Drop for Connecting<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.address);
    }
}

/// The membership manager of one node. Cloning produces another handle to the
/// same manager
#[derive(Clone)]
pub struct Membership {
    inner: Arc<MembershipInner>,
}

impl std::fmt::Debug for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Membership")
            .field("local", &self.inner.local)
            .field("members", &self.members())
            .finish()
    }
}

impl Membership {
    /// Create the manager of the node reachable at `local_address` and start its
    /// contact loop
    pub fn start(
        local_address: SocketAddr,
        connector: Arc<dyn Connector>,
        config: &ClusterConfig,
    ) -> Self {
        let local = NodeIdentity::from(local_address);
        let (topology, _) = watch(Arc::new(Topology::new(local.clone(), config.virtual_nodes)));
        let candidates = Arc::new(CandidateQueue::new(config.candidate_capacity));
        let membership = Self {
            inner: Arc::new(MembershipInner {
                local_address,
                local,
                connector,
                candidates: candidates.clone(),
                connecting: Mutex::new(HashSet::new()),
                topology,
                gate: Gate::new(),
                leave_timeout: config.connect_timeout,
                stopping: AtomicBool::new(false),
                stopped: watch(false).0,
                contact_loop: Mutex::new(None),
                watchers: Mutex::new(Vec::new()),
            }),
        };
        let contact_loop = spawn(contact_loop(candidates, Arc::downgrade(&membership.inner)));
        *lock(&membership.inner.contact_loop) = Some(contact_loop);
        log::debug!("Membership of {} started", membership.inner.local);
        membership
    }

    /// This node's identity
    pub fn local_identity(&self) -> &NodeIdentity {
        &self.inner.local
    }

    /// The address this node advertises to peers
    pub fn local_address(&self) -> SocketAddr {
        self.inner.local_address
    }

    /// Identities of the joined peers, sorted
    pub fn members(&self) -> Vec<NodeIdentity> {
        self.inner.topology.borrow().members()
    }

    /// Determine if at least one peer has joined
    pub fn is_connected_to_cluster(&self) -> bool {
        !self.inner.topology.borrow().is_empty()
    }

    /// The current topology
    pub fn topology(&self) -> Arc<Topology> {
        self.inner.topology.borrow().clone()
    }

    /// Observe every published topology
    pub fn subscribe(&self) -> WatchReceiver<Arc<Topology>> {
        self.inner.topology.subscribe()
    }

    /// Wait until at least `count` peers have joined
    pub async fn wait_for_members(&self, count: usize) {
        let mut topology = self.subscribe();
        let _ = topology.wait_for(|topology| topology.len() >= count).await;
    }

    fn should_contact(&self, address: SocketAddr) -> bool {
        let identity = NodeIdentity::from(address);
        if identity == self.inner.local {
            return false;
        }
        let member = self.inner.topology.borrow().contains(&identity);
        !member && !lock(&self.inner.connecting).contains(&address)
    }

    /// Queue `address` for a connection attempt, waiting for room in the queue.
    /// This node's own address, joined peers, and addresses being connected to
    /// are dropped
    pub async fn add_candidate(&self, address: SocketAddr) {
        if !self.should_contact(address) {
            log::trace!("Dropping candidate {address}");
            return;
        }
        if self.inner.candidates.push(address).await.is_err() {
            log::debug!("Dropping candidate {address}, membership is shutting down");
        }
    }

    /// [Membership::add_candidate] for every address, in order
    pub async fn add_candidates(&self, addresses: impl IntoIterator<Item = SocketAddr>) {
        for address in addresses {
            self.add_candidate(address).await;
        }
    }

    fn offer_candidate(&self, address: SocketAddr) {
        if !self.should_contact(address) {
            return;
        }
        match self.inner.candidates.offer(address) {
            Offer::Queued => log::trace!("Queued candidate {address}"),
            Offer::Full => log::warn!("Candidate queue is full, dropping {address}"),
            Offer::Aborted => {}
        }
    }

    /// Connect and handshake with the peer listening at `address`, adding it to
    /// the node table. The peer lists received are queued as candidates
    pub async fn try_add_peer(&self, address: SocketAddr) -> Result<PeerOutcome, MembershipErr> {
        let _guard = self
            .inner
            .gate
            .enter()
            .map_err(|_| MembershipErr::ShuttingDown)?;

        let identity = NodeIdentity::from(address);
        if identity == self.inner.local {
            return Ok(PeerOutcome::IsLocal);
        }
        let member = self.inner.topology.borrow().contains(&identity);
        if member {
            return Ok(PeerOutcome::AlreadyMember(identity));
        }
        let marked = lock(&self.inner.connecting).insert(address);
        if !marked {
            return Ok(PeerOutcome::AlreadyConnecting);
        }
        let _connecting = Connecting {
            set: &self.inner.connecting,
            address,
        };

        let client = self
            .inner
            .connector
            .connect(address)
            .await
            .map_err(|err| MembershipErr::Transport(address, err))?;
        let reply = match self.handshake(address, client.as_ref()).await {
            Ok(reply) => reply,
            Err(err) => {
                if let Err(close_err) = client.close().await {
                    log::debug!("Error closing the connection to {address} '{close_err}'");
                }
                return Err(err);
            }
        };

        let node = Node::new(client.clone());
        let identity = node.identity().clone();
        let joined = self
            .inner
            .topology
            .send_if_modified(|topology| Arc::make_mut(topology).insert(node));
        if !joined {
            let _ = client.close().await;
            return Ok(PeerOutcome::AlreadyMember(identity));
        }
        log::info!("Peer {identity} joined the cluster");
        self.watch_connection(identity.clone(), client);

        for peer in reply
            .known_peers
            .iter()
            .chain(std::iter::once(&reply.origin))
        {
            match peer.parse::<SocketAddr>() {
                Ok(candidate) => self.offer_candidate(candidate),
                Err(err) => log::debug!("Ignoring malformed peer address '{peer}' ({err})"),
            }
        }
        Ok(PeerOutcome::Joined(identity))
    }

    async fn handshake(
        &self,
        address: SocketAddr,
        client: &dyn RpcClient,
    ) -> Result<Handshake, MembershipErr> {
        let request = Handshake {
            known_peers: self.inner.topology.borrow().known_peers(),
            origin: self.inner.local_address.to_string(),
        };
        let reply = client
            .call(HANDSHAKE, request.encode_to_vec())
            .await
            .map_err(|err| MembershipErr::Handshake(address, err.to_string()))?;
        Handshake::decode(reply.as_slice())
            .map_err(|err| MembershipErr::Handshake(address, err.to_string()))
    }

    fn watch_connection(&self, identity: NodeIdentity, client: Arc<dyn RpcClient>) {
        let weak = Arc::downgrade(&self.inner);
        let watcher = spawn(async move {
            client.closed().await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let lost = inner.topology.send_if_modified(|topology| {
                let current = topology
                    .node(&identity)
                    .map_or(false, |node| node.same_connection(&client));
                if current {
                    Arc::make_mut(topology).remove(&identity);
                }
                current
            });
            if lost {
                log::info!("Peer {identity} left the cluster (connection lost)");
            }
        });
        let mut watchers = lock(&self.inner.watchers);
        watchers.retain(|watcher| !watcher.is_finished());
        watchers.push(watcher);
    }

    /// Answer a peer's handshake with this node's view, then queue the peer and
    /// everything it knows as candidates
    pub fn handle_handshake(&self, request: Handshake) -> Handshake {
        let reply = Handshake {
            known_peers: self.inner.topology.borrow().known_peers(),
            origin: self.inner.local_address.to_string(),
        };
        if self.inner.gate.is_closed() {
            return reply;
        }

        let mut gossip = Vec::with_capacity(request.known_peers.len() + 1);
        for peer in std::iter::once(&request.origin).chain(request.known_peers.iter()) {
            match peer.parse::<SocketAddr>() {
                Ok(address) => gossip.push(address),
                Err(err) => log::debug!("Ignoring malformed peer address '{peer}' ({err})"),
            }
        }
        let membership = self.clone();
        spawn(async move { membership.add_candidates(gossip).await });
        reply
    }

    /// Handle a peer's departure notice
    pub async fn handle_leave(&self, leave: Leave) {
        match leave.origin.parse::<SocketAddr>() {
            Ok(address) => {
                self.remove_peer(&NodeIdentity::from(address)).await;
            }
            Err(err) => log::debug!("Ignoring leave from malformed address '{}' ({err})", leave.origin),
        }
    }

    /// Remove a peer from the node table and the ring, closing its connection
    ///
    /// Returns [false] if it wasn't a member
    pub async fn remove_peer(&self, identity: &NodeIdentity) -> bool {
        let mut removed = None;
        self.inner.topology.send_if_modified(|topology| {
            removed = Arc::make_mut(topology).remove(identity);
            removed.is_some()
        });
        let Some(node) = removed else {
            return false;
        };
        log::info!("Peer {identity} left the cluster");
        if let Err(err) = node.client().close().await {
            log::debug!("Error closing the connection to {identity} '{err}'");
        }
        true
    }

    /// Stop membership. Waits for connection attempts in progress, then notifies
    /// and disconnects from every peer. Notices unanswered within the connect
    /// timeout and disconnection failures are ignored
    ///
    /// Every call resolves once the first has finished draining
    pub async fn stop(&self) {
        if self.inner.stopping.swap(true, Ordering::AcqRel) {
            let mut stopped = self.inner.stopped.subscribe();
            let _ = stopped.wait_for(|stopped| *stopped).await;
            return;
        }
        self.inner.gate.close().await;
        self.inner.candidates.abort();
        let contact_loop = lock(&self.inner.contact_loop).take();
        if let Some(contact_loop) = contact_loop {
            if let Err(join_err) = contact_loop.await {
                log::debug!("Contact loop of {} ended abnormally '{join_err}'", self.inner.local);
            }
        }
        let watchers = std::mem::take(&mut *lock(&self.inner.watchers));
        for watcher in watchers {
            watcher.abort();
        }

        let mut nodes = Vec::new();
        self.inner.topology.send_if_modified(|topology| {
            nodes = Arc::make_mut(topology).drain_nodes();
            !nodes.is_empty()
        });
        let leave = Leave {
            origin: self.inner.local_address.to_string(),
        }
        .encode_to_vec();
        join_all(nodes.iter().map(|node| self.depart(node, leave.clone()))).await;

        self.inner.stopped.send_replace(true);
        log::info!("Membership of {} stopped", self.inner.local);
    }

    async fn depart(&self, node: &Node, leave: Vec<u8>) {
        match timeout(self.inner.leave_timeout, node.client().send(LEAVE, leave)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                log::debug!("Failed to notify {} of departure '{err}'", node.identity())
            }
            Err(_) => {
                log::debug!("{} didn't acknowledge the departure in time", node.identity())
            }
        }
        if let Err(err) = node.client().close().await {
            log::debug!("Error closing the connection to {} '{err}'", node.identity());
        }
    }
}

async fn contact_loop(candidates: Arc<CandidateQueue>, membership: Weak<MembershipInner>) {
    while let Ok(address) = candidates.pop().await {
        let Some(inner) = membership.upgrade() else {
            break;
        };
        let membership = Membership { inner };
        match membership.try_add_peer(address).await {
            Ok(PeerOutcome::Joined(_)) => {}
            Ok(outcome) => log::debug!("Candidate {address} skipped ({outcome:?})"),
            Err(MembershipErr::ShuttingDown) => break,
            Err(err) => log::warn!("{err}"),
        }
    }
    log::debug!("Contact loop exiting");
}
