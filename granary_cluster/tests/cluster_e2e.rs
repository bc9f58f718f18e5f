// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Two nodes over localhost TCP

use std::cell::Cell;

use granary::concurrency::{timeout, Duration};
use granary::hash::KeyDigest;
use granary::{
    deduplicate, BytesConvertable, Grain, GrainErr, GrainProcessingErr, GrainSystem, Handler,
    Message, RemoteFailure, SerializationErr, SystemConfig,
};
use granary_cluster::{ClusterConfig, ClusterNode, NodeIdentity};

struct Bump(u64);

impl BytesConvertable for Bump {
    fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        u64::from_bytes(bytes).map(Bump)
    }
}

impl Message for Bump {
    type Reply = u64;
    const HANDLER: &'static str = "bump";
}

struct Total;

impl BytesConvertable for Total {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(_: Vec<u8>) -> Result<Self, SerializationErr> {
        Ok(Total)
    }
}

impl Message for Total {
    type Reply = u64;
    const HANDLER: &'static str = "total";
}

/// Always rejected by the handler
struct Refuse;

impl BytesConvertable for Refuse {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(_: Vec<u8>) -> Result<Self, SerializationErr> {
        Ok(Refuse)
    }
}

impl Message for Refuse {
    type Reply = u64;
    const HANDLER: &'static str = "refuse";
}

/// Handled by [Tally], but never registered for remote dispatch
struct Forget;

impl BytesConvertable for Forget {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(_: Vec<u8>) -> Result<Self, SerializationErr> {
        Ok(Forget)
    }
}

impl Message for Forget {
    type Reply = ();
    const HANDLER: &'static str = "forget";
}

struct Tally {
    total: Cell<u64>,
}

impl Grain for Tally {
    type Key = u64;
    const NAME: &'static str = "tally";

    fn activate(_key: &u64) -> Self {
        Self {
            total: Cell::new(0),
        }
    }
}

#[granary::async_trait(?Send)]
impl Handler<Bump> for Tally {
    async fn handle(&self, message: Bump) -> Result<u64, GrainProcessingErr> {
        self.total.set(self.total.get() + message.0);
        Ok(self.total.get())
    }
}

#[granary::async_trait(?Send)]
impl Handler<Total> for Tally {
    async fn handle(&self, _: Total) -> Result<u64, GrainProcessingErr> {
        Ok(self.total.get())
    }
}

#[granary::async_trait(?Send)]
impl Handler<Refuse> for Tally {
    async fn handle(&self, _: Refuse) -> Result<u64, GrainProcessingErr> {
        Err(format!("refused at total {}", self.total.get()).into())
    }
}

#[granary::async_trait(?Send)]
impl Handler<Forget> for Tally {
    async fn handle(&self, _: Forget) -> Result<(), GrainProcessingErr> {
        self.total.set(0);
        Ok(())
    }
}

fn start_system() -> GrainSystem {
    let system = GrainSystem::new(SystemConfig::default().with_shards(2))
        .expect("Failed to start grain system");
    system
        .register::<Tally, Bump>()
        .register::<Tally, Total>()
        .register::<Tally, Refuse>();
    system
}

async fn start_pair() -> (ClusterNode, ClusterNode) {
    let node_b = ClusterNode::start(start_system(), ClusterConfig::default())
        .await
        .expect("Failed to start node B");
    let node_a = ClusterNode::start(
        start_system(),
        ClusterConfig::default().with_seeds([node_b.local_address()]),
    )
    .await
    .expect("Failed to start node A");
    timeout(Duration::from_secs(5), async {
        node_a.membership().wait_for_members(1).await;
        node_b.membership().wait_for_members(1).await;
    })
    .await
    .expect("Nodes never joined");
    (node_a, node_b)
}

fn assert_remote_failure<T: std::fmt::Debug>(
    result: Result<T, GrainErr>,
    owner: &NodeIdentity,
    expected: RemoteFailure,
) -> String {
    match result {
        Err(GrainErr::Remote { node, kind, reason }) => {
            assert_eq!(owner.as_str(), node);
            assert_eq!(expected, kind);
            reason
        }
        other => panic!("Expected a {expected} failure from {owner}, got {other:?}"),
    }
}

fn owned_by(node: &ClusterNode, owner: &NodeIdentity) -> u64 {
    let topology = node.membership().topology();
    (0..10_000u64)
        .find(|key| {
            topology
                .owner_of(KeyDigest::of::<Tally>(key).ring)
                .map(|peer| peer.identity() == owner)
                .unwrap_or(false)
        })
        .expect("No key is owned by the peer")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn grains_are_served_by_their_owning_node() {
    let _ = env_logger::builder().is_test(true).try_init();

    // A joins through its seed, B learns about A from the handshake
    let (node_a, node_b) = start_pair().await;
    assert_eq!(vec![node_b.local_identity().clone()], node_a.membership().members());
    assert_eq!(vec![node_a.local_identity().clone()], node_b.membership().members());

    // both sides agree on who owns the key
    let key = owned_by(&node_a, node_b.local_identity());
    assert!(node_b
        .membership()
        .topology()
        .owner_of(KeyDigest::of::<Tally>(&key).ring)
        .is_none());

    let from_a = node_a.system().get::<Tally>(key);
    assert_eq!(5, from_a.ask(Bump(5)).await.unwrap());
    from_a.tell(Bump(3)).await.unwrap();
    assert_eq!(1, node_b.system().activation_count::<Tally>().await.unwrap());
    assert_eq!(0, node_a.system().activation_count::<Tally>().await.unwrap());

    // B serves its own key locally, from the same activation
    let from_b = node_b.system().get::<Tally>(key);
    assert_eq!(9, from_b.ask(Bump(1)).await.unwrap());

    // a deduplicated batch crosses the wire as one packed invocation
    deduplicate(&from_a, |collector| async move {
        collector.collect(Bump(10));
        collector.collect(Bump(20));
        Ok::<(), GrainProcessingErr>(())
    })
    .await
    .unwrap();
    assert_eq!(39, from_a.ask(Total).await.unwrap());

    // A leaves, B hears about it
    let mut topology_b = node_b.membership().subscribe();
    node_a.stop().await;
    timeout(
        Duration::from_secs(5),
        topology_b.wait_for(|topology| topology.is_empty()),
    )
    .await
    .expect("B never noticed A leaving")
    .expect("B's membership was dropped");
    assert!(!node_a.membership().is_connected_to_cluster());

    // without peers every key is owned locally again
    assert_eq!(1, from_a.ask(Bump(1)).await.unwrap());
    assert_eq!(1, node_a.system().activation_count::<Tally>().await.unwrap());

    node_b.stop().await;
    node_a.system().stop();
    node_b.system().stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_failures_reach_the_caller() {
    let _ = env_logger::builder().is_test(true).try_init();

    let (node_a, node_b) = start_pair().await;
    let owner = node_b.local_identity();
    let key = owned_by(&node_a, owner);
    let from_a = node_a.system().get::<Tally>(key);
    assert_eq!(4, from_a.ask(Bump(4)).await.unwrap());

    // the handler's error comes back as is
    let reason = assert_remote_failure(from_a.ask(Refuse).await, owner, RemoteFailure::Processing);
    assert_eq!("refused at total 4", reason);
    assert_remote_failure(from_a.tell(Refuse).await, owner, RemoteFailure::Processing);
    assert_remote_failure(
        from_a.tell_packed(vec![Refuse, Refuse]).await,
        owner,
        RemoteFailure::Processing,
    );

    // B can't dispatch a handler it never registered
    assert_remote_failure(from_a.ask(Forget).await, owner, RemoteFailure::UnknownHandler);
    assert_remote_failure(from_a.tell(Forget).await, owner, RemoteFailure::UnknownHandler);

    // failures leave the activation intact
    assert_eq!(4, from_a.ask(Total).await.unwrap());
    assert_eq!(1, node_b.system().activation_count::<Tally>().await.unwrap());

    node_a.stop().await;
    node_b.stop().await;
    node_a.system().stop();
    node_b.system().stop();
}
