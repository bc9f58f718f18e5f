// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! General runtime tests, more logic-specific tests are contained in their modules

use std::cell::Cell;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::join_all;

use crate::concurrency::{sleep, Duration};
use crate::hash::KeyDigest;
use crate::remote::{Invocation, RemoteNode, Remoting};
use crate::{
    deduplicate, BytesConvertable, Deduplicator, Grain, GrainErr, GrainProcessingErr,
    GrainSystem, Handler, Message, Placement, RemoteFailure, SerializationErr, SystemConfig,
};

static NEXT_ACTIVATION: AtomicU64 = AtomicU64::new(0);

fn start_system(shards: usize) -> GrainSystem {
    GrainSystem::new(SystemConfig::default().with_shards(shards))
        .expect("Failed to start grain system")
}

// ============ Messages ============ //

struct Add(u64);

impl BytesConvertable for Add {
    fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        u64::from_bytes(bytes).map(Add)
    }
}

impl Message for Add {
    type Reply = u64;
    const HANDLER: &'static str = "add";
}

/// Adds its value, but fails on zero
struct Checked(u64);

impl BytesConvertable for Checked {
    fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        u64::from_bytes(bytes).map(Checked)
    }
}

impl Message for Checked {
    type Reply = u64;
    const HANDLER: &'static str = "checked";
}

macro_rules! unit_message {
    ($name:ident, $reply:ty, $handler:literal) => {
        struct $name;

        impl BytesConvertable for $name {
            fn into_bytes(self) -> Vec<u8> {
                Vec::new()
            }
            fn from_bytes(_: Vec<u8>) -> Result<Self, SerializationErr> {
                Ok($name)
            }
        }

        impl Message for $name {
            type Reply = $reply;
            const HANDLER: &'static str = $handler;
        }
    };
}

unit_message!(Identify, u64, "identify");
unit_message!(Slow, (), "slow");
unit_message!(Overlaps, u64, "overlaps");
unit_message!(Fail, (), "fail");
unit_message!(Explode, (), "explode");

// ============ Grains ============ //

struct Probe {
    id: u64,
    value: Cell<u64>,
    inside: Cell<u32>,
    overlaps: Cell<u64>,
}

impl Probe {
    fn new() -> Self {
        Self {
            id: NEXT_ACTIVATION.fetch_add(1, Ordering::Relaxed),
            value: Cell::new(0),
            inside: Cell::new(0),
            overlaps: Cell::new(0),
        }
    }

    fn add(&self, amount: u64) -> u64 {
        self.value.set(self.value.get() + amount);
        self.value.get()
    }

    async fn slow(&self) {
        if self.inside.get() > 0 {
            self.overlaps.set(self.overlaps.get() + 1);
        }
        self.inside.set(self.inside.get() + 1);
        sleep(Duration::from_millis(10)).await;
        self.inside.set(self.inside.get() - 1);
    }
}

macro_rules! probe_grain {
    ($name:ident, $grain:literal, $placement:expr) => {
        struct $name(Probe);

        impl Grain for $name {
            type Key = u64;
            const NAME: &'static str = $grain;

            fn placement() -> Placement {
                $placement
            }

            fn activate(_key: &u64) -> Self {
                Self(Probe::new())
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Add> for $name {
            async fn handle(&self, message: Add) -> Result<u64, GrainProcessingErr> {
                Ok(self.0.add(message.0))
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Checked> for $name {
            async fn handle(&self, message: Checked) -> Result<u64, GrainProcessingErr> {
                if message.0 == 0 {
                    return Err("zero is not accepted".into());
                }
                Ok(self.0.add(message.0))
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Identify> for $name {
            async fn handle(&self, _: Identify) -> Result<u64, GrainProcessingErr> {
                Ok(self.0.id)
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Slow> for $name {
            async fn handle(&self, _: Slow) -> Result<(), GrainProcessingErr> {
                self.0.slow().await;
                Ok(())
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Overlaps> for $name {
            async fn handle(&self, _: Overlaps) -> Result<u64, GrainProcessingErr> {
                Ok(self.0.overlaps.get())
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Fail> for $name {
            async fn handle(&self, _: Fail) -> Result<(), GrainProcessingErr> {
                Err("rejected".into())
            }
        }

        #[async_trait::async_trait(?Send)]
        impl Handler<Explode> for $name {
            async fn handle(&self, _: Explode) -> Result<(), GrainProcessingErr> {
                panic!("Boom!");
            }
        }
    };
}

probe_grain!(Counter, "counter", Placement::distributed());
probe_grain!(Serial, "serial", Placement::distributed().non_reentrant());
probe_grain!(Everywhere, "everywhere", Placement::local());
probe_grain!(
    Pair,
    "pair",
    Placement::local_bounded(NonZeroUsize::new(2).unwrap())
);

// ============ Remoting ============ //

#[derive(Debug, Default)]
struct RecordingNode {
    invocations: Mutex<Vec<Invocation>>,
    /// Reject every invocation with this failure
    failure: Option<RemoteFailure>,
}

impl RecordingNode {
    fn failing(kind: RemoteFailure) -> Self {
        Self {
            failure: Some(kind),
            ..Default::default()
        }
    }

    fn recorded(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteNode for RecordingNode {
    fn identity(&self) -> &str {
        "10.0.0.9:7000"
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Vec<u8>, GrainErr> {
        let packed = invocation.packed;
        self.invocations.lock().unwrap().push(invocation);
        if let Some(kind) = self.failure {
            return Err(GrainErr::Remote {
                node: self.identity().to_string(),
                kind,
                reason: "handler refused the message".to_string(),
            });
        }
        if packed {
            Ok(Vec::new())
        } else {
            Ok(42u64.into_bytes())
        }
    }
}

/// Routes every distributed grain to a single recording node
struct EverythingRemote {
    node: Arc<RecordingNode>,
}

impl Remoting for EverythingRemote {
    fn route(&self, _: &KeyDigest) -> Option<Arc<dyn RemoteNode>> {
        Some(self.node.clone())
    }
}

fn attach_recorder(system: &GrainSystem) -> Arc<RecordingNode> {
    attach_node(system, RecordingNode::default())
}

fn attach_node(system: &GrainSystem, node: RecordingNode) -> Arc<RecordingNode> {
    let node = Arc::new(node);
    assert!(system.attach_remoting(Arc::new(EverythingRemote { node: node.clone() })));
    node
}

// ============ Tests ============ //

#[crate::concurrency::test]
async fn test_same_identity_reaches_same_activation() {
    let system = start_system(4);

    let first = system.get::<Counter>(1).ask(Identify).await.unwrap();
    let second = system.get::<Counter>(1).ask(Identify).await.unwrap();
    let other = system.get::<Counter>(2).ask(Identify).await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first, other);
    assert_eq!(2, system.activation_count::<Counter>().await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_state_persists_between_dispatches() {
    let system = start_system(2);
    let counter = system.get::<Counter>(3);

    assert_eq!(2, counter.ask(Add(2)).await.unwrap());
    assert_eq!(5, counter.ask(Add(3)).await.unwrap());
    counter.tell(Add(1)).await.unwrap();
    assert_eq!(6, counter.clone().ask(Add(0)).await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_non_reentrant_grain_never_interleaves() {
    let system = start_system(2);

    let serial = system.get::<Serial>(7);
    join_all((0..8).map(|_| serial.ask(Slow))).await;
    assert_eq!(0, serial.ask(Overlaps).await.unwrap());

    let reentrant = system.get::<Counter>(7);
    join_all((0..8).map(|_| reentrant.ask(Slow))).await;
    assert!(reentrant.ask(Overlaps).await.unwrap() > 0);
    system.stop();
}

#[crate::concurrency::test]
async fn test_local_placement_spreads_over_every_shard() {
    let system = start_system(4);
    let grain = system.get::<Everywhere>(11);

    let mut seen = HashSet::new();
    for _ in 0..8 {
        seen.insert(grain.ask(Identify).await.unwrap());
    }
    assert_eq!(4, seen.len());
    assert_eq!(4, system.activation_count::<Everywhere>().await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_bounded_local_placement_caps_activations() {
    let system = start_system(4);
    let grain = system.get::<Pair>(12);

    let mut seen = HashSet::new();
    for _ in 0..10 {
        seen.insert(grain.ask(Identify).await.unwrap());
    }
    assert_eq!(2, seen.len());
    system.stop();
}

#[crate::concurrency::test]
async fn test_handler_failures_surface_to_caller() {
    let system = start_system(2);
    let counter = system.get::<Counter>(4);

    assert!(matches!(counter.ask(Fail).await, Err(GrainErr::Processing(_))));
    assert!(matches!(counter.tell(Explode).await, Err(GrainErr::Processing(_))));
    // the activation survives both
    assert_eq!(1, counter.ask(Add(1)).await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_non_reentrant_turn_released_after_failures() {
    let system = start_system(1);
    let serial = system.get::<Serial>(4);

    assert!(matches!(serial.ask(Fail).await, Err(GrainErr::Processing(_))));
    assert!(matches!(serial.tell(Explode).await, Err(GrainErr::Processing(_))));
    let next = serial.ask_t(Add(2), Duration::from_secs(1)).await;
    assert_eq!(2, next.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_clear_directory_forces_reactivation() {
    let system = start_system(2);
    let counter = system.get::<Counter>(5);

    let before = counter.ask(Identify).await.unwrap();
    system.clear_directory::<Counter>().await.unwrap();
    assert_eq!(0, system.activation_count::<Counter>().await.unwrap());
    let after = counter.ask(Identify).await.unwrap();
    assert_ne!(before, after);
    system.stop();
}

#[crate::concurrency::test]
async fn test_ask_with_timeout() {
    let system = start_system(1);
    let counter = system.get::<Counter>(6);

    let result = counter.ask_t(Slow, Duration::from_millis(1)).await;
    assert!(matches!(result, Err(GrainErr::Timeout)));
    assert_eq!(
        3,
        counter
            .ask_t(Add(3), Duration::from_millis(500))
            .await
            .unwrap()
    );
    system.stop();
}

#[crate::concurrency::test]
async fn test_stopped_system_rejects_dispatches() {
    let system = start_system(1);
    system.stop();
    // give the shard a moment to drain its command queue
    sleep(Duration::from_millis(20)).await;

    let result = system.get::<Counter>(1).ask(Add(1)).await;
    assert!(matches!(result, Err(GrainErr::Messaging(_))));
}

#[crate::concurrency::test]
async fn test_incoming_invocations_execute_locally() {
    let system = start_system(2);
    system
        .register::<Counter, Add>()
        .register::<Counter, Checked>();
    // routing everything away must not affect incoming invocations
    let node = attach_recorder(&system);

    let reply = system
        .invoke(Invocation {
            grain: "counter".to_string(),
            key: 5u64.into_bytes(),
            handler: "add".to_string(),
            args: vec![Add(4).into_bytes()],
            packed: false,
        })
        .await
        .unwrap();
    assert_eq!(4, u64::from_bytes(reply).unwrap());

    let reply = system
        .invoke(Invocation {
            grain: "counter".to_string(),
            key: 5u64.into_bytes(),
            handler: "checked".to_string(),
            args: vec![Checked(1).into_bytes(), Checked(2).into_bytes()],
            packed: true,
        })
        .await
        .unwrap();
    assert!(reply.is_empty());

    let reply = system
        .invoke(Invocation {
            grain: "counter".to_string(),
            key: 5u64.into_bytes(),
            handler: "add".to_string(),
            args: vec![Add(0).into_bytes()],
            packed: false,
        })
        .await
        .unwrap();
    assert_eq!(7, u64::from_bytes(reply).unwrap());
    assert!(node.recorded().is_empty());

    let unknown = system
        .invoke(Invocation {
            grain: "counter".to_string(),
            key: 5u64.into_bytes(),
            handler: "identify".to_string(),
            args: vec![Vec::new()],
            packed: false,
        })
        .await;
    assert!(matches!(unknown, Err(GrainErr::UnknownHandler { .. })));

    let malformed = system
        .invoke(Invocation {
            grain: "counter".to_string(),
            key: vec![1, 2],
            handler: "add".to_string(),
            args: vec![Add(0).into_bytes()],
            packed: false,
        })
        .await;
    assert!(matches!(malformed, Err(GrainErr::Serialization(_))));
    system.stop();
}

#[crate::concurrency::test]
async fn test_remoting_routes_distributed_grains_only() {
    let system = start_system(2);
    let node = attach_recorder(&system);
    assert!(!system.attach_remoting(Arc::new(EverythingRemote { node: node.clone() })));

    assert_eq!(42, system.get::<Counter>(3).ask(Add(1)).await.unwrap());
    let recorded = node.recorded();
    assert_eq!(
        vec![Invocation {
            grain: "counter".to_string(),
            key: 3u64.into_bytes(),
            handler: "add".to_string(),
            args: vec![1u64.into_bytes()],
            packed: false,
        }],
        recorded
    );
    assert_eq!(KeyDigest::of::<Counter>(&3), recorded[0].digest());

    // local grains never leave the node
    assert_eq!(1, system.get::<Everywhere>(3).ask(Add(1)).await.unwrap());
    assert_eq!(1, node.recorded().len());
    system.stop();
}

#[crate::concurrency::test]
async fn test_deduplicate_sends_one_packed_dispatch() {
    let system = start_system(2);
    let node = attach_recorder(&system);
    let counter = system.get::<Counter>(8);

    let collected = deduplicate(&counter, |batch| async move {
        for i in 0..5 {
            batch.collect(Add(i));
        }
        Ok(batch.len())
    })
    .await
    .unwrap();
    assert_eq!(5, collected);

    let recorded = node.recorded();
    assert_eq!(1, recorded.len());
    assert!(recorded[0].packed);
    assert_eq!(
        (0..5u64).map(|i| i.into_bytes()).collect::<Vec<_>>(),
        recorded[0].args
    );
    system.stop();
}

#[crate::concurrency::test]
async fn test_deduplicate_flushes_when_work_fails() {
    let system = start_system(2);
    let counter = system.get::<Counter>(9);

    let result: Result<(), GrainErr> = deduplicate(&counter, |batch| async move {
        batch.collect(Add(2));
        batch.collect(Add(3));
        Err("unit of work failed".into())
    })
    .await;
    assert!(matches!(result, Err(GrainErr::Processing(_))));
    assert_eq!(5, counter.ask(Add(0)).await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_empty_batches_send_nothing() {
    let system = start_system(1);
    let node = attach_recorder(&system);
    let counter = system.get::<Counter>(10);

    deduplicate(&counter, |_batch: crate::Collector<Add>| async move { Ok(()) })
        .await
        .unwrap();
    let batch: Deduplicator<Counter, Add> = counter.deduplicator();
    assert!(batch.is_empty());
    batch.execute().await.unwrap();
    counter.tell_packed::<Add>(Vec::new()).await.unwrap();

    assert!(node.recorded().is_empty());
    system.stop();
}

#[crate::concurrency::test]
async fn test_packed_delivery_stops_at_first_failure() {
    let system = start_system(2);
    let counter = system.get::<Counter>(13);

    let mut batch = counter.deduplicator::<Checked>();
    batch.collect(Checked(1));
    batch.collect(Checked(0));
    batch.collect(Checked(5));
    assert_eq!(3, batch.len());

    assert!(matches!(batch.execute().await, Err(GrainErr::Processing(_))));
    assert_eq!(1, counter.ask(Add(0)).await.unwrap());
    system.stop();
}

#[crate::concurrency::test]
async fn test_remote_failures_reach_the_caller() {
    let system = start_system(2);
    let node = attach_node(&system, RecordingNode::failing(RemoteFailure::Processing));
    let counter = system.get::<Counter>(21);

    for result in [
        counter.ask(Add(1)).await.map(|_| ()),
        counter.tell(Add(1)).await,
        counter.tell_packed(vec![Add(1), Add(2)]).await,
    ] {
        match result {
            Err(GrainErr::Remote { node, kind, reason }) => {
                assert_eq!("10.0.0.9:7000", node);
                assert_eq!(RemoteFailure::Processing, kind);
                assert_eq!("handler refused the message", reason);
            }
            other => panic!("Expected a remote failure, got {other:?}"),
        }
    }
    assert_eq!(3, node.recorded().len());

    // nothing ran locally in the meantime
    assert_eq!(0, system.activation_count::<Counter>().await.unwrap());
    system.stop();
}

#[test]
fn test_remote_failure_kinds() {
    let processing = GrainErr::Processing("boom".into());
    assert_eq!(RemoteFailure::Processing, processing.remote_failure());
    assert_eq!(
        RemoteFailure::UnknownHandler,
        GrainErr::UnknownHandler {
            grain: "counter".to_string(),
            handler: "add".to_string(),
        }
        .remote_failure()
    );
    assert_eq!(
        RemoteFailure::Serialization,
        GrainErr::from(SerializationErr::new("u64", "short read")).remote_failure()
    );
    assert_eq!(RemoteFailure::Other, GrainErr::Timeout.remote_failure());

    let remote = GrainErr::Remote {
        node: "10.0.0.9:7000".to_string(),
        kind: RemoteFailure::Unreachable,
        reason: "Connection closed".to_string(),
    };
    assert_eq!(RemoteFailure::Unreachable, remote.remote_failure());
    assert_eq!(
        "Remote node 10.0.0.9:7000 failed (unreachable): Connection closed",
        remote.to_string()
    );
}
