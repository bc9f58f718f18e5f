// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The [GrainSystem]: a node's shards, handler registry, and optional remoting.

use std::any::TypeId;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use once_cell::sync::OnceCell;

use crate::dispatch::DispatchTable;
use crate::hash::KeyDigest;
use crate::placement::Slot;
use crate::remote::{Invocation, Remoting};
use crate::shard::{ShardContext, ShardSet};
use crate::{Grain, GrainErr, GrainRef, Handler, Message, MessagingErr, ShardErr};

/// Configuration of a [GrainSystem]
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Number of shards (executor threads). Defaults to the available parallelism
    pub shards: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            shards: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl SystemConfig {
    /// Set the number of shards. At least one shard is always started
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards.max(1);
        self
    }
}

struct SystemInner {
    shards: ShardSet,
    dispatch: DispatchTable,
    remoting: OnceCell<Arc<dyn Remoting>>,
    // round-robin counters for dispatches issued from outside any shard
    external_round_robin: DashMap<TypeId, usize>,
}

/// A node's grain runtime. Cheap to clone
#[derive(Clone)]
pub struct GrainSystem {
    inner: Arc<SystemInner>,
}

impl std::fmt::Debug for GrainSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrainSystem")
            .field("shards", &self.inner.shards.len())
            .field("handlers", &self.inner.dispatch.len())
            .field("remoting", &self.inner.remoting.get().is_some())
            .finish()
    }
}

impl GrainSystem {
    /// Start a system, spawning its shard threads
    pub fn new(config: SystemConfig) -> Result<Self, ShardErr> {
        let shards = ShardSet::new(config.shards)?;
        log::info!("Grain system started with {} shards", shards.len());
        Ok(Self {
            inner: Arc::new(SystemInner {
                shards,
                dispatch: DispatchTable::default(),
                remoting: OnceCell::new(),
                external_round_robin: DashMap::new(),
            }),
        })
    }

    /// A reference to the grain of type `G` identified by `key`. Nothing is
    /// activated until a message is dispatched
    pub fn get<G: Grain>(&self, key: G::Key) -> GrainRef<G> {
        GrainRef::new(self.clone(), key)
    }

    /// Register the handler of `M` on `G` so that invocations arriving from other
    /// nodes can be executed here
    pub fn register<G, M>(&self) -> &Self
    where
        G: Handler<M>,
        M: Message,
    {
        self.inner.dispatch.register::<G, M>();
        self
    }

    /// Attach the cluster routing. Only one remoting may be attached for the
    /// lifetime of the system
    ///
    /// Returns [true] if attached, [false] if a remoting was already present
    pub fn attach_remoting(&self, remoting: Arc<dyn Remoting>) -> bool {
        self.inner.remoting.set(remoting).is_ok()
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Execute an invocation received from another node. The dispatch always runs
    /// on this node regardless of ring ownership
    pub async fn invoke(&self, invocation: Invocation) -> Result<Vec<u8>, GrainErr> {
        self.inner.dispatch.invoke(self, invocation).await
    }

    /// Drop every activation of `G` on every shard
    pub async fn clear_directory<G: Grain>(&self) -> Result<(), MessagingErr> {
        for shard in 0..self.shard_count() {
            self.inner
                .shards
                .run(shard, |context| {
                    async move { context.clear_directory::<G>() }.boxed_local()
                })
                .await?;
        }
        Ok(())
    }

    /// Number of live activations of `G` across every shard
    pub async fn activation_count<G: Grain>(&self) -> Result<usize, MessagingErr> {
        let mut total = 0;
        for shard in 0..self.shard_count() {
            total += self
                .inner
                .shards
                .run(shard, |context| {
                    async move { context.activation_count::<G>() }.boxed_local()
                })
                .await?;
        }
        Ok(total)
    }

    /// Stop the shards. In-flight work finishes, new dispatches fail with
    /// [MessagingErr::SendErr]
    pub fn stop(&self) {
        log::info!("Stopping grain system");
        self.inner.shards.stop();
    }

    pub(crate) fn shards(&self) -> &ShardSet {
        &self.inner.shards
    }

    pub(crate) fn remoting(&self) -> Option<&Arc<dyn Remoting>> {
        self.inner.remoting.get()
    }

    /// Pick the local shard and slot for a dispatch of `G`
    pub(crate) fn place<G: Grain>(&self, digest: &KeyDigest) -> Slot {
        let placement = G::placement();
        let shards = self.shard_count();
        let counter = if placement.is_local() {
            let slots = placement.slot_count(shards);
            match ShardContext::current() {
                Some(context) => context.next_round_robin::<G>(slots),
                None => self.next_external_round_robin::<G>(slots),
            }
        } else {
            0
        };
        placement.select(digest, counter, shards)
    }

    fn next_external_round_robin<G: 'static>(&self, slots: usize) -> usize {
        let mut counter = self
            .inner
            .external_round_robin
            .entry(TypeId::of::<G>())
            .or_insert(0);
        let current = *counter % slots.max(1);
        *counter = (current + 1) % slots.max(1);
        current
    }
}
