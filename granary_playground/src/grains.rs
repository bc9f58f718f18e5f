// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Grains driven by the playground scenarios

use std::cell::Cell;
use std::num::NonZeroUsize;

use granary::shard::ShardContext;
use granary::{
    BytesConvertable, Grain, GrainProcessingErr, GrainSystem, Handler, Message, Placement,
    SerializationErr,
};

/// Add to a counter, replying with the new total
pub(crate) struct Increment(pub(crate) u64);

impl BytesConvertable for Increment {
    fn into_bytes(self) -> Vec<u8> {
        self.0.into_bytes()
    }
    fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
        u64::from_bytes(bytes).map(Increment)
    }
}

impl Message for Increment {
    type Reply = u64;
    const HANDLER: &'static str = "increment";
}

/// Report where the activation lives, as `(shard, activation number)`
pub(crate) struct Locate;

impl BytesConvertable for Locate {
    fn into_bytes(self) -> Vec<u8> {
        Vec::new()
    }
    fn from_bytes(_: Vec<u8>) -> Result<Self, SerializationErr> {
        Ok(Locate)
    }
}

impl Message for Locate {
    type Reply = (u64, u64);
    const HANDLER: &'static str = "locate";
}

thread_local! {
    static ACTIVATIONS: Cell<u64> = Cell::new(0);
}

fn next_activation() -> u64 {
    ACTIVATIONS.with(|count| {
        count.set(count.get() + 1);
        count.get()
    })
}

fn current_shard() -> u64 {
    ShardContext::current()
        .map(|context| context.id() as u64)
        .unwrap_or_default()
}

/// A counter living on whichever node owns its key
pub(crate) struct Counter {
    total: Cell<u64>,
    activation: u64,
}

impl Grain for Counter {
    type Key = u64;
    const NAME: &'static str = "counter";

    fn activate(key: &u64) -> Self {
        log::debug!("Activating counter {key} on shard {}", current_shard());
        Self {
            total: Cell::new(0),
            activation: next_activation(),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Increment> for Counter {
    async fn handle(&self, message: Increment) -> Result<u64, GrainProcessingErr> {
        self.total.set(self.total.get() + message.0);
        Ok(self.total.get())
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Locate> for Counter {
    async fn handle(&self, _: Locate) -> Result<(u64, u64), GrainProcessingErr> {
        Ok((current_shard(), self.activation))
    }
}

/// A counter that never leaves the calling node, with at most two activations
/// per key taking turns
pub(crate) struct Scratch {
    total: Cell<u64>,
    activation: u64,
}

impl Grain for Scratch {
    type Key = String;
    const NAME: &'static str = "scratch";

    fn placement() -> Placement {
        match NonZeroUsize::new(2) {
            Some(max) => Placement::local_bounded(max).non_reentrant(),
            None => Placement::local().non_reentrant(),
        }
    }

    fn activate(_key: &String) -> Self {
        Self {
            total: Cell::new(0),
            activation: next_activation(),
        }
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Increment> for Scratch {
    async fn handle(&self, message: Increment) -> Result<u64, GrainProcessingErr> {
        self.total.set(self.total.get() + message.0);
        Ok(self.total.get())
    }
}

#[async_trait::async_trait(?Send)]
impl Handler<Locate> for Scratch {
    async fn handle(&self, _: Locate) -> Result<(u64, u64), GrainProcessingErr> {
        Ok((current_shard(), self.activation))
    }
}

/// Register every handler which may be invoked by a peer
pub(crate) fn register(system: &GrainSystem) {
    system
        .register::<Counter, Increment>()
        .register::<Counter, Locate>();
}
