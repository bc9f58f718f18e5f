// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Message deduplication: coalescing the messages for one grain produced over
//! a unit of work into a single packed dispatch.
//!
//! ```rust
//! # use std::cell::Cell;
//! # use granary::{BytesConvertable, Grain, GrainProcessingErr, GrainSystem, Handler, Message, SerializationErr, SystemConfig};
//! # struct Counter { value: Cell<u64> }
//! # impl Grain for Counter {
//! #     type Key = u64;
//! #     const NAME: &'static str = "counter";
//! #     fn activate(_: &u64) -> Self { Self { value: Cell::new(0) } }
//! # }
//! # struct Add(u64);
//! # impl BytesConvertable for Add {
//! #     fn into_bytes(self) -> Vec<u8> { self.0.into_bytes() }
//! #     fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> { u64::from_bytes(bytes).map(Add) }
//! # }
//! # impl Message for Add { type Reply = u64; const HANDLER: &'static str = "add"; }
//! # #[async_trait::async_trait(?Send)]
//! # impl Handler<Add> for Counter {
//! #     async fn handle(&self, m: Add) -> Result<u64, GrainProcessingErr> {
//! #         self.value.set(self.value.get() + m.0);
//! #         Ok(self.value.get())
//! #     }
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let system = GrainSystem::new(SystemConfig::default().with_shards(2)).unwrap();
//! let counter = system.get::<Counter>(1);
//!
//! granary::deduplicate(&counter, |batch| async move {
//!     for i in 1..=3 {
//!         batch.collect(Add(i));
//!     }
//!     Ok(())
//! })
//! .await
//! .unwrap();
//!
//! assert_eq!(6, counter.ask(Add(0)).await.unwrap());
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use crate::{GrainErr, GrainProcessingErr, GrainRef, Handler, Message};

/// A batch of messages bound for one grain, delivered with one packed dispatch
pub struct Deduplicator<G, M>
where
    G: Handler<M>,
    M: Message,
{
    target: GrainRef<G>,
    packed: Vec<M>,
}

impl<G, M> Deduplicator<G, M>
where
    G: Handler<M>,
    M: Message,
{
    /// Start an empty batch for `target`
    pub fn new(target: GrainRef<G>) -> Self {
        Self {
            target,
            packed: Vec::new(),
        }
    }

    /// Append a message to the batch
    pub fn collect(&mut self, message: M) {
        self.packed.push(message);
    }

    /// Number of collected messages
    pub fn len(&self) -> usize {
        self.packed.len()
    }

    /// Determine if nothing has been collected
    pub fn is_empty(&self) -> bool {
        self.packed.is_empty()
    }

    /// Deliver the batch with [GrainRef::tell_packed]. An empty batch sends nothing
    pub async fn execute(self) -> Result<(), GrainErr> {
        if self.packed.is_empty() {
            return Ok(());
        }
        log::trace!(
            "Flushing {} '{}' messages to {:?}",
            self.packed.len(),
            M::HANDLER,
            self.target
        );
        self.target.tell_packed(self.packed).await
    }
}

/// A cloneable handle used to collect messages during a [deduplicate] unit of work
pub struct Collector<M> {
    batch: Arc<Mutex<Vec<M>>>,
}

impl<M> Clone for Collector<M> {
    fn clone(&self) -> Self {
        Self {
            batch: self.batch.clone(),
        }
    }
}

impl<M> Collector<M> {
    fn new() -> Self {
        Self {
            batch: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a message to the batch
    pub fn collect(&self, message: M) {
        self.batch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    /// Number of messages collected so far
    pub fn len(&self) -> usize {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Determine if nothing has been collected so far
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn drain(&self) -> Vec<M> {
        std::mem::take(&mut *self.batch.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Run `work` with a [Collector], then flush everything it collected to `target` as
/// one packed dispatch.
///
/// The flush happens whether or not `work` succeeds. If `work` fails its error is
/// returned (after the flush), otherwise the flush's outcome is.
pub async fn deduplicate<G, M, F, Fut, R>(target: &GrainRef<G>, work: F) -> Result<R, GrainErr>
where
    G: Handler<M>,
    M: Message,
    F: FnOnce(Collector<M>) -> Fut,
    Fut: Future<Output = Result<R, GrainProcessingErr>>,
{
    let collector = Collector::new();
    let outcome = work(collector.clone()).await;

    let mut batch = Deduplicator::new(target.clone());
    for message in collector.drain() {
        batch.collect(message);
    }
    let flushed = batch.execute().await;

    let value = outcome.map_err(GrainErr::Processing)?;
    flushed?;
    Ok(value)
}
