// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! The grain, message, and handler traits.
//!
//! A grain is a virtual actor addressed by its type and a key. It is never
//! constructed by the caller; the runtime activates it on first use with
//! [Grain::activate] on the shard which owns it, and every later message for
//! the same identity reaches that same instance.
//!
//! ```rust
//! use std::cell::Cell;
//! use granary::{BytesConvertable, Grain, GrainProcessingErr, Handler, Message, SerializationErr};
//!
//! struct Counter {
//!     value: Cell<u64>,
//! }
//!
//! impl Grain for Counter {
//!     type Key = String;
//!     const NAME: &'static str = "counter";
//!
//!     fn activate(_key: &String) -> Self {
//!         Self { value: Cell::new(0) }
//!     }
//! }
//!
//! struct Increment(u64);
//!
//! impl BytesConvertable for Increment {
//!     fn into_bytes(self) -> Vec<u8> {
//!         self.0.into_bytes()
//!     }
//!     fn from_bytes(bytes: Vec<u8>) -> Result<Self, SerializationErr> {
//!         u64::from_bytes(bytes).map(Increment)
//!     }
//! }
//!
//! impl Message for Increment {
//!     type Reply = u64;
//!     const HANDLER: &'static str = "increment";
//! }
//!
//! #[async_trait::async_trait(?Send)]
//! impl Handler<Increment> for Counter {
//!     async fn handle(&self, message: Increment) -> Result<u64, GrainProcessingErr> {
//!         self.value.set(self.value.get() + message.0);
//!         Ok(self.value.get())
//!     }
//! }
//! ```

use std::fmt::Debug;
use std::hash::Hash;

use crate::{BytesConvertable, GrainProcessingErr, Placement};

/// A grain key. Must be serializable so the key can be hashed stably and shipped to
/// the owning node
pub trait GrainKey: Clone + Eq + Hash + Debug + Send + Sync + BytesConvertable + 'static {}
impl<T: Clone + Eq + Hash + Debug + Send + Sync + BytesConvertable + 'static> GrainKey for T {}

/// A virtual actor type
pub trait Grain: Sized + 'static {
    /// The key identifying an instance of this grain type
    type Key: GrainKey;

    /// A cluster-wide unique name for this grain type. Used to address the type
    /// across nodes, so it must be identical on every node
    const NAME: &'static str;

    /// The placement policy of this grain type
    fn placement() -> Placement {
        Placement::distributed()
    }

    /// Construct an activation for `key`. Called on the owning shard at first use
    fn activate(key: &Self::Key) -> Self;
}

/// A message which can be delivered to a grain
pub trait Message: BytesConvertable + Send + 'static {
    /// The reply type produced by handling this message
    type Reply: BytesConvertable + Send + 'static;

    /// The handler identifier. Together with [Grain::NAME] it addresses the handler
    /// on a remote node
    const HANDLER: &'static str;
}

/// Handling of message `M` by a grain.
///
/// Handlers run on the shard owning the activation and may hold `!Send` state,
/// which is why activations are accessed through `&self`. Use interior
/// mutability ([std::cell::Cell], [std::cell::RefCell]) for grain state.
#[async_trait::async_trait(?Send)]
pub trait Handler<M: Message>: Grain {
    /// Handle the message, producing its reply
    async fn handle(&self, message: M) -> Result<M::Reply, GrainProcessingErr>;
}
