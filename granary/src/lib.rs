// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! `granary`: A sharded virtual-actor ("grain") runtime for Rust.
//!
//! ## Installation
//!
//! Install `granary` by adding the following to your Cargo.toml dependencies
//!
//! ```toml
//! [dependencies]
//! granary = "0.1"
//! ```
//!
//! ## Getting started
//!
//! Grains are addressed by type and key and are activated on demand. Callers never
//! create or destroy them; they obtain a [GrainRef] from a [GrainSystem] and
//! dispatch messages to it. The runtime guarantees that for a given identity every
//! message reaches the same activation, on the shard (thread) that owns it.
//!
//! See [grain] for a complete grain definition. Using it looks like
//!
//! ```rust,ignore
//! let system = GrainSystem::new(SystemConfig::default())?;
//! system.register::<Counter, Increment>();
//!
//! let counter = system.get::<Counter>("visits".to_string());
//! let total = counter.ask(Increment(1)).await?;
//! ```
//!
//! ## Placement
//!
//! Each grain type declares a [Placement]. Distributed grains have one activation
//! per cluster located by a consistent hash of their key; local grains stay on the
//! calling node and spread their activations over the node's shards. Either may be
//! made non-reentrant so an activation handles one message at a time.
//!
//! ## Clustering
//!
//! On its own a [GrainSystem] executes everything locally. The `granary_cluster`
//! crate attaches a [remote::Remoting] implementation which routes distributed
//! grains to the node owning them.

#![warn(unused_imports)]
#![warn(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod concurrency;
mod deduplicate;
pub mod directory;
mod dispatch;
pub mod errors;
pub mod grain;
pub mod hash;
pub mod placement;
pub mod port;
mod reference;
pub mod remote;
pub mod serialization;
pub mod shard;
mod system;

#[cfg(test)]
mod tests;

// re-exports
pub use deduplicate::{deduplicate, Collector, Deduplicator};
pub use errors::{
    GrainErr, GrainProcessingErr, MessagingErr, RemoteFailure, SerializationErr, ShardErr,
};
pub use grain::{Grain, GrainKey, Handler, Message};
pub use placement::Placement;
pub use port::RpcReplyPort;
pub use reference::GrainRef;
pub use serialization::BytesConvertable;
pub use system::{GrainSystem, SystemConfig};

pub use async_trait::async_trait;
