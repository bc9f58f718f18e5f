// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Placement policies decide which node, shard, and activation slot serve a dispatch.
//!
//! * [Placement::distributed] grains have exactly one activation in the cluster,
//!   located by consistent hashing of the key.
//! * [Placement::local] grains never leave the calling node. Each key may have up to
//!   `max_activations` independent activations (by default one per shard), and
//!   successive dispatches rotate over them round-robin.
//!
//! Either policy may additionally be made [Placement::non_reentrant], meaning an
//! activation processes at most one message at a time.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use crate::hash::KeyDigest;

/// Where a grain's activations may live
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Locality {
    /// One activation cluster-wide, owned by the key's ring owner
    Distributed,
    /// Activations on the calling node only
    Local {
        /// Upper bound on activations per key. [None] means one per shard
        max_activations: Option<NonZeroUsize>,
    },
}

/// A grain type's placement policy
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Placement {
    locality: Locality,
    reentrant: bool,
}

impl Default for Placement {
    fn default() -> Self {
        Self::distributed()
    }
}

impl Placement {
    /// A single cluster-wide activation per key
    pub const fn distributed() -> Self {
        Self {
            locality: Locality::Distributed,
            reentrant: true,
        }
    }

    /// Node-local activations, one per shard per key
    pub const fn local() -> Self {
        Self {
            locality: Locality::Local {
                max_activations: None,
            },
            reentrant: true,
        }
    }

    /// Node-local activations, at most `max_activations` per key
    pub const fn local_bounded(max_activations: NonZeroUsize) -> Self {
        Self {
            locality: Locality::Local {
                max_activations: Some(max_activations),
            },
            reentrant: true,
        }
    }

    /// Serialize message handling within each activation
    pub const fn non_reentrant(mut self) -> Self {
        self.reentrant = false;
        self
    }

    /// The locality of this placement
    pub fn locality(&self) -> Locality {
        self.locality
    }

    /// Determine if dispatches stay on the calling node
    pub fn is_local(&self) -> bool {
        matches!(self.locality, Locality::Local { .. })
    }

    /// Determine if an activation may interleave message handling
    pub fn is_reentrant(&self) -> bool {
        self.reentrant
    }

    /// Number of activation slots per key on a node with `shards` shards
    pub fn slot_count(&self, shards: usize) -> usize {
        match self.locality {
            Locality::Distributed => 1,
            Locality::Local {
                max_activations: Some(max),
            } => max.get(),
            Locality::Local {
                max_activations: None,
            } => shards.max(1),
        }
    }

    /// Choose the shard and slot for a dispatch. `counter` is the round-robin
    /// value and is ignored for distributed grains
    pub fn select(&self, digest: &KeyDigest, counter: usize, shards: usize) -> Slot {
        let shards = shards.max(1);
        let slot = counter % self.slot_count(shards);
        Slot {
            shard: (digest.shard_of(shards) + slot) % shards,
            slot,
        }
    }
}

/// The target of one dispatch on the local node
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Slot {
    /// Executing shard
    pub shard: usize,
    /// Activation slot for the key
    pub slot: usize,
}

/// Round-robin counters, one per grain type
#[derive(Debug, Default)]
pub(crate) struct RoundRobin {
    counters: RefCell<HashMap<TypeId, usize>>,
}

impl RoundRobin {
    /// Read the counter for `G` and advance it modulo `slots`
    pub(crate) fn next<G: 'static>(&self, slots: usize) -> usize {
        let mut counters = self.counters.borrow_mut();
        let counter = counters.entry(TypeId::of::<G>()).or_insert(0);
        let current = *counter % slots.max(1);
        *counter = (current + 1) % slots.max(1);
        current
    }
}
