// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! A consistent-hash ring over node identities.
//!
//! Each member is placed on the ring at several virtual points, derived only from
//! its identity, so any two nodes holding the same member set compute the same
//! owner for every key. A key is owned by the first point at or after its hash,
//! wrapping around at the end of the ring.

use std::collections::{BTreeSet, HashSet};

use granary::hash::digest64;

use crate::NodeIdentity;

/// Default number of virtual points per member
pub const DEFAULT_VIRTUAL_NODES: usize = 64;

/// A consistent-hash ring
#[derive(Debug, Clone)]
pub struct HashRing {
    virtual_nodes: usize,
    // ordered by (point, identity) so that point collisions resolve identically everywhere
    points: BTreeSet<(u64, NodeIdentity)>,
    members: HashSet<NodeIdentity>,
}

impl Default for HashRing {
    fn default() -> Self {
        Self::new(DEFAULT_VIRTUAL_NODES)
    }
}

impl HashRing {
    /// Create an empty ring placing each member at `virtual_nodes` points (at least one)
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            points: BTreeSet::new(),
            members: HashSet::new(),
        }
    }

    fn point(identity: &NodeIdentity, replica: usize) -> u64 {
        digest64(&[
            identity.as_str().as_bytes(),
            &(replica as u64).to_be_bytes()[..],
        ])
    }

    /// Add a member
    ///
    /// Returns [false] if it was already present
    pub fn add(&mut self, identity: NodeIdentity) -> bool {
        if !self.members.insert(identity.clone()) {
            return false;
        }
        for replica in 0..self.virtual_nodes {
            self.points
                .insert((Self::point(&identity, replica), identity.clone()));
        }
        true
    }

    /// Remove a member
    ///
    /// Returns [false] if it wasn't present
    pub fn remove(&mut self, identity: &NodeIdentity) -> bool {
        if !self.members.remove(identity) {
            return false;
        }
        for replica in 0..self.virtual_nodes {
            self.points
                .remove(&(Self::point(identity, replica), identity.clone()));
        }
        true
    }

    /// The member owning `hash`, or [None] if the ring is empty
    pub fn owner(&self, hash: u64) -> Option<&NodeIdentity> {
        self.points
            .range((hash, NodeIdentity::default())..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(|(_, identity)| identity)
    }

    /// Determine if `identity` is a member
    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.members.contains(identity)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Determine if the ring has no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// The members, in no particular order
    pub fn members(&self) -> impl Iterator<Item = &NodeIdentity> {
        self.members.iter()
    }
}
