// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Stable key hashing. Every node must agree on where a key lives, so
//! digests are computed with SHA-256 over the key's serialized bytes rather
//! than with a process-seeded hasher.

use sha2::{Digest, Sha256};

use crate::{BytesConvertable, Grain};

/// Hash a series of byte slices into a stable 64-bit value
pub fn digest64(parts: &[&[u8]]) -> u64 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Bound a hash into a finite space
pub fn hash_with_max(hash: u64, excluded_max: usize) -> usize {
    (hash % (excluded_max.max(1) as u64)) as usize
}

/// The stable digest of a grain identity
///
/// `ring` places the key on the cluster's hash ring, `shard` picks the
/// owning shard on whichever node owns it. The two are derived from
/// different bytes of the digest so that a node's share of keys still
/// spreads evenly over its shards.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct KeyDigest {
    /// Position on the hash ring
    pub ring: u64,
    /// Input to shard selection
    pub shard: u64,
}

impl KeyDigest {
    /// Digest of a grain type's key
    pub fn of<G: Grain>(key: &G::Key) -> Self {
        Self::from_parts(G::NAME, &key.clone().into_bytes())
    }

    /// Digest of a grain type name and its serialized key
    pub fn from_parts(grain: &str, key: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((grain.len() as u64).to_be_bytes());
        hasher.update(grain.as_bytes());
        hasher.update(key);
        let digest = hasher.finalize();

        let mut ring = [0u8; 8];
        ring.copy_from_slice(&digest[..8]);
        let mut shard = [0u8; 8];
        shard.copy_from_slice(&digest[8..16]);
        Self {
            ring: u64::from_be_bytes(ring),
            shard: u64::from_be_bytes(shard),
        }
    }

    /// The shard owning this key within a set of `shards`
    pub fn shard_of(&self, shards: usize) -> usize {
        hash_with_max(self.shard, shards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_hashing() {
        let test_values = [0u64, 10, 23, 128, u64::MAX];
        let test_results = [0usize, 1, 2, 2, 0];

        for (test_value, test_result) in test_values.iter().zip(test_results) {
            assert_eq!(test_result, hash_with_max(*test_value, 3));
        }
        assert_eq!(0, hash_with_max(17, 0));
    }

    #[test]
    fn digests_are_stable_and_type_scoped() {
        let a = KeyDigest::from_parts("counter", &7u64.into_bytes());
        let b = KeyDigest::from_parts("counter", &7u64.into_bytes());
        let c = KeyDigest::from_parts("account", &7u64.into_bytes());
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.shard_of(4) < 4);
    }

    #[test]
    fn name_and_key_boundaries_do_not_collide() {
        let a = KeyDigest::from_parts("ab", b"c");
        let b = KeyDigest::from_parts("a", b"bc");
        assert_ne!(a, b);
        assert_ne!(
            digest64(&[&b"ab"[..], &b"c"[..]]),
            digest64(&[&b"a"[..], &b"bc"[..]])
        );
    }

    #[test]
    fn random_keys_cover_every_shard() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut hits = [0usize; 4];
        for _ in 0..1000 {
            let key: u64 = rng.gen();
            hits[KeyDigest::from_parts("counter", &key.into_bytes()).shard_of(4)] += 1;
        }
        assert!(hits.iter().all(|count| *count > 0), "{hits:?}");
    }
}
