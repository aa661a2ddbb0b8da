//! Sharded addressing of index rows.
//!
//! The index writer spreads every logical index key across `num_shards`
//! physical shards by prepending a fixed-width, zero-padded ASCII decimal
//! prefix, so that hot values do not pile up on a single tablet server. The
//! shard of a stored entry is derived from a hash of the encoded bytes and
//! is therefore not recoverable from the value alone: readers fan every
//! lookup out across all shards.

use crate::error::{PlanError, Result};
use crate::types::{ByteRange, RangeBound};

/// Codec that prepends a zero-padded shard number to index keys.
///
/// Equality and hashing depend only on the shard count.
#[derive(Debug, Clone)]
pub struct ShardedIndexStorage {
    num_shards: u32,
    /// Width of the shard prefix: the number of decimal digits needed to
    /// print `num_shards - 1`.
    prefix_width: usize,
}

impl ShardedIndexStorage {
    pub fn new(num_shards: u32) -> Result<Self> {
        if num_shards <= 1 {
            return Err(PlanError::InvalidConfig(format!(
                "number of shards must be greater than one, got {}",
                num_shards
            )));
        }
        Ok(Self {
            num_shards,
            prefix_width: (num_shards - 1).to_string().len(),
        })
    }

    pub fn num_shards(&self) -> u32 {
        self.num_shards
    }

    pub fn prefix_width(&self) -> usize {
        self.prefix_width
    }

    /// Stable 32-bit hash of a byte array, matching the index writer's
    /// polynomial accumulation (h = 31 * h + b over signed bytes).
    fn hash(bytes: &[u8]) -> i32 {
        let mut h: i32 = 1;
        for &b in bytes {
            h = h.wrapping_mul(31).wrapping_add(b as i8 as i32);
        }
        h
    }

    fn shard_of(&self, bytes: &[u8]) -> u32 {
        // abs(i32::MIN) overflows; fold it to the zero shard.
        let h = Self::hash(bytes).checked_abs().unwrap_or(0);
        h as u32 % self.num_shards
    }

    /// Zero-padded ASCII decimal prefix for one shard.
    pub fn shard_prefix(&self, shard: u32) -> Vec<u8> {
        format!("{:0width$}", shard, width = self.prefix_width).into_bytes()
    }

    /// Prepends the shard prefix derived from the hash of `bytes`.
    pub fn encode(&self, bytes: &[u8]) -> Vec<u8> {
        let mut encoded = self.shard_prefix(self.shard_of(bytes));
        encoded.extend_from_slice(bytes);
        encoded
    }

    /// Strips the shard prefix.
    pub fn decode<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        &bytes[self.prefix_width..]
    }

    /// All `num_shards` prefixed forms of `bytes`, in shard order.
    pub fn encode_all_shards(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        (0..self.num_shards)
            .map(|shard| {
                let mut encoded = self.shard_prefix(shard);
                encoded.extend_from_slice(bytes);
                encoded
            })
            .collect()
    }

    /// Expands one logical index range into its physical per-shard ranges.
    ///
    /// A point lookup becomes one exact range per shard-prefixed form of the
    /// key. A general range is re-anchored inside each shard's keyspace: an
    /// unbounded low bound becomes the bare shard prefix, an unbounded high
    /// bound becomes the successor of the prefix (exclusive), so the
    /// expansion never leaks into a neighboring shard.
    pub fn expand_range(&self, range: &ByteRange) -> Vec<ByteRange> {
        if let Some(key) = range.exact_key() {
            return self
                .encode_all_shards(key)
                .into_iter()
                .map(ByteRange::exact)
                .collect();
        }

        (0..self.num_shards)
            .map(|shard| {
                let prefix = self.shard_prefix(shard);
                let start = match range.start() {
                    RangeBound::Unbounded => RangeBound::Inclusive(prefix.clone()),
                    RangeBound::Inclusive(key) => RangeBound::Inclusive(prefixed(&prefix, key)),
                    RangeBound::Exclusive(key) => RangeBound::Exclusive(prefixed(&prefix, key)),
                };
                let end = match range.end() {
                    RangeBound::Unbounded => RangeBound::Exclusive(prefix_successor(&prefix)),
                    RangeBound::Inclusive(key) => RangeBound::Inclusive(prefixed(&prefix, key)),
                    RangeBound::Exclusive(key) => RangeBound::Exclusive(prefixed(&prefix, key)),
                };
                ByteRange::new(start, end)
            })
            .collect()
    }

    /// [`ShardedIndexStorage::expand_range`] over a list of logical ranges,
    /// preserving input order (all shards of range 0, then range 1, ...).
    pub fn expand_ranges(&self, ranges: &[ByteRange]) -> Vec<ByteRange> {
        ranges
            .iter()
            .flat_map(|range| self.expand_range(range))
            .collect()
    }
}

impl PartialEq for ShardedIndexStorage {
    fn eq(&self, other: &Self) -> bool {
        self.num_shards == other.num_shards
    }
}

impl Eq for ShardedIndexStorage {}

impl std::hash::Hash for ShardedIndexStorage {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.num_shards.hash(state);
    }
}

fn prefixed(prefix: &[u8], key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(prefix.len() + key.len());
    out.extend_from_slice(prefix);
    out.extend_from_slice(key);
    out
}

/// Smallest byte string strictly greater than every string starting with
/// `prefix`. Shard prefixes are ASCII digits, so bumping the last byte never
/// overflows.
fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut succ = prefix.to_vec();
    let last = succ.last_mut().expect("shard prefix is never empty");
    *last += 1;
    succ
}
