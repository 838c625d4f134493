//! Filter policies for skipping data-block reads.
//!
//! A table built with a filter policy stores one filter per 2 KiB window of
//! data; a point read consults the filter before touching the data block,
//! so an "absent" verdict saves a disk read. The bloom policy is the only
//! one shipped; anything implementing [`FilterPolicy`] plugs in the same
//! way.

use std::sync::Arc;

use crate::util::hash::hash;

pub trait FilterPolicy: Send + Sync {
    /// Name of this policy, embedded in the table's metaindex so a reader
    /// can tell whether the stored filters are usable.
    fn name(&self) -> &'static str;

    /// Appends a filter summarizing `keys` to `dst`.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true if `key` was in the set the filter was built from.
    /// May return true for keys that were not (false positive).
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

fn bloom_hash(key: &[u8]) -> u32 {
    hash(key, 0xbc9f1d34)
}

/// Standard bloom filter: `k` probe positions derived from a single hash by
/// double hashing, `k` stored in the trailing byte of the filter.
pub struct BloomFilterPolicy {
    bits_per_key: usize,
    k: usize,
}

impl BloomFilterPolicy {
    pub fn new(bits_per_key: usize) -> Self {
        // k = bits_per_key * ln(2), clamped.
        let k = ((bits_per_key as f64) * 0.69) as usize;
        BloomFilterPolicy {
            bits_per_key,
            k: k.clamp(1, 30),
        }
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "cinderdb.BuiltinBloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let mut bits = keys.len() * self.bits_per_key;
        // Small filters have too high a false-positive rate; floor at 64
        // bits.
        if bits < 64 {
            bits = 64;
        }
        let bytes = (bits + 7) / 8;
        let bits = bytes * 8;

        let init_size = dst.len();
        dst.resize(init_size + bytes, 0);
        dst.push(self.k as u8);

        let array = &mut dst[init_size..init_size + bytes];
        for key in keys {
            let mut h = bloom_hash(key);
            let delta = h.rotate_right(17);
            for _ in 0..self.k {
                let bitpos = (h % bits as u32) as usize;
                array[bitpos / 8] |= 1 << (bitpos % 8);
                h = h.wrapping_add(delta);
            }
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        let len = filter.len();
        if len < 2 {
            return false;
        }
        let array = &filter[..len - 1];
        let bits = array.len() * 8;

        let k = filter[len - 1] as usize;
        if k > 30 {
            // Reserved for future encodings; treat as a match.
            return true;
        }

        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        for _ in 0..k {
            let bitpos = (h % bits as u32) as usize;
            if array[bitpos / 8] & (1 << (bitpos % 8)) == 0 {
                return false;
            }
            h = h.wrapping_add(delta);
        }
        true
    }
}

/// Shared handle used in options.
pub type FilterPolicyRef = Arc<dyn FilterPolicy>;

#[cfg(test)]
mod tests {
    use super::*;

    fn build(policy: &BloomFilterPolicy, keys: &[Vec<u8>]) -> Vec<u8> {
        let refs: Vec<&[u8]> = keys.iter().map(|k| k.as_slice()).collect();
        let mut filter = Vec::new();
        policy.create_filter(&refs, &mut filter);
        filter
    }

    fn key_of(i: u32) -> Vec<u8> {
        i.to_le_bytes().to_vec()
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        let policy = BloomFilterPolicy::new(10);
        assert!(!policy.key_may_match(b"hello", &[]));
        assert!(!policy.key_may_match(b"hello", &[0]));
    }

    #[test]
    fn test_small() {
        let policy = BloomFilterPolicy::new(10);
        let filter = build(&policy, &[b"hello".to_vec(), b"world".to_vec()]);
        assert!(policy.key_may_match(b"hello", &filter));
        assert!(policy.key_may_match(b"world", &filter));
        assert!(!policy.key_may_match(b"x", &filter));
        assert!(!policy.key_may_match(b"foo", &filter));
    }

    #[test]
    fn test_no_false_negatives() {
        let policy = BloomFilterPolicy::new(10);
        for len in [1usize, 10, 100, 1000] {
            let keys: Vec<Vec<u8>> = (0..len as u32).map(key_of).collect();
            let filter = build(&policy, &keys);
            for key in &keys {
                assert!(
                    policy.key_may_match(key, &filter),
                    "false negative at set size {len}"
                );
            }
        }
    }

    fn false_positive_rate(policy: &BloomFilterPolicy, n: u32) -> f64 {
        let keys: Vec<Vec<u8>> = (0..n).map(key_of).collect();
        let filter = build(policy, &keys);
        let mut hits = 0;
        for i in 0..10000u32 {
            if policy.key_may_match(&key_of(i + 1_000_000_000), &filter) {
                hits += 1;
            }
        }
        hits as f64 / 10000.0
    }

    #[test]
    fn test_false_positive_rate_decreases_with_bits() {
        let sparse = false_positive_rate(&BloomFilterPolicy::new(16), 5000);
        let dense = false_positive_rate(&BloomFilterPolicy::new(4), 5000);
        assert!(sparse < dense, "sparse {sparse} vs dense {dense}");
        assert!(sparse < 0.02, "16 bits/key should be well under 2%: {sparse}");
    }

    #[test]
    fn test_k_clamped() {
        assert_eq!(BloomFilterPolicy::new(0).k, 1);
        assert_eq!(BloomFilterPolicy::new(10).k, 6);
        assert_eq!(BloomFilterPolicy::new(100).k, 30);
    }
}
