//! Bloom filter published next to each remote object.
//!
//! Built by the compute side over the user keys of one output table and
//! uploaded as `bloom<7 digits>.ldb`, so a reader can skip a remote point
//! lookup for keys the object cannot contain.
//!
//! Encoding: `[bits: variable][num_probes: u8]`, the LevelDB filter layout.

use crate::error::{Error, Result};
use crate::filter::Filter;

/// Probe counts above this are reserved for future encodings.
const MAX_PROBES: u8 = 30;

/// Bloom filter over a fixed set of keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u8>,
    num_probes: u8,
}

impl BloomFilter {
    /// Creates an empty filter sized for `num_keys` keys.
    pub fn with_bits_per_key(num_keys: usize, bits_per_key: usize) -> Self {
        // k = bits_per_key * ln(2), rounded down and clamped
        let num_probes = ((bits_per_key as f64) * 0.69) as u8;
        let num_probes = num_probes.clamp(1, MAX_PROBES);

        let num_bits = (num_keys * bits_per_key).max(64);
        let num_bytes = num_bits.div_ceil(8);
        Self { bits: vec![0u8; num_bytes], num_probes }
    }

    /// Builds a filter holding every key yielded by `keys`.
    pub fn build<'a, I>(keys: I, bits_per_key: usize) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
        I::IntoIter: ExactSizeIterator,
    {
        let keys = keys.into_iter();
        let mut filter = Self::with_bits_per_key(keys.len(), bits_per_key);
        for key in keys {
            filter.add(key);
        }
        filter
    }

    /// Number of probes per key.
    pub fn num_probes(&self) -> u8 {
        self.num_probes
    }

    /// Number of bits in the filter.
    pub fn num_bits(&self) -> usize {
        self.bits.len() * 8
    }

    /// Yields the bit positions probed for `key` (double hashing).
    fn probes(&self, key: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let num_bits = self.num_bits() as u32;
        let mut h = bloom_hash(key);
        let delta = h.rotate_right(17);
        (0..self.num_probes).map(move |_| {
            let pos = (h % num_bits) as usize;
            h = h.wrapping_add(delta);
            pos
        })
    }
}

impl Filter for BloomFilter {
    fn may_contain(&self, key: &[u8]) -> bool {
        let probes: Vec<usize> = self.probes(key).collect();
        probes.into_iter().all(|pos| self.bits[pos / 8] & (1 << (pos % 8)) != 0)
    }

    fn add(&mut self, key: &[u8]) {
        let probes: Vec<usize> = self.probes(key).collect();
        for pos in probes {
            self.bits[pos / 8] |= 1 << (pos % 8);
        }
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoded = Vec::with_capacity(self.bits.len() + 1);
        encoded.extend_from_slice(&self.bits);
        encoded.push(self.num_probes);
        encoded
    }

    fn decode(data: &[u8]) -> Result<Self> {
        let (&num_probes, bits) = data
            .split_last()
            .ok_or_else(|| Error::corruption("bloom filter is empty"))?;
        if bits.is_empty() {
            return Err(Error::corruption("bloom filter has no bits"));
        }
        if num_probes == 0 || num_probes > MAX_PROBES {
            return Err(Error::corruption(format!("bloom filter probe count {} unsupported", num_probes)));
        }
        Ok(Self { bits: bits.to_vec(), num_probes })
    }
}

/// Murmur-style hash used by LevelDB filters.
fn bloom_hash(data: &[u8]) -> u32 {
    const SEED: u32 = 0xbc9f1d34;
    const M: u32 = 0xc6a4a793;

    let mut h = SEED ^ (data.len() as u32).wrapping_mul(M);
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let w = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h = h.wrapping_add(w);
        h = h.wrapping_mul(M);
        h ^= h >> 16;
    }

    let rest = chunks.remainder();
    if !rest.is_empty() {
        for (i, &byte) in rest.iter().enumerate() {
            h = h.wrapping_add((byte as u32) << (8 * i));
        }
        h = h.wrapping_mul(M);
        h ^= h >> 24;
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_false_negatives() {
        let keys: Vec<Vec<u8>> = (0..1000).map(|i| format!("key{}", i).into_bytes()).collect();
        let filter = BloomFilter::build(keys.iter().map(Vec::as_slice), 10);

        for key in &keys {
            assert!(filter.may_contain(key), "false negative for {:?}", String::from_utf8_lossy(key));
        }
    }

    #[test]
    fn test_false_positive_rate() {
        let keys: Vec<Vec<u8>> = (0..10_000).map(|i| format!("key{}", i).into_bytes()).collect();
        let filter = BloomFilter::build(keys.iter().map(Vec::as_slice), 10);

        let false_positives = (10_000..20_000)
            .filter(|i| filter.may_contain(format!("key{}", i).as_bytes()))
            .count();
        // 10 bits per key gives roughly 1%; allow generous slack
        assert!(false_positives < 500, "false positives: {}", false_positives);
    }

    #[test]
    fn test_encode_decode() {
        let mut filter = BloomFilter::with_bits_per_key(3, 10);
        filter.add(b"key1");
        filter.add(b"key2");

        let decoded = BloomFilter::decode(&filter.encode()).unwrap();
        assert_eq!(decoded, filter);
        assert!(decoded.may_contain(b"key1"));
        assert!(decoded.may_contain(b"key2"));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(BloomFilter::decode(&[]).is_err());
        assert!(BloomFilter::decode(&[7]).is_err());
        assert!(BloomFilter::decode(&[0, 0, 0, 99]).is_err());
    }

    #[test]
    fn test_empty_filter_rejects_everything() {
        let filter = BloomFilter::with_bits_per_key(0, 10);
        assert!(!filter.may_contain(b"anything"));
    }
}
