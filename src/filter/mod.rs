//! Approximate URL filter
//!
//! A Bloom filter whose bit array lives in the coordination store, so every
//! worker shares one view of "have we seen this URL". False negatives never
//! occur; false positives are bounded by the configured error rate while
//! the insert count stays at or below capacity. The filter is never resized
//! in place; past capacity the error rate degrades and
//! [`UrlFilter::size_estimate`] lets operators observe it.

use crate::coord::{CoordResult, CoordStore};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_128;

/// Coordination store key holding the shared bit array
pub const FILTER_KEY: &str = "filter";

/// Number of bits for `capacity` items at false-positive rate `error_rate`
#[inline]
fn num_bits(capacity: u64, error_rate: f64) -> u64 {
    let ln2 = std::f64::consts::LN_2;
    ((-(capacity as f64) * error_rate.ln()) / (ln2 * ln2)).ceil() as u64
}

/// Number of hash functions for a filter of `num_bits` bits
#[inline]
fn num_hashes(num_bits: u64, capacity: u64) -> u64 {
    (((num_bits as f64) / (capacity as f64)) * std::f64::consts::LN_2)
        .ceil()
        .max(1.0) as u64
}

/// Shared membership filter over normalized URLs
pub struct UrlFilter {
    store: Arc<dyn CoordStore>,
    bits: u64,
    hashes: u64,
}

impl UrlFilter {
    /// Sizes a filter for `capacity` expected URLs at `error_rate`
    pub fn new(store: Arc<dyn CoordStore>, capacity: u64, error_rate: f64) -> Self {
        let bits = num_bits(capacity, error_rate);
        let hashes = num_hashes(bits, capacity);
        Self {
            store,
            bits,
            hashes,
        }
    }

    /// Derives the k probe positions for an item via double hashing
    ///
    /// The two 64-bit halves of xxh3-128 seed h_i = a + i*b (mod m), so one
    /// hash invocation covers all probes.
    fn indices(&self, item: &str) -> Vec<u64> {
        let digest = xxh3_128(item.as_bytes());
        let a = (digest >> 64) as u64;
        let b = digest as u64;

        (0..self.hashes)
            .map(|i| a.wrapping_add(i.wrapping_mul(b)) % self.bits)
            .collect()
    }

    /// Possibly-contains check; false means definitely never inserted
    pub async fn contains(&self, url: &str) -> CoordResult<bool> {
        let bits = self
            .store
            .bitfield_get_bits(FILTER_KEY, &self.indices(url))
            .await?;
        Ok(bits.into_iter().all(|b| b))
    }

    /// Marks a URL as seen; idempotent
    pub async fn insert(&self, url: &str) -> CoordResult<()> {
        self.store
            .bitfield_set_bits(FILTER_KEY, &self.indices(url))
            .await
    }

    /// Estimated number of distinct inserted URLs, from the fill ratio
    pub async fn size_estimate(&self) -> CoordResult<u64> {
        let ones = self.store.bitfield_count_ones(FILTER_KEY).await? as f64;
        let m = self.bits as f64;
        let k = self.hashes as f64;

        if ones == 0.0 {
            return Ok(0);
        }
        if ones >= m {
            return Ok(u64::MAX);
        }

        Ok((-(m / k) * (1.0 - ones / m).ln()).round() as u64)
    }

    /// Configured bit width
    pub fn bit_width(&self) -> u64 {
        self.bits
    }

    /// Configured hash count
    pub fn hash_count(&self) -> u64 {
        self.hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::MemoryCoordStore;

    fn test_filter(capacity: u64, error_rate: f64) -> UrlFilter {
        UrlFilter::new(Arc::new(MemoryCoordStore::new()), capacity, error_rate)
    }

    #[test]
    fn test_sizing_defaults() {
        // n = 10^7, eps = 10^-3 gives roughly 1.44 * 10^8 bits and 10 hashes
        let filter = test_filter(10_000_000, 0.001);
        assert!(filter.bit_width() > 140_000_000);
        assert!(filter.bit_width() < 145_000_000);
        assert_eq!(filter.hash_count(), 10);
    }

    #[test]
    fn test_sizing_minimum_one_hash() {
        let filter = test_filter(1_000_000, 0.9999);
        assert!(filter.hash_count() >= 1);
    }

    #[tokio::test]
    async fn test_no_false_negatives() {
        let filter = test_filter(10_000, 0.01);

        for i in 0..1_000 {
            let url = format!("https://example.com/page/{}", i);
            filter.insert(&url).await.unwrap();
        }

        for i in 0..1_000 {
            let url = format!("https://example.com/page/{}", i);
            assert!(filter.contains(&url).await.unwrap(), "lost {}", url);
        }
    }

    #[tokio::test]
    async fn test_insert_idempotent() {
        let store = Arc::new(MemoryCoordStore::new());
        let filter = UrlFilter::new(store.clone(), 1_000, 0.01);

        filter.insert("https://example.com/").await.unwrap();
        let ones = store.bitfield_count_ones(FILTER_KEY).await.unwrap();

        filter.insert("https://example.com/").await.unwrap();
        assert_eq!(store.bitfield_count_ones(FILTER_KEY).await.unwrap(), ones);
    }

    #[tokio::test]
    async fn test_false_positive_rate_bounded() {
        let capacity = 1_000;
        let error_rate = 0.01;
        let filter = test_filter(capacity, error_rate);

        for i in 0..capacity {
            filter
                .insert(&format!("https://a.test/in/{}", i))
                .await
                .unwrap();
        }

        let trials = 10_000;
        let mut false_positives = 0;
        for i in 0..trials {
            if filter
                .contains(&format!("https://a.test/out/{}", i))
                .await
                .unwrap()
            {
                false_positives += 1;
            }
        }

        let measured = false_positives as f64 / trials as f64;
        assert!(
            measured <= 2.0 * error_rate,
            "false positive rate {} exceeds 2x target {}",
            measured,
            error_rate
        );
    }

    #[tokio::test]
    async fn test_size_estimate() {
        let filter = test_filter(10_000, 0.01);

        assert_eq!(filter.size_estimate().await.unwrap(), 0);

        let inserted = 500;
        for i in 0..inserted {
            filter
                .insert(&format!("https://example.com/{}", i))
                .await
                .unwrap();
        }

        let estimate = filter.size_estimate().await.unwrap() as f64;
        assert!(
            (estimate - inserted as f64).abs() / (inserted as f64) < 0.3,
            "estimate {} too far from {}",
            estimate,
            inserted
        );
    }
}
