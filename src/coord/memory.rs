//! In-memory coordination store
//!
//! Implements the full [`CoordStore`] contract behind a process-local
//! mutex. Single-machine deployments run every worker loop against one
//! shared instance; tests use it to exercise multi-worker interleavings
//! without a network.

use crate::coord::{CoordResult, CoordStore, PipelineOp};
use async_trait::async_trait;
use bitvec::vec::BitVec;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// f64 wrapper with a total order, usable as a BTreeSet key
#[derive(Debug, Clone, Copy, PartialEq)]
struct Score(f64);

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set with at-most-once membership
#[derive(Default)]
struct Zset {
    by_score: BTreeSet<(Score, String)>,
    scores: HashMap<String, f64>,
}

impl Zset {
    fn add(&mut self, score: f64, member: &str) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.by_score.remove(&(Score(old), member.to_string()));
        }
        self.by_score.insert((Score(score), member.to_string()));
    }

    fn pop_min(&mut self) -> Option<(f64, String)> {
        let (score, member) = self.by_score.iter().next().cloned()?;
        self.by_score.remove(&(score, member.clone()));
        self.scores.remove(&member);
        Some((score.0, member))
    }
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Default)]
struct Shared {
    bitfields: HashMap<String, BitVec>,
    zsets: HashMap<String, Zset>,
    kv: HashMap<String, KvEntry>,
}

/// Process-local [`CoordStore`] backend
#[derive(Default)]
pub struct MemoryCoordStore {
    shared: Mutex<Shared>,
}

impl MemoryCoordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        // Lock poisoning only happens if a holder panicked; the data is
        // still structurally sound for the remaining workers.
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CoordStore for MemoryCoordStore {
    async fn ping(&self) -> CoordResult<()> {
        Ok(())
    }

    async fn bitfield_get_bits(&self, key: &str, indices: &[u64]) -> CoordResult<Vec<bool>> {
        let shared = self.lock();
        let bits = shared.bitfields.get(key);
        Ok(indices
            .iter()
            .map(|&i| {
                bits.map(|b| b.get(i as usize).map(|r| *r).unwrap_or(false))
                    .unwrap_or(false)
            })
            .collect())
    }

    async fn bitfield_set_bits(&self, key: &str, indices: &[u64]) -> CoordResult<()> {
        let mut shared = self.lock();
        let bits = shared.bitfields.entry(key.to_string()).or_default();
        for &i in indices {
            let i = i as usize;
            if i >= bits.len() {
                bits.resize(i + 1, false);
            }
            bits.set(i, true);
        }
        Ok(())
    }

    async fn bitfield_count_ones(&self, key: &str) -> CoordResult<u64> {
        let shared = self.lock();
        Ok(shared
            .bitfields
            .get(key)
            .map(|b| b.count_ones() as u64)
            .unwrap_or(0))
    }

    async fn zset_add(&self, key: &str, score: f64, member: &str) -> CoordResult<()> {
        let mut shared = self.lock();
        shared.zsets.entry(key.to_string()).or_default().add(score, member);
        Ok(())
    }

    async fn zset_pop_min(&self, key: &str) -> CoordResult<Option<(f64, String)>> {
        let mut shared = self.lock();
        Ok(shared.zsets.get_mut(key).and_then(Zset::pop_min))
    }

    async fn zset_card(&self, key: &str) -> CoordResult<u64> {
        let shared = self.lock();
        Ok(shared
            .zsets
            .get(key)
            .map(|z| z.scores.len() as u64)
            .unwrap_or(0))
    }

    async fn kv_set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CoordResult<()> {
        let mut shared = self.lock();
        shared.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn kv_set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> CoordResult<bool> {
        let mut shared = self.lock();
        let now = Instant::now();
        if let Some(existing) = shared.kv.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }
        shared.kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: ttl.map(|t| now + t),
            },
        );
        Ok(true)
    }

    async fn kv_get(&self, key: &str) -> CoordResult<Option<String>> {
        let mut shared = self.lock();
        let now = Instant::now();
        let (expired, value) = match shared.kv.get(key) {
            Some(entry) if entry.is_expired(now) => (true, None),
            Some(entry) => (false, Some(entry.value.clone())),
            None => (false, None),
        };
        if expired {
            shared.kv.remove(key);
        }
        Ok(value)
    }

    async fn kv_compare_and_delete(&self, key: &str, expected: &str) -> CoordResult<bool> {
        let mut shared = self.lock();
        let now = Instant::now();
        let matches = match shared.kv.get(key) {
            Some(entry) => !entry.is_expired(now) && entry.value == expected,
            None => false,
        };
        if matches {
            shared.kv.remove(key);
        }
        Ok(matches)
    }

    async fn kv_scan(&self, prefix: &str) -> CoordResult<Vec<(String, String)>> {
        let shared = self.lock();
        let now = Instant::now();
        Ok(shared
            .kv
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn pipeline(&self, ops: Vec<PipelineOp>) -> CoordResult<()> {
        let mut shared = self.lock();
        let now = Instant::now();
        for op in ops {
            match op {
                PipelineOp::ZsetAdd { key, score, member } => {
                    shared.zsets.entry(key).or_default().add(score, &member);
                }
                PipelineOp::KvSet { key, value, ttl } => {
                    shared.kv.insert(
                        key,
                        KvEntry {
                            value,
                            expires_at: ttl.map(|t| now + t),
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

// Memory-store misuse shows up as a protocol bug everywhere else, so the
// contract is pinned down here.
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bitfield_roundtrip() {
        let store = MemoryCoordStore::new();

        let bits = store.bitfield_get_bits("filter", &[0, 5, 100]).await.unwrap();
        assert_eq!(bits, vec![false, false, false]);

        store.bitfield_set_bits("filter", &[5, 100]).await.unwrap();
        let bits = store.bitfield_get_bits("filter", &[0, 5, 100]).await.unwrap();
        assert_eq!(bits, vec![false, true, true]);

        assert_eq!(store.bitfield_count_ones("filter").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bitfield_set_idempotent() {
        let store = MemoryCoordStore::new();
        store.bitfield_set_bits("filter", &[7]).await.unwrap();
        store.bitfield_set_bits("filter", &[7]).await.unwrap();
        assert_eq!(store.bitfield_count_ones("filter").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zset_pop_order() {
        let store = MemoryCoordStore::new();
        store.zset_add("frontier", 2.0, "b").await.unwrap();
        store.zset_add("frontier", 1.0, "a").await.unwrap();
        store.zset_add("frontier", 3.0, "c").await.unwrap();

        assert_eq!(
            store.zset_pop_min("frontier").await.unwrap(),
            Some((1.0, "a".to_string()))
        );
        assert_eq!(
            store.zset_pop_min("frontier").await.unwrap(),
            Some((2.0, "b".to_string()))
        );
        assert_eq!(
            store.zset_pop_min("frontier").await.unwrap(),
            Some((3.0, "c".to_string()))
        );
        assert_eq!(store.zset_pop_min("frontier").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_zset_member_appears_once() {
        let store = MemoryCoordStore::new();
        store.zset_add("frontier", 1.0, "a").await.unwrap();
        store.zset_add("frontier", 5.0, "a").await.unwrap();

        assert_eq!(store.zset_card("frontier").await.unwrap(), 1);
        assert_eq!(
            store.zset_pop_min("frontier").await.unwrap(),
            Some((5.0, "a".to_string()))
        );
        assert_eq!(store.zset_pop_min("frontier").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_kv_set_if_absent() {
        let store = MemoryCoordStore::new();

        assert!(store.kv_set_if_absent("lease:h", "w1", None).await.unwrap());
        assert!(!store.kv_set_if_absent("lease:h", "w2", None).await.unwrap());
        assert_eq!(
            store.kv_get("lease:h").await.unwrap(),
            Some("w1".to_string())
        );
    }

    #[tokio::test]
    async fn test_kv_ttl_expiry() {
        let store = MemoryCoordStore::new();

        store
            .kv_set("lease:h", "w1", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(store.kv_get("lease:h").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.kv_get("lease:h").await.unwrap().is_none());

        // An expired key can be re-claimed
        assert!(store.kv_set_if_absent("lease:h", "w2", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_compare_and_delete() {
        let store = MemoryCoordStore::new();
        store.kv_set("lease:h", "w1", None).await.unwrap();

        assert!(!store.kv_compare_and_delete("lease:h", "w2").await.unwrap());
        assert!(store.kv_get("lease:h").await.unwrap().is_some());

        assert!(store.kv_compare_and_delete("lease:h", "w1").await.unwrap());
        assert!(store.kv_get("lease:h").await.unwrap().is_none());

        assert!(!store.kv_compare_and_delete("lease:h", "w1").await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_scan_prefix() {
        let store = MemoryCoordStore::new();
        store.kv_set("inflight:a", "1", None).await.unwrap();
        store.kv_set("inflight:b", "2", None).await.unwrap();
        store.kv_set("lease:a", "3", None).await.unwrap();

        let mut entries = store.kv_scan("inflight:").await.unwrap();
        entries.sort();
        assert_eq!(
            entries,
            vec![
                ("inflight:a".to_string(), "1".to_string()),
                ("inflight:b".to_string(), "2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_pipeline_applies_all_ops() {
        let store = MemoryCoordStore::new();
        store
            .pipeline(vec![
                PipelineOp::ZsetAdd {
                    key: "frontier".to_string(),
                    score: 1.0,
                    member: "a".to_string(),
                },
                PipelineOp::KvSet {
                    key: "domain:h".to_string(),
                    value: "{}".to_string(),
                    ttl: None,
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.zset_card("frontier").await.unwrap(), 1);
        assert!(store.kv_get("domain:h").await.unwrap().is_some());
    }
}
