//! In-process [`FastCache`] implementation.
//!
//! Backs the single-process deployment (Redis disabled) and every test.
//! Entries carry an optional deadline checked lazily on access, mirroring
//! TTL expiry.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use tg_domain::{Error, Result};

use crate::FastCache;

enum Value {
    Str(String),
    Set(HashSet<String>),
    Hash(HashMap<String, String>),
    List(VecDeque<String>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<String, Entry>) -> T) -> T {
        let mut entries = self.entries.lock();
        entries.retain(|_, e| e.live());
        f(&mut entries)
    }
}

fn wrong_type(key: &str) -> Error {
    Error::Cache(format!("wrong value type at key {key}"))
}

#[async_trait]
impl FastCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Str(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_entries(|entries| {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: ttl.map(|d| Instant::now() + d),
                },
            );
        });
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.with_entries(|entries| {
            if entries.contains_key(key) {
                return Ok(false);
            }
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Str(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.with_entries(|entries| {
            entries.remove(key);
        });
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.with_entries(|entries| {
            let matches = matches!(
                entries.get(key),
                Some(Entry { value: Value::Str(s), .. }) if s == expected
            );
            if matches {
                entries.remove(key);
            }
            Ok(matches)
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry { value: Value::Set(set), .. }) => {
                set.remove(member);
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(()),
        })
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.len()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Set(set), .. }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
            None => Ok(false),
        })
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Hash(hash) => {
                    for (field, value) in fields {
                        hash.insert((*field).to_string(), value.clone());
                    }
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::Hash(hash), .. }) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(HashMap::new()),
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        self.with_entries(|entries| {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        });
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        self.with_entries(|entries| {
            let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => {
                    list.push_front(value.to_string());
                    Ok(())
                }
                _ => Err(wrong_type(key)),
            }
        })
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.pop_back()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        })
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<usize> {
        self.with_entries(|entries| match entries.get_mut(key) {
            Some(Entry { value: Value::List(list), .. }) => {
                let before = list.len();
                list.retain(|v| v != value);
                Ok(before - list.len())
            }
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.with_entries(|entries| match entries.get(key) {
            Some(Entry { value: Value::List(list), .. }) => Ok(list.len()),
            Some(_) => Err(wrong_type(key)),
            None => Ok(0),
        })
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_entries(|entries| {
            Ok(entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Strings ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn set_get_del() {
        let cache = MemoryCache::new();
        cache.set("k", "v", None).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.del("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_expires() {
        let cache = MemoryCache::new();
        cache
            .set("k", "v", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_nx_only_once() {
        let cache = MemoryCache::new();
        assert!(cache.set_nx("lock", "a", Duration::from_secs(5)).await.unwrap());
        assert!(!cache.set_nx("lock", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn compare_and_delete_checks_token() {
        let cache = MemoryCache::new();
        cache.set("lock", "token-a", None).await.unwrap();

        // Wrong token: key survives.
        assert!(!cache.compare_and_delete("lock", "token-b").await.unwrap());
        assert!(cache.get("lock").await.unwrap().is_some());

        // Right token: key removed.
        assert!(cache.compare_and_delete("lock", "token-a").await.unwrap());
        assert!(cache.get("lock").await.unwrap().is_none());
    }

    // ── Sets ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn set_membership() {
        let cache = MemoryCache::new();
        cache.sadd("s", "a").await.unwrap();
        cache.sadd("s", "b").await.unwrap();
        cache.sadd("s", "a").await.unwrap();
        assert_eq!(cache.scard("s").await.unwrap(), 2);
        assert!(cache.sismember("s", "a").await.unwrap());

        cache.srem("s", "a").await.unwrap();
        assert!(!cache.sismember("s", "a").await.unwrap());
        assert_eq!(cache.scard("s").await.unwrap(), 1);

        // Removing an absent member is a no-op, not an error.
        cache.srem("s", "zzz").await.unwrap();
        cache.srem("missing", "a").await.unwrap();
    }

    // ── Hashes ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn hash_fields_and_expiry() {
        let cache = MemoryCache::new();
        cache
            .hset("h", &[("worker", "w1".into()), ("task", "t1".into())])
            .await
            .unwrap();
        let all = cache.hgetall("h").await.unwrap();
        assert_eq!(all.get("worker").map(String::as_str), Some("w1"));
        assert_eq!(all.len(), 2);

        cache.expire("h", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.hgetall("h").await.unwrap().is_empty());
    }

    // ── Lists ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_is_fifo() {
        let cache = MemoryCache::new();
        cache.lpush("q", "first").await.unwrap();
        cache.lpush("q", "second").await.unwrap();
        cache.lpush("q", "third").await.unwrap();
        assert_eq!(cache.llen("q").await.unwrap(), 3);

        assert_eq!(cache.rpop("q").await.unwrap().as_deref(), Some("first"));
        assert_eq!(cache.rpop("q").await.unwrap().as_deref(), Some("second"));
        assert_eq!(cache.rpop("q").await.unwrap().as_deref(), Some("third"));
        assert!(cache.rpop("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lrem_removes_all_occurrences() {
        let cache = MemoryCache::new();
        for v in ["a", "b", "a"] {
            cache.lpush("q", v).await.unwrap();
        }
        assert_eq!(cache.lrem("q", "a").await.unwrap(), 2);
        assert_eq!(cache.llen("q").await.unwrap(), 1);
    }

    // ── Scans ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn prefix_scan() {
        let cache = MemoryCache::new();
        cache.set("tg:visibility:1", "x", None).await.unwrap();
        cache.set("tg:visibility:2", "x", None).await.unwrap();
        cache.set("tg:other", "x", None).await.unwrap();

        let mut keys = cache.keys_with_prefix("tg:visibility:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["tg:visibility:1", "tg:visibility:2"]);
    }
}
