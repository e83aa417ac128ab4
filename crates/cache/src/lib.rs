//! Fast-cache port for tradegate.
//!
//! [`FastCache`] is the narrow key-value surface the queue, admission
//! controller, and progress store rely on: strings with TTL, sets for
//! processing membership, hashes for claim records, lists for the ready
//! queue, and an atomic compare-and-delete used for lock release.
//!
//! Two implementations ship:
//! - [`MemoryCache`] — in-process, used when Redis is disabled and in tests.
//! - [`RedisCache`] — shared across gateway processes.

pub mod keys;
mod memory;
mod redis_cache;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use tg_domain::Result;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[async_trait]
pub trait FastCache: Send + Sync {
    // ── Strings ─────────────────────────────────────────────────────
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    /// Set only if absent. Returns true when the value was written.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
    /// Delete `key` only while it still holds `expected` — the release half
    /// of a token lock. Returns true when the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool>;

    // ── Sets ────────────────────────────────────────────────────────
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn scard(&self, key: &str) -> Result<usize>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;

    // ── Hashes ──────────────────────────────────────────────────────
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    // ── Lists (FIFO queue) ──────────────────────────────────────────
    async fn lpush(&self, key: &str, value: &str) -> Result<()>;
    async fn rpop(&self, key: &str) -> Result<Option<String>>;
    /// Remove all occurrences of `value`. Returns the removed count.
    async fn lrem(&self, key: &str, value: &str) -> Result<usize>;
    async fn llen(&self, key: &str) -> Result<usize>;

    // ── Scans ───────────────────────────────────────────────────────
    /// All keys starting with `prefix` (cleanup passes only — never on the
    /// request path).
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}
