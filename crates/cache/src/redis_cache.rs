//! Redis-backed [`FastCache`] implementation.
//!
//! Uses a multiplexed [`ConnectionManager`] shared by every coroutine in
//! the process; the manager reconnects on its own after a dropped
//! connection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use tg_domain::{Error, Result};

use crate::FastCache;

/// Compare-and-delete, executed atomically server-side.
const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and ping; fails fast on an unreachable server so the
    /// caller can fall back to the in-process cache.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(to_cache_err)?;
        let mut conn = client
            .get_connection_manager()
            .await
            .map_err(to_cache_err)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(to_cache_err)?;
        tracing::info!(url = %redacted(url), "connected to redis");
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

fn to_cache_err(e: redis::RedisError) -> Error {
    Error::Cache(e.to_string())
}

/// Strip credentials from a redis URL for logging.
fn redacted(url: &str) -> String {
    match url.find('@') {
        Some(at) => {
            let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
            format!("{}***@{}", &url[..scheme_end], &url[at + 1..])
        }
        None => url.to_string(),
    }
}

#[async_trait]
impl FastCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.get(key).await.map_err(to_cache_err)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn();
        match ttl {
            Some(d) => {
                let () = conn
                    .set_ex(key, value, d.as_secs().max(1))
                    .await
                    .map_err(to_cache_err)?;
            }
            None => {
                let () = conn.set(key, value).await.map_err(to_cache_err)?;
            }
        }
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(to_cache_err)?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        let () = conn.del(key).await.map_err(to_cache_err)?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn();
        let deleted: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await
            .map_err(to_cache_err)?;
        Ok(deleted > 0)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        let () = conn.sadd(key, member).await.map_err(to_cache_err)?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn();
        let () = conn.srem(key, member).await.map_err(to_cache_err)?;
        Ok(())
    }

    async fn scard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn();
        let count: usize = conn.scard(key).await.map_err(to_cache_err)?;
        Ok(count)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn();
        let member_of: bool = conn.sismember(key, member).await.map_err(to_cache_err)?;
        Ok(member_of)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.conn();
        let () = conn
            .hset_multiple(key, fields)
            .await
            .map_err(to_cache_err)?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn();
        let all: HashMap<String, String> = conn.hgetall(key).await.map_err(to_cache_err)?;
        Ok(all)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn();
        let () = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(to_cache_err)?;
        Ok(())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        let () = conn.lpush(key, value).await.map_err(to_cache_err)?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        let value: Option<String> = conn.rpop(key, None).await.map_err(to_cache_err)?;
        Ok(value)
    }

    async fn lrem(&self, key: &str, value: &str) -> Result<usize> {
        let mut conn = self.conn();
        let removed: usize = conn.lrem(key, 0, value).await.map_err(to_cache_err)?;
        Ok(removed)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn();
        let len: usize = conn.llen(key).await.map_err(to_cache_err)?;
        Ok(len)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let keys: Vec<String> = conn
            .keys(format!("{prefix}*"))
            .await
            .map_err(to_cache_err)?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_credentials() {
        assert_eq!(
            redacted("redis://:secret@cache.internal:6379/0"),
            "redis://***@cache.internal:6379/0"
        );
        assert_eq!(redacted("redis://localhost:6379"), "redis://localhost:6379");
    }
}
