//! Admission control — per-user and global concurrency ceilings plus
//! visibility-timeout claims.
//!
//! Both ceilings are soft limits checked at dequeue time, not hard
//! reservations: the check and the mark are separate cache operations, so
//! a narrow race can transiently admit one task over the ceiling under
//! concurrent dequeue. The cleanup pass corrects any drift; this tolerance
//! is intentional.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use tg_cache::{keys, FastCache};
use tg_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Controller
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AdmissionController {
    cache: Arc<dyn FastCache>,
    user_limit: usize,
    global_limit: usize,
    visibility_timeout: Duration,
}

/// One expired (or still live) claim record from the visibility scan.
#[derive(Debug, Clone)]
pub struct Claim {
    pub task_id: String,
    pub worker_id: String,
    pub timeout_at: i64,
}

/// Per-user slot snapshot for the queue status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct UserSlots {
    pub processing: usize,
    pub concurrent_limit: usize,
    pub available_slots: usize,
}

impl AdmissionController {
    pub fn new(
        cache: Arc<dyn FastCache>,
        user_limit: usize,
        global_limit: usize,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            user_limit,
            global_limit,
            visibility_timeout,
        }
    }

    // ── Concurrency checks ──────────────────────────────────────────

    /// True while the user has a free processing slot.
    pub async fn check_user_limit(&self, user_id: &str) -> Result<bool> {
        let count = self.cache.scard(&keys::user_processing(user_id)).await?;
        Ok(count < self.user_limit)
    }

    /// True while the system has a free processing slot.
    pub async fn check_global_limit(&self) -> Result<bool> {
        let count = self.cache.scard(keys::SET_PROCESSING).await?;
        Ok(count < self.global_limit)
    }

    // ── Processing membership ───────────────────────────────────────

    /// Add the task to the user's and the global processing sets. Call
    /// only after both checks passed.
    pub async fn mark_processing(&self, task_id: &str, user_id: &str) -> Result<()> {
        self.cache
            .sadd(&keys::user_processing(user_id), task_id)
            .await?;
        self.cache.sadd(keys::SET_PROCESSING, task_id).await?;
        Ok(())
    }

    /// Remove the task from both sets. Idempotent: removing an absent
    /// member is a no-op.
    pub async fn unmark_processing(&self, task_id: &str, user_id: &str) -> Result<()> {
        self.cache
            .srem(&keys::user_processing(user_id), task_id)
            .await?;
        self.cache.srem(keys::SET_PROCESSING, task_id).await?;
        Ok(())
    }

    pub async fn is_processing(&self, task_id: &str) -> Result<bool> {
        self.cache.sismember(keys::SET_PROCESSING, task_id).await
    }

    pub async fn processing_count(&self) -> Result<usize> {
        self.cache.scard(keys::SET_PROCESSING).await
    }

    pub async fn user_slots(&self, user_id: &str) -> Result<UserSlots> {
        let processing = self.cache.scard(&keys::user_processing(user_id)).await?;
        Ok(UserSlots {
            processing,
            concurrent_limit: self.user_limit,
            available_slots: self.user_limit.saturating_sub(processing),
        })
    }

    // ── Visibility timeouts ─────────────────────────────────────────

    /// Record which worker claimed the task and when the claim expires.
    ///
    /// The record's own TTL is twice the logical timeout so the cleanup
    /// pass can still observe an expired claim before the key evaporates.
    pub async fn set_visibility_timeout(&self, task_id: &str, worker_id: &str) -> Result<()> {
        let key = keys::visibility(task_id);
        let timeout_at = Utc::now().timestamp() + self.visibility_timeout.as_secs() as i64;
        self.cache
            .hset(
                &key,
                &[
                    ("task_id", task_id.to_string()),
                    ("worker_id", worker_id.to_string()),
                    ("timeout_at", timeout_at.to_string()),
                ],
            )
            .await?;
        self.cache.expire(&key, self.visibility_timeout * 2).await?;
        Ok(())
    }

    pub async fn clear_visibility_timeout(&self, task_id: &str) -> Result<()> {
        self.cache.del(&keys::visibility(task_id)).await
    }

    /// Claims whose logical timeout has elapsed.
    pub async fn expired_claims(&self) -> Result<Vec<Claim>> {
        let now = Utc::now().timestamp();
        let claim_keys = self.cache.keys_with_prefix(keys::visibility_prefix()).await?;
        let mut expired = Vec::new();
        for key in claim_keys {
            let record = self.cache.hgetall(&key).await?;
            if let Some(claim) = parse_claim(&record) {
                if claim.timeout_at <= now {
                    expired.push(claim);
                }
            }
        }
        Ok(expired)
    }
}

fn parse_claim(record: &HashMap<String, String>) -> Option<Claim> {
    Some(Claim {
        task_id: record.get("task_id")?.clone(),
        worker_id: record.get("worker_id")?.clone(),
        timeout_at: record.get("timeout_at")?.parse().ok()?,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tg_cache::MemoryCache;

    fn controller() -> AdmissionController {
        AdmissionController::new(
            Arc::new(MemoryCache::new()),
            3,
            3,
            Duration::from_secs(300),
        )
    }

    #[tokio::test]
    async fn limits_enforced_per_user_and_globally() {
        let ctrl = AdmissionController::new(
            Arc::new(MemoryCache::new()),
            2,
            3,
            Duration::from_secs(300),
        );

        assert!(ctrl.check_user_limit("u1").await.unwrap());
        ctrl.mark_processing("t1", "u1").await.unwrap();
        ctrl.mark_processing("t2", "u1").await.unwrap();

        // u1 is at its per-user ceiling; the global ceiling still has room.
        assert!(!ctrl.check_user_limit("u1").await.unwrap());
        assert!(ctrl.check_user_limit("u2").await.unwrap());
        assert!(ctrl.check_global_limit().await.unwrap());

        ctrl.mark_processing("t3", "u2").await.unwrap();
        assert!(!ctrl.check_global_limit().await.unwrap());
    }

    #[tokio::test]
    async fn unmark_is_idempotent() {
        let ctrl = controller();
        ctrl.mark_processing("t1", "u1").await.unwrap();
        assert!(ctrl.is_processing("t1").await.unwrap());

        ctrl.unmark_processing("t1", "u1").await.unwrap();
        assert!(!ctrl.is_processing("t1").await.unwrap());
        assert_eq!(ctrl.processing_count().await.unwrap(), 0);

        // Second release: same effect, no error.
        ctrl.unmark_processing("t1", "u1").await.unwrap();
        assert!(!ctrl.is_processing("t1").await.unwrap());
        assert_eq!(ctrl.user_slots("u1").await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn task_in_global_set_iff_in_one_user_set() {
        let ctrl = controller();
        ctrl.mark_processing("t1", "u1").await.unwrap();

        assert!(ctrl.is_processing("t1").await.unwrap());
        assert_eq!(ctrl.user_slots("u1").await.unwrap().processing, 1);
        assert_eq!(ctrl.user_slots("u2").await.unwrap().processing, 0);

        ctrl.unmark_processing("t1", "u1").await.unwrap();
        assert!(!ctrl.is_processing("t1").await.unwrap());
        assert_eq!(ctrl.user_slots("u1").await.unwrap().processing, 0);
    }

    #[tokio::test]
    async fn visibility_claim_roundtrip() {
        let ctrl = controller();
        ctrl.set_visibility_timeout("t1", "w1").await.unwrap();

        // Claim exists but is not yet expired.
        assert!(ctrl.expired_claims().await.unwrap().is_empty());

        ctrl.clear_visibility_timeout("t1").await.unwrap();
        assert!(ctrl.expired_claims().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_claim_is_reported() {
        let cache = Arc::new(MemoryCache::new());
        // One-second timeout; the record TTL (2×) keeps it observable
        // after the logical expiry.
        let ctrl = AdmissionController::new(cache, 3, 3, Duration::from_secs(1));
        ctrl.set_visibility_timeout("t1", "w1").await.unwrap();

        // Past the logical expiry but inside the record TTL window.
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let expired = ctrl.expired_claims().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].task_id, "t1");
        assert_eq!(expired[0].worker_id, "w1");
    }
}
