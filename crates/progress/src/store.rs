//! Progress snapshot persistence — fast cache with local-file fallback.
//!
//! Writes go to the cache under `tg:progress:<task_id>` with a TTL; when
//! the cache is unreachable the snapshot lands in a JSON file under the
//! state directory instead. A task never fails because a progress write
//! failed: every error here is logged and swallowed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tg_cache::{keys, FastCache};

use crate::ledger::ProgressSnapshot;

pub struct ProgressStore {
    cache: Arc<dyn FastCache>,
    fallback_dir: PathBuf,
    ttl: Duration,
}

impl ProgressStore {
    pub fn new(cache: Arc<dyn FastCache>, state_path: &Path, ttl: Duration) -> Self {
        let fallback_dir = state_path.join("progress");
        if let Err(e) = std::fs::create_dir_all(&fallback_dir) {
            tracing::warn!(dir = %fallback_dir.display(), error = %e, "cannot create progress fallback dir");
        }
        Self {
            cache,
            fallback_dir,
            ttl,
        }
    }

    /// Persist a snapshot. At-least-once overwrite keyed by task id;
    /// degrades from cache to file, and failure of both is logged only.
    pub async fn save(&self, snapshot: &ProgressSnapshot) {
        let json = match serde_json::to_string(snapshot) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(task_id = %snapshot.task_id, error = %e, "progress snapshot serialize failed");
                return;
            }
        };

        let key = keys::progress(&snapshot.task_id);
        match self.cache.set(&key, &json, Some(self.ttl)).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(task_id = %snapshot.task_id, error = %e, "cache write failed, falling back to file");
                if let Err(e) = std::fs::write(self.file_path(&snapshot.task_id), &json) {
                    tracing::error!(task_id = %snapshot.task_id, error = %e, "progress file write failed");
                }
            }
        }
    }

    /// Load the freshest snapshot for a task: cache first, then the
    /// fallback file. Clock-derived fields are recomputed on the way out.
    pub async fn load(&self, task_id: &str) -> Option<ProgressSnapshot> {
        let key = keys::progress(task_id);
        let raw = match self.cache.get(&key).await {
            Ok(Some(raw)) => Some(raw),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(task_id = %task_id, error = %e, "cache read failed, trying file");
                None
            }
        };

        let raw = match raw {
            Some(raw) => raw,
            None => std::fs::read_to_string(self.file_path(task_id)).ok()?,
        };

        match serde_json::from_str::<ProgressSnapshot>(&raw) {
            Ok(mut snapshot) => {
                snapshot.refresh_times(Utc::now());
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!(task_id = %task_id, error = %e, "corrupt progress snapshot");
                None
            }
        }
    }

    /// Drop both copies when a task leaves the registry.
    pub async fn remove(&self, task_id: &str) {
        if let Err(e) = self.cache.del(&keys::progress(task_id)).await {
            tracing::debug!(task_id = %task_id, error = %e, "cache delete failed");
        }
        let _ = std::fs::remove_file(self.file_path(task_id));
    }

    fn file_path(&self, task_id: &str) -> PathBuf {
        self.fallback_dir.join(format!("{task_id}.json"))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
