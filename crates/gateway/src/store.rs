//! Durable task and batch document stores.
//!
//! The system of record across process restarts. Documents live in an
//! in-memory map for queries; every insert/update appends the full
//! document to a JSONL log, and the log is compacted (last record per id
//! wins) when the store is opened.
//!
//! The interface is document-shaped — `insert_one` / `update_one` /
//! `find_one` / `find` — so the rest of the gateway never touches the
//! storage layout.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use tg_domain::task::{Batch, Task, TaskStatus};
use tg_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL log helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn load_compacted<T, K>(path: &Path, id_of: impl Fn(&T) -> K) -> HashMap<K, T>
where
    T: DeserializeOwned,
    K: std::hash::Hash + Eq,
{
    let mut docs = HashMap::new();
    if let Ok(content) = std::fs::read_to_string(path) {
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(line) {
                Ok(doc) => {
                    docs.insert(id_of(&doc), doc);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping corrupt document line");
                }
            }
        }
    }
    docs
}

fn rewrite_log<T: Serialize>(path: &Path, docs: impl Iterator<Item = T>) {
    let tmp = path.with_extension("jsonl.tmp");
    let mut ok = false;
    if let Ok(mut f) = std::fs::File::create(&tmp) {
        ok = true;
        for doc in docs {
            match serde_json::to_string(&doc) {
                Ok(json) => {
                    if writeln!(f, "{json}").is_err() {
                        ok = false;
                        break;
                    }
                }
                Err(_) => {
                    ok = false;
                    break;
                }
            }
        }
    }
    if ok {
        let _ = std::fs::rename(&tmp, path);
    } else {
        let _ = std::fs::remove_file(&tmp);
    }
}

fn append_log<T: Serialize>(path: &Path, doc: &T) {
    if let Ok(json) = serde_json::to_string(doc) {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            let _ = writeln!(file, "{json}");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task filter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Clone)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    pub status: Option<TaskStatus>,
    pub batch_id: Option<String>,
}

impl TaskFilter {
    fn matches(&self, task: &Task) -> bool {
        if let Some(ref user) = self.user_id {
            if task.user_id != *user {
                return false;
            }
        }
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(ref batch) = self.batch_id {
            if task.batch_id.as_deref() != Some(batch.as_str()) {
                return false;
            }
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TaskDocStore {
    tasks: RwLock<HashMap<String, Task>>,
    log_path: PathBuf,
}

impl TaskDocStore {
    /// Open the store at `state_path/tasks.jsonl`, compacting the log.
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let log_path = state_path.join("tasks.jsonl");
        let tasks = load_compacted(&log_path, |t: &Task| t.id.clone());
        rewrite_log(&log_path, tasks.values());
        tracing::info!(count = tasks.len(), "task store opened");
        Ok(Self {
            tasks: RwLock::new(tasks),
            log_path,
        })
    }

    pub async fn insert_one(&self, task: &Task) -> Result<()> {
        {
            let mut tasks = self.tasks.write();
            if tasks.contains_key(&task.id) {
                return Err(Error::Store(format!("duplicate task id {}", task.id)));
            }
            tasks.insert(task.id.clone(), task.clone());
        }
        append_log(&self.log_path, task);
        Ok(())
    }

    /// Apply `f` to the stored document. Returns false for an unknown id.
    pub async fn update_one<F>(&self, task_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Task),
    {
        let updated = {
            let mut tasks = self.tasks.write();
            match tasks.get_mut(task_id) {
                Some(task) => {
                    f(task);
                    Some(task.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(task) => {
                append_log(&self.log_path, &task);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace-or-create by id.
    pub async fn upsert_one(&self, task: &Task) -> Result<()> {
        self.tasks
            .write()
            .insert(task.id.clone(), task.clone());
        append_log(&self.log_path, task);
        Ok(())
    }

    pub async fn find_one(&self, task_id: &str) -> Result<Option<Task>> {
        Ok(self.tasks.read().get(task_id).cloned())
    }

    /// Filtered page, newest first. Returns (page, total matching).
    pub async fn find(
        &self,
        filter: &TaskFilter,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<Task>, usize)> {
        let tasks = self.tasks.read();
        let mut matching: Vec<&Task> = tasks.values().filter(|t| filter.matches(t)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    /// Non-terminal documents whose run started (or was created) before
    /// the cutoff — the zombie sweep's input.
    pub async fn find_non_terminal_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Task>> {
        let tasks = self.tasks.read();
        Ok(tasks
            .values()
            .filter(|t| {
                !t.status.is_terminal() && t.started_at.unwrap_or(t.created_at) < cutoff
            })
            .cloned()
            .collect())
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch document store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BatchStore {
    batches: RwLock<HashMap<String, Batch>>,
    log_path: PathBuf,
}

impl BatchStore {
    pub fn new(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path)?;
        let log_path = state_path.join("batches.jsonl");
        let batches = load_compacted(&log_path, |b: &Batch| b.id.clone());
        rewrite_log(&log_path, batches.values());
        Ok(Self {
            batches: RwLock::new(batches),
            log_path,
        })
    }

    pub async fn insert_one(&self, batch: &Batch) -> Result<()> {
        self.batches
            .write()
            .insert(batch.id.clone(), batch.clone());
        append_log(&self.log_path, batch);
        Ok(())
    }

    pub async fn update_one<F>(&self, batch_id: &str, f: F) -> Result<bool>
    where
        F: FnOnce(&mut Batch),
    {
        let updated = {
            let mut batches = self.batches.write();
            match batches.get_mut(batch_id) {
                Some(batch) => {
                    f(batch);
                    Some(batch.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(batch) => {
                append_log(&self.log_path, &batch);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn find_one(&self, batch_id: &str) -> Result<Option<Batch>> {
        Ok(self.batches.read().get(batch_id).cloned())
    }

    /// Record one settled member task on its batch.
    pub async fn record_outcome(&self, batch_id: &str, status: TaskStatus) -> Result<bool> {
        self.update_one(batch_id, |batch| match status {
            TaskStatus::Completed => batch.completed += 1,
            TaskStatus::Failed => batch.failed += 1,
            TaskStatus::Cancelled => batch.cancelled += 1,
            _ => {}
        })
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tg_domain::task::AnalysisParameters;

    fn task(user: &str, symbol: &str) -> Task {
        Task::new(user, symbol, AnalysisParameters::default(), 240.0)
    }

    #[tokio::test]
    async fn insert_find_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();

        let t = task("u1", "AAPL");
        let id = t.id.clone();
        store.insert_one(&t).await.unwrap();

        let found = store.find_one(&id).await.unwrap().unwrap();
        assert_eq!(found.symbol, "AAPL");

        let updated = store
            .update_one(&id, |t| {
                t.status = TaskStatus::Running;
                t.started_at = Some(Utc::now());
            })
            .await
            .unwrap();
        assert!(updated);
        assert_eq!(
            store.find_one(&id).await.unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();
        let t = task("u1", "AAPL");
        store.insert_one(&t).await.unwrap();
        assert!(store.insert_one(&t).await.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_or_creates() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();

        // Upsert with an unknown id creates the document.
        let t = task("u1", "AAPL");
        store.upsert_one(&t).await.unwrap();
        assert_eq!(store.len(), 1);

        // Upsert with a known id replaces it wholesale.
        let mut replacement = t.clone();
        replacement.symbol = "MSFT".into();
        store.upsert_one(&replacement).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.find_one(&t.id).await.unwrap().unwrap().symbol,
            "MSFT"
        );
    }

    #[tokio::test]
    async fn update_missing_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();
        let updated = store
            .update_one("missing", |t| t.status = TaskStatus::Failed)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let t = task("u1", "600519");
        let id = t.id.clone();

        {
            let store = TaskDocStore::new(dir.path()).unwrap();
            store.insert_one(&t).await.unwrap();
            store
                .update_one(&id, |t| {
                    t.finish(TaskStatus::Completed);
                })
                .await
                .unwrap();
        }

        // A fresh store sees the last state, not the insert.
        let store = TaskDocStore::new(dir.path()).unwrap();
        let found = store.find_one(&id).await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Completed);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn find_filters_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();

        for i in 0..5 {
            let mut t = task(if i % 2 == 0 { "alice" } else { "bob" }, "AAPL");
            if i == 4 {
                t.finish(TaskStatus::Completed);
            }
            store.insert_one(&t).await.unwrap();
        }

        let (alice, total) = store
            .find(
                &TaskFilter {
                    user_id: Some("alice".into()),
                    ..TaskFilter::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert!(alice.iter().all(|t| t.user_id == "alice"));

        let (completed, _) = store
            .find(
                &TaskFilter {
                    status: Some(TaskStatus::Completed),
                    ..TaskFilter::default()
                },
                10,
                0,
            )
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);

        let (page, total) = store.find(&TaskFilter::default(), 2, 4).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn zombie_query_matches_only_old_non_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskDocStore::new(dir.path()).unwrap();

        let mut old_running = task("u1", "AAPL");
        old_running.status = TaskStatus::Running;
        old_running.started_at = Some(Utc::now() - chrono::Duration::hours(5));
        store.insert_one(&old_running).await.unwrap();

        let mut old_done = task("u1", "MSFT");
        old_done.started_at = Some(Utc::now() - chrono::Duration::hours(5));
        old_done.finish(TaskStatus::Completed);
        store.insert_one(&old_done).await.unwrap();

        let fresh = task("u1", "TSLA");
        store.insert_one(&fresh).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::hours(2);
        let zombies = store.find_non_terminal_older_than(cutoff).await.unwrap();
        assert_eq!(zombies.len(), 1);
        assert_eq!(zombies[0].id, old_running.id);
    }

    #[tokio::test]
    async fn batch_counters() {
        let dir = tempfile::tempdir().unwrap();
        let store = BatchStore::new(dir.path()).unwrap();

        let mut batch = Batch::new("u1", 3);
        batch.task_ids = vec!["a".into(), "b".into(), "c".into()];
        let id = batch.id.clone();
        store.insert_one(&batch).await.unwrap();

        store.record_outcome(&id, TaskStatus::Completed).await.unwrap();
        store.record_outcome(&id, TaskStatus::Failed).await.unwrap();

        let found = store.find_one(&id).await.unwrap().unwrap();
        assert_eq!(found.completed, 1);
        assert_eq!(found.failed, 1);
        assert!(!found.is_settled());

        store.record_outcome(&id, TaskStatus::Cancelled).await.unwrap();
        let found = store.find_one(&id).await.unwrap().unwrap();
        assert!(found.is_settled());
        assert_eq!(found.progress(), 100);
    }
}
