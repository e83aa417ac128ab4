//! In-process task registry.
//!
//! The fastest and most current view of every task this process has
//! touched — and the only one that reflects same-process live updates
//! immediately. Lost on restart; the durable store is the system of
//! record.
//!
//! A single plain mutex guards all reads and writes. Progress updates can
//! originate from worker threads running outside the event loop, so the
//! lock must be acquirable from any thread; an event-loop-native lock
//! would not exclude them.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use tg_domain::task::{Task, TaskStatus};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        tasks.insert(task.id.clone(), task);
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    /// Update a task in place. Returns false when the id is unknown.
    pub fn update<F>(&self, task_id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.lock();
        match tasks.get_mut(task_id) {
            Some(task) => {
                f(task);
                true
            }
            None => false,
        }
    }

    /// Apply a terminal transition through the immutability guard.
    ///
    /// Returns false when the task is unknown or already terminal (a late
    /// completion after a cancel lands here and is dropped).
    pub fn finish(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(task_id) else {
            return false;
        };
        if !task.finish(status) {
            return false;
        }
        if status == TaskStatus::Completed {
            task.result = result;
        }
        if status == TaskStatus::Failed {
            task.error = error;
        }
        true
    }

    /// Filtered page, newest first. Returns (page, total matching).
    pub fn list(
        &self,
        user_id: Option<&str>,
        status: Option<TaskStatus>,
        limit: usize,
        offset: usize,
    ) -> (Vec<Task>, usize) {
        let tasks = self.tasks.lock();
        let mut matching: Vec<&Task> = tasks
            .values()
            .filter(|t| {
                user_id.map_or(true, |u| t.user_id == u)
                    && status.map_or(true, |s| t.status == s)
            })
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        (page, total)
    }

    pub fn remove(&self, task_id: &str) -> bool {
        self.tasks.lock().remove(task_id).is_some()
    }

    pub fn stats(&self) -> RegistryStats {
        let tasks = self.tasks.lock();
        let mut stats = RegistryStats {
            total_tasks: tasks.len(),
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            cancelled: 0,
        };
        for task in tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Drop terminal tasks older than the retention window. Returns the
    /// evicted ids so the caller can clean up per-task residue.
    pub fn evict_terminal(&self, older_than: Duration) -> Vec<String> {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.lock();
        let evicted: Vec<String> = tasks
            .values()
            .filter(|t| t.status.is_terminal() && t.ended_at.map_or(false, |at| at <= cutoff))
            .map(|t| t.id.clone())
            .collect();
        for id in &evicted {
            tasks.remove(id);
        }
        evicted
    }

    /// Force-fail non-terminal tasks running past the ceiling. Returns
    /// (task_id, user_id) for each reclaimed task so the caller can
    /// release its admission records.
    pub fn reclaim_zombies(&self, max_running_hours: i64) -> Vec<(String, String)> {
        let cutoff = Utc::now() - Duration::hours(max_running_hours);
        let message =
            format!("task timed out (running for more than {max_running_hours}h)");
        let mut reclaimed = Vec::new();

        let mut tasks = self.tasks.lock();
        for task in tasks.values_mut() {
            if task.status.is_terminal() {
                continue;
            }
            let anchor = task.started_at.unwrap_or(task.created_at);
            if anchor < cutoff && task.finish(TaskStatus::Failed) {
                task.error = Some(message.clone());
                task.message = message.clone();
                reclaimed.push((task.id.clone(), task.user_id.clone()));
            }
        }
        reclaimed
    }

    /// Non-terminal tasks older than the ceiling, without mutating them.
    pub fn peek_zombies(&self, max_running_hours: i64) -> Vec<Task> {
        let cutoff = Utc::now() - Duration::hours(max_running_hours);
        let tasks = self.tasks.lock();
        tasks
            .values()
            .filter(|t| {
                !t.status.is_terminal() && t.started_at.unwrap_or(t.created_at) < cutoff
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
