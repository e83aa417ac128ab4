//! Per-task event fan-out for SSE subscribers.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use tg_domain::task::TaskStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    #[serde(rename = "task.status")]
    StatusChanged { task_id: String, status: TaskStatus },
    #[serde(rename = "task.progress")]
    Progress {
        task_id: String,
        progress: f64,
        current_step: String,
        message: String,
    },
}

impl TaskEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusChanged { .. } => "task.status",
            Self::Progress { .. } => "task.progress",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::StatusChanged { status, .. } if status.is_terminal())
    }
}

#[derive(Default)]
pub struct TaskEventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<TaskEvent>>>,
}

impl TaskEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the broadcast channel for a task.
    pub fn subscribe(&self, task_id: &str) -> broadcast::Receiver<TaskEvent> {
        let mut channels = self.channels.write();
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(128).0)
            .subscribe()
    }

    /// Broadcast to all subscribers; a task nobody watches costs nothing.
    pub fn emit(&self, task_id: &str, event: TaskEvent) {
        let channels = self.channels.read();
        if let Some(tx) = channels.get(task_id) {
            let _ = tx.send(event);
        }
    }

    /// Drop the channel once a task is settled.
    pub fn cleanup(&self, task_id: &str) {
        self.channels.write().remove(task_id);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let bus = TaskEventBus::new();
        let mut rx = bus.subscribe("t1");

        bus.emit(
            "t1",
            TaskEvent::Progress {
                task_id: "t1".into(),
                progress: 27.5,
                current_step: "Fundamentals Analyst".into(),
                message: "analyst finished".into(),
            },
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind(), "task.progress");
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_noop() {
        let bus = TaskEventBus::new();
        bus.emit(
            "ghost",
            TaskEvent::StatusChanged {
                task_id: "ghost".into(),
                status: TaskStatus::Running,
            },
        );
        assert_eq!(bus.channel_count(), 0);
    }

    #[tokio::test]
    async fn terminal_event_detection_and_cleanup() {
        let bus = TaskEventBus::new();
        let mut rx = bus.subscribe("t1");
        bus.emit(
            "t1",
            TaskEvent::StatusChanged {
                task_id: "t1".into(),
                status: TaskStatus::Completed,
            },
        );
        assert!(rx.recv().await.unwrap().is_terminal());

        bus.cleanup("t1");
        assert_eq!(bus.channel_count(), 0);
    }
}
