//! Process-wide application state.
//!
//! Built once at startup by [`crate::bootstrap`] and handed by reference
//! to every component — there are no module-level singletons. Everything
//! in here is cheap to clone (Arcs all the way down).

use std::sync::Arc;

use tg_cache::FastCache;
use tg_domain::config::Config;
use tg_progress::ProgressStore;

use crate::runtime::admission::AdmissionController;
use crate::runtime::events::TaskEventBus;
use crate::runtime::pipeline::AnalysisPipeline;
use crate::runtime::queue::QueueService;
use crate::runtime::registry::TaskRegistry;
use crate::store::{BatchStore, TaskDocStore};

/// Shared application state passed to all API handlers and worker loops.
///
/// Fields are grouped by concern:
/// - **Config** — immutable effective configuration
/// - **Stores** — fast cache, durable documents, progress snapshots
/// - **Runtime** — registry, admission, queue, events, pipeline
#[derive(Clone)]
pub struct AppState {
    // ── Config ────────────────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Stores ────────────────────────────────────────────────────────
    pub cache: Arc<dyn FastCache>,
    /// Which cache backend is live ("redis" or "memory"), for health.
    pub cache_backend: &'static str,
    pub task_store: Arc<TaskDocStore>,
    pub batch_store: Arc<BatchStore>,
    pub progress_store: Arc<ProgressStore>,

    // ── Runtime ───────────────────────────────────────────────────────
    pub registry: Arc<TaskRegistry>,
    pub admission: Arc<AdmissionController>,
    pub queue: Arc<QueueService>,
    pub events: Arc<TaskEventBus>,
    pub pipeline: Arc<dyn AnalysisPipeline>,
}
