//! AppState construction and router assembly.
//!
//! Everything process-wide is created here, once, and handed out by
//! reference — no module-level singletons.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tg_cache::{FastCache, MemoryCache, RedisCache};
use tg_domain::config::Config;
use tg_progress::ProgressStore;

use crate::api;
use crate::runtime::admission::AdmissionController;
use crate::runtime::events::TaskEventBus;
use crate::runtime::pipeline::{AnalysisPipeline, SimulatedPipeline};
use crate::runtime::queue::QueueService;
use crate::runtime::registry::TaskRegistry;
use crate::state::AppState;
use crate::store::{BatchStore, TaskDocStore};

/// Initialize every subsystem and return a fully-wired [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let (cache, cache_backend) = build_cache(&config).await;

    let state_path = &config.store.state_path;
    let task_store = Arc::new(TaskDocStore::new(state_path)?);
    let batch_store = Arc::new(BatchStore::new(state_path)?);
    let progress_store = Arc::new(ProgressStore::new(
        cache.clone(),
        state_path,
        Duration::from_secs(config.cache.progress_ttl_secs),
    ));

    let admission = Arc::new(AdmissionController::new(
        cache.clone(),
        config.queue.user_concurrent_limit,
        config.queue.global_concurrent_limit,
        Duration::from_secs(config.queue.visibility_timeout_secs),
    ));
    let queue = Arc::new(QueueService::new(cache.clone(), admission.clone()));

    let pipeline = build_pipeline(&config);

    Ok(AppState {
        config,
        cache,
        cache_backend,
        task_store,
        batch_store,
        progress_store,
        registry: Arc::new(TaskRegistry::new()),
        admission,
        queue,
        events: Arc::new(TaskEventBus::new()),
        pipeline,
    })
}

/// Connect the configured cache backend; an unreachable Redis degrades
/// to the in-process cache with a warning rather than aborting startup.
async fn build_cache(config: &Config) -> (Arc<dyn FastCache>, &'static str) {
    if config.cache.redis_enabled {
        match RedisCache::connect(&config.cache.redis_url).await {
            Ok(cache) => return (Arc::new(cache), "redis"),
            Err(e) => {
                tracing::warn!(error = %e, "redis unreachable, using in-process cache");
            }
        }
    }
    (Arc::new(MemoryCache::new()), "memory")
}

fn build_pipeline(config: &Config) -> Arc<dyn AnalysisPipeline> {
    // The simulated driver is the only built-in engine; a real analysis
    // engine links in through the same trait.
    if !config.pipeline.simulate {
        tracing::warn!("no analysis engine linked; falling back to the simulated driver");
    }
    Arc::new(SimulatedPipeline::new(Duration::from_millis(
        config.pipeline.simulate_stage_delay_ms,
    )))
}

/// Assemble the HTTP router over the shared state.
pub fn build_router(state: AppState) -> Router {
    api::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
