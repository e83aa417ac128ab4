use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fast cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// When false, the in-process cache is used instead of Redis.
    #[serde(default)]
    pub redis_enabled: bool,
    #[serde(default = "d_redis_url")]
    pub redis_url: String,
    /// TTL for progress snapshots in the cache.
    #[serde(default = "d_3600")]
    pub progress_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_enabled: false,
            redis_url: d_redis_url(),
            progress_ttl_secs: d_3600(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Durable store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root directory for durable state (task documents, progress fallback
    /// files).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Queue & admission
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max tasks a single user may have in processing at once.
    #[serde(default = "d_3")]
    pub user_concurrent_limit: usize,
    /// Max tasks in processing across all users.
    #[serde(default = "d_3")]
    pub global_concurrent_limit: usize,
    /// Seconds before an unacknowledged claim is considered abandoned.
    #[serde(default = "d_300")]
    pub visibility_timeout_secs: u64,
    /// Sleep between empty dequeue attempts.
    #[serde(default = "d_1000")]
    pub poll_interval_ms: u64,
    /// Interval between expired-claim cleanup passes.
    #[serde(default = "d_60")]
    pub cleanup_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            user_concurrent_limit: d_3(),
            global_concurrent_limit: d_3(),
            visibility_timeout_secs: d_300(),
            poll_interval_ms: d_1000(),
            cleanup_interval_secs: d_60(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Run the worker loop inside this process.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Independent poll loops in this process. Each executes one task at a
    /// time; admission still caps the effective parallelism.
    #[serde(default = "d_3")]
    pub concurrency: usize,
    /// Heartbeat publish interval; the heartbeat key TTL is twice this.
    #[serde(default = "d_30")]
    pub heartbeat_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: d_true(),
            concurrency: d_3(),
            heartbeat_interval_secs: d_30(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Retention & zombie reclamation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Terminal tasks older than this are evicted from the in-process
    /// registry.
    #[serde(default = "d_24")]
    pub max_task_age_hours: i64,
    /// Non-terminal tasks running longer than this are force-failed by the
    /// zombie sweep.
    #[serde(default = "d_2")]
    pub zombie_max_running_hours: i64,
    /// Interval between zombie sweeps.
    #[serde(default = "d_600")]
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_task_age_hours: d_24(),
            zombie_max_running_hours: d_2(),
            sweep_interval_secs: d_600(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Use the simulated pipeline driver instead of a linked analysis
    /// engine. The simulator walks the full stage vocabulary with a fixed
    /// per-stage delay.
    #[serde(default = "d_true")]
    pub simulate: bool,
    #[serde(default = "d_50")]
    pub simulate_stage_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            simulate: d_true(),
            simulate_stage_delay_ms: d_50(),
        }
    }
}

// ── Serde default helpers ───────────────────────────────────────────

fn d_host() -> String {
    "127.0.0.1".to_string()
}
fn d_port() -> u16 {
    8642
}
fn d_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}
fn d_state_path() -> PathBuf {
    PathBuf::from("./data")
}
fn d_true() -> bool {
    true
}
fn d_3() -> usize {
    3
}
fn d_2() -> i64 {
    2
}
fn d_24() -> i64 {
    24
}
fn d_30() -> u64 {
    30
}
fn d_50() -> u64 {
    50
}
fn d_60() -> u64 {
    60
}
fn d_300() -> u64 {
    300
}
fn d_600() -> u64 {
    600
}
fn d_1000() -> u64 {
    1000
}
fn d_3600() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.queue.user_concurrent_limit, 3);
        assert_eq!(config.queue.global_concurrent_limit, 3);
        assert_eq!(config.queue.visibility_timeout_secs, 300);
        assert_eq!(config.retention.zombie_max_running_hours, 2);
        assert!(config.worker.enabled);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let toml_str = r#"
            [server]
            port = 9000

            [queue]
            user_concurrent_limit = 5
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.queue.user_concurrent_limit, 5);
        assert_eq!(config.queue.global_concurrent_limit, 3);
    }

    #[test]
    fn empty_toml_is_default() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.cache.progress_ttl_secs, 3600);
        assert!(!config.cache.redis_enabled);
    }
}
