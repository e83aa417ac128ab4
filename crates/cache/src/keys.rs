//! Cache key layout, centralized so every component agrees on it.

/// FIFO list of task ids waiting for a worker.
pub const READY_LIST: &str = "tg:ready";

/// Set of task ids currently in processing (global admission ceiling).
pub const SET_PROCESSING: &str = "tg:processing";

/// Terminal outcome sets, kept for queue statistics.
pub const SET_COMPLETED: &str = "tg:completed";
pub const SET_FAILED: &str = "tg:failed";

/// Lock taken by the cleanup pass so only one worker scans at a time.
pub const CLEANUP_LOCK: &str = "tg:cleanup:lock";

const TASK_PREFIX: &str = "tg:task:";
const PROGRESS_PREFIX: &str = "tg:progress:";
const USER_PROCESSING_PREFIX: &str = "tg:user_processing:";
const VISIBILITY_PREFIX: &str = "tg:visibility:";
const WORKER_PREFIX: &str = "tg:worker:";

/// Hash mirroring queue-facing task fields (id, user, symbol, status).
pub fn task(task_id: &str) -> String {
    format!("{TASK_PREFIX}{task_id}")
}

/// Serialized progress snapshot for one task.
pub fn progress(task_id: &str) -> String {
    format!("{PROGRESS_PREFIX}{task_id}")
}

/// Set of task ids one user has in processing (per-user admission ceiling).
pub fn user_processing(user_id: &str) -> String {
    format!("{USER_PROCESSING_PREFIX}{user_id}")
}

/// Claim record: which worker holds the task and when the claim expires.
pub fn visibility(task_id: &str) -> String {
    format!("{VISIBILITY_PREFIX}{task_id}")
}

/// Prefix covering every visibility record (cleanup scan).
pub fn visibility_prefix() -> &'static str {
    VISIBILITY_PREFIX
}

/// Worker liveness key; expires on its own when the worker dies.
pub fn worker_heartbeat(worker_id: &str) -> String {
    format!("{WORKER_PREFIX}{worker_id}:heartbeat")
}
