//! Weighted multi-stage progress tracking for analysis tasks.
//!
//! A [`ProgressLedger`] is built when a task starts running: the requested
//! analysts, research depth, and model provider deterministically expand
//! into a fixed stage plan whose weights sum to 100. Progress events from
//! the pipeline move a monotone percentage across the plan; the ledger
//! never moves backwards, and the duration estimate fixed at construction
//! only shrinks toward zero.
//!
//! [`ProgressStore`] persists snapshots to the fast cache, degrading to
//! local files when the cache is unreachable.

mod ledger;
mod plan;
mod store;

pub use ledger::{ProgressLedger, ProgressSnapshot};
pub use plan::{build_plan, estimate_total_secs, Stage, StageStatus};
pub use store::ProgressStore;
