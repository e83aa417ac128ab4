//! tradegate gateway — submission API, admission-controlled queue,
//! worker loop, and status reconciliation for stock-analysis tasks.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod runtime;
pub mod state;
pub mod store;
