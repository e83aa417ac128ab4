//! Task model — one analysis request and its lifecycle state.
//!
//! ```text
//! PENDING → RUNNING → COMPLETED
//!                   → FAILED
//!         → CANCELLED
//! ```
//!
//! Once terminal, a task's status never changes again; in particular a
//! CANCELLED task rejects a late completion from the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Analysis parameters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Analyst roles available in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Analyst {
    Market,
    Fundamentals,
    News,
    Social,
}

impl Analyst {
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Market => "Market Analyst",
            Self::Fundamentals => "Fundamentals Analyst",
            Self::News => "News Analyst",
            Self::Social => "Social Media Analyst",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Market => "Price action, volume and technical indicators",
            Self::Fundamentals => "Financials, profitability and growth",
            Self::News => "News flow, filings and sector events",
            Self::Social => "Social media discussion and retail sentiment",
        }
    }
}

/// Research depth — controls debate rounds and the duration estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchDepth {
    Fast,
    #[default]
    Standard,
    Comprehensive,
}

impl ResearchDepth {
    /// Number of bull/bear debate rounds for this depth.
    pub fn debate_rounds(self) -> usize {
        match self {
            Self::Fast => 1,
            Self::Standard => 2,
            Self::Comprehensive => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParameters {
    #[serde(default = "default_analysts")]
    pub selected_analysts: Vec<Analyst>,
    #[serde(default)]
    pub research_depth: ResearchDepth,
    #[serde(default = "default_provider")]
    pub llm_provider: String,
    /// Trade date to analyze (YYYY-MM-DD); defaults to today at execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_date: Option<String>,
}

fn default_analysts() -> Vec<Analyst> {
    vec![Analyst::Market, Analyst::Fundamentals]
}

fn default_provider() -> String {
    "dashscope".to_string()
}

impl Default for AnalysisParameters {
    fn default() -> Self {
        Self {
            selected_analysts: default_analysts(),
            research_depth: ResearchDepth::default(),
            llm_provider: default_provider(),
            analysis_date: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub status: TaskStatus,
    /// Overall progress, 0–100. Monotone while RUNNING.
    pub progress: u8,
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Advisory duration estimate, fixed at submission.
    pub estimated_duration_secs: f64,
    pub parameters: AnalysisParameters,
    /// Worker that claimed this task, while in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Present only when COMPLETED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Present only when FAILED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(
        user_id: impl Into<String>,
        symbol: impl Into<String>,
        parameters: AnalysisParameters,
        estimated_duration_secs: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            symbol: symbol.into(),
            batch_id: None,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: String::new(),
            message: "task created, waiting for a slot".to_string(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            estimated_duration_secs,
            parameters,
            worker_id: None,
            result: None,
            error: None,
        }
    }

    /// Apply a terminal transition, refusing to overwrite an existing one.
    ///
    /// Returns false (and leaves the task untouched) when the task is
    /// already terminal — once recorded, CANCELLED/COMPLETED/FAILED are
    /// immutable.
    pub fn finish(&mut self, status: TaskStatus) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        if status == TaskStatus::Completed {
            self.progress = 100;
        }
        true
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batch record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub user_id: String,
    pub submitted: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default)]
    pub cancelled: usize,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub task_ids: Vec<String>,
}

impl Batch {
    pub fn new(user_id: impl Into<String>, submitted: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            submitted,
            completed: 0,
            failed: 0,
            cancelled: 0,
            created_at: Utc::now(),
            task_ids: Vec::new(),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.completed + self.failed + self.cancelled >= self.submitted
    }

    /// Overall progress across member tasks, 0–100.
    pub fn progress(&self) -> u8 {
        if self.submitted == 0 {
            return 100;
        }
        let settled = self.completed + self.failed + self.cancelled;
        ((settled * 100) / self.submitted).min(100) as u8
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Symbol validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a stock symbol before any task state is created.
///
/// Accepted shapes: 6-digit A-share codes ("600519"), 1–5 letter US
/// tickers ("AAPL"), and 4–5 digit HK codes with suffix ("0700.HK").
pub fn validate_symbol(symbol: &str) -> Result<()> {
    let s = symbol.trim();
    if s.is_empty() {
        return Err(Error::Validation("symbol must not be empty".into()));
    }

    let a_share = s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit());
    let us = (1..=5).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_uppercase());
    let hk = s
        .strip_suffix(".HK")
        .map(|code| (4..=5).contains(&code.len()) && code.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);

    if a_share || us || hk {
        Ok(())
    } else {
        Err(Error::Validation(format!("unrecognized symbol: {s}")))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
