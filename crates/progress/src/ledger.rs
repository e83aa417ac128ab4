//! The per-task progress ledger.
//!
//! Owned by the worker executing the task; readers see it only through
//! [`ProgressSnapshot`]s. The recorded percentage and the current-stage
//! pointer are monotone: a stale or duplicate event can update the last
//! message but never moves progress backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tg_domain::stage::{ProgressUpdate, StageLabel};
use tg_domain::task::{AnalysisParameters, TaskStatus};

use crate::plan::{build_plan, estimate_total_secs, Stage, StageStatus};

const EPS: f64 = 1e-9;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ProgressLedger {
    task_id: String,
    stages: Vec<Stage>,
    progress_pct: f64,
    status: TaskStatus,
    last_message: String,
    failure_reason: Option<String>,
    started_at: DateTime<Utc>,
    last_update: DateTime<Utc>,
    /// Fixed at construction; never revised upward.
    estimated_total_secs: f64,
}

impl ProgressLedger {
    pub fn new(task_id: impl Into<String>, params: &AnalysisParameters) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            stages: build_plan(params),
            progress_pct: 0.0,
            status: TaskStatus::Running,
            last_message: "analysis started".to_string(),
            failure_reason: None,
            started_at: now,
            last_update: now,
            estimated_total_secs: estimate_total_secs(params),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn progress_pct(&self) -> f64 {
        self.progress_pct
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn estimated_total_secs(&self) -> f64 {
        self.estimated_total_secs
    }

    /// Index of the stage currently in flight: the first `current` stage,
    /// else the first `pending` one, else the last stage.
    pub fn current_index(&self) -> usize {
        if let Some(i) = self
            .stages
            .iter()
            .position(|s| s.status == StageStatus::Current)
        {
            return i;
        }
        if let Some(i) = self
            .stages
            .iter()
            .position(|s| s.status == StageStatus::Pending)
        {
            return i;
        }
        self.stages.len().saturating_sub(1)
    }

    // ── Updates ─────────────────────────────────────────────────────

    /// Apply one progress event.
    ///
    /// Message events move only the message and timestamp. Structured
    /// events may advance the percentage; a target at or below the
    /// recorded percentage is a regression and degrades to a message-only
    /// update. Events after finalization are ignored.
    pub fn update(&mut self, update: ProgressUpdate) {
        if self.status.is_terminal() {
            tracing::debug!(task_id = %self.task_id, "progress event after finalization ignored");
            return;
        }

        let now = Utc::now();
        self.last_update = now;

        match update {
            ProgressUpdate::Message(message) => {
                self.last_message = message;
            }
            ProgressUpdate::Stage(label) => {
                match self.stage_end_boundary(label) {
                    Some(pct) => {
                        self.last_message = label.display_name();
                        self.advance_to(pct, now);
                    }
                    None => {
                        // Label not in this task's plan (e.g. an analyst
                        // that was not requested) — treat as a note.
                        tracing::debug!(
                            task_id = %self.task_id,
                            stage = ?label,
                            "stage label outside plan"
                        );
                        self.last_message = label.display_name();
                    }
                }
            }
            ProgressUpdate::Percent(pct) => {
                self.advance_to(pct.clamp(0.0, 100.0), now);
            }
        }
    }

    /// Cumulative weight boundary at the end of the labeled stage.
    fn stage_end_boundary(&self, label: StageLabel) -> Option<f64> {
        let mut cumulative = 0.0;
        for stage in &self.stages {
            cumulative += stage.weight;
            if stage.label == label {
                return Some(cumulative);
            }
        }
        None
    }

    fn advance_to(&mut self, pct: f64, now: DateTime<Utc>) {
        if pct <= self.progress_pct + EPS {
            // Regression guard: message/timestamp were already updated,
            // percentage and stage statuses stay put.
            return;
        }
        self.progress_pct = pct.min(100.0);
        self.restate_stages(now);
    }

    /// Recompute every stage's status from the cumulative boundaries.
    /// Timestamps are set exactly once per transition.
    fn restate_stages(&mut self, now: DateTime<Utc>) {
        let pct = self.progress_pct;
        let mut cumulative = 0.0;
        for stage in &mut self.stages {
            let start = cumulative;
            let end = cumulative + stage.weight;

            if pct >= end - EPS {
                if stage.status != StageStatus::Completed && stage.status != StageStatus::Failed {
                    stage.status = StageStatus::Completed;
                    stage.started_at.get_or_insert(now);
                    stage.ended_at.get_or_insert(now);
                }
            } else if pct > start + EPS {
                if stage.status != StageStatus::Current {
                    stage.status = StageStatus::Current;
                    stage.started_at.get_or_insert(now);
                }
            }
            // Stages past the boundary stay pending (or failed).

            cumulative = end;
        }
    }

    // ── Finalization ────────────────────────────────────────────────

    /// Finalize as completed: every non-failed stage becomes completed and
    /// the percentage jumps to 100. No-op when already finalized.
    pub fn mark_completed(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        self.progress_pct = 100.0;
        self.status = TaskStatus::Completed;
        self.last_message = "analysis completed".to_string();
        self.last_update = now;
        for stage in &mut self.stages {
            if stage.status != StageStatus::Failed {
                stage.status = StageStatus::Completed;
                stage.started_at.get_or_insert(now);
                stage.ended_at.get_or_insert(now);
            }
        }
    }

    /// Finalize as failed. The partial percentage is preserved for
    /// diagnostics; unfinished stages are marked failed.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        let now = Utc::now();
        let reason = reason.into();
        self.status = TaskStatus::Failed;
        self.last_message = reason.clone();
        self.failure_reason = Some(reason);
        self.last_update = now;
        for stage in &mut self.stages {
            if stage.status != StageStatus::Completed && stage.status != StageStatus::Failed {
                stage.status = StageStatus::Failed;
                stage.ended_at.get_or_insert(now);
            }
        }
    }

    // ── Snapshot ────────────────────────────────────────────────────

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = Utc::now();
        let current = self.current_index();
        let (name, description) = self
            .stages
            .get(current)
            .map(|s| (s.name.clone(), s.description.clone()))
            .unwrap_or_default();

        let mut snapshot = ProgressSnapshot {
            task_id: self.task_id.clone(),
            status: self.status,
            progress_pct: self.progress_pct,
            current_step: current,
            current_step_name: name,
            current_step_description: description,
            last_message: self.last_message.clone(),
            failure_reason: self.failure_reason.clone(),
            started_at: self.started_at,
            last_update: self.last_update,
            elapsed_secs: 0.0,
            remaining_secs: 0.0,
            estimated_total_secs: self.estimated_total_secs,
            steps: self.stages.clone(),
        };
        snapshot.refresh_times(now);
        snapshot
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serializable view of a ledger, stored in the cache / fallback files
/// and merged by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub task_id: String,
    pub status: TaskStatus,
    pub progress_pct: f64,
    pub current_step: usize,
    pub current_step_name: String,
    pub current_step_description: String,
    pub last_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub remaining_secs: f64,
    pub estimated_total_secs: f64,
    pub steps: Vec<Stage>,
}

impl ProgressSnapshot {
    /// Recompute the clock-derived fields against `now`.
    ///
    /// The total estimate is fixed: while running, remaining shrinks
    /// toward zero and may be overtaken by actual elapsed time without
    /// the estimate moving. At 100% the estimate collapses to elapsed.
    pub fn refresh_times(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.elapsed_secs = elapsed;
        if self.progress_pct >= 100.0 {
            self.estimated_total_secs = elapsed;
            self.remaining_secs = 0.0;
        } else {
            self.remaining_secs = (self.estimated_total_secs - elapsed).max(0.0);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use tg_domain::task::{Analyst, ResearchDepth};

    fn standard_two_analysts() -> AnalysisParameters {
        AnalysisParameters {
            selected_analysts: vec![Analyst::Market, Analyst::Fundamentals],
            research_depth: ResearchDepth::Standard,
            ..AnalysisParameters::default()
        }
    }

    // ── Happy path ──────────────────────────────────────────────────

    #[test]
    fn stage_events_walk_the_boundaries() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        assert_eq!(ledger.progress_pct(), 0.0);

        ledger.update(ProgressUpdate::Stage(StageLabel::EngineInit));
        assert!((ledger.progress_pct() - 10.0).abs() < 1e-9);

        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(Analyst::Market)));
        assert!((ledger.progress_pct() - 27.5).abs() < 1e-9);

        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(
            Analyst::Fundamentals,
        )));
        assert!((ledger.progress_pct() - 45.0).abs() < 1e-9);

        ledger.update(ProgressUpdate::Stage(StageLabel::ResearchManager));
        assert!((ledger.progress_pct() - 70.0).abs() < 1e-9);

        ledger.update(ProgressUpdate::Stage(StageLabel::TraderDecision));
        assert!((ledger.progress_pct() - 78.0).abs() < 1e-9);

        ledger.update(ProgressUpdate::Stage(StageLabel::RiskManager));
        assert!((ledger.progress_pct() - 93.0).abs() < 1e-9);

        ledger.mark_completed();
        assert_eq!(ledger.progress_pct(), 100.0);
        assert_eq!(ledger.status(), TaskStatus::Completed);
        assert!(ledger
            .stages()
            .iter()
            .all(|s| s.status == StageStatus::Completed));
        assert!(ledger.stages().iter().all(|s| s.ended_at.is_some()));
    }

    #[test]
    fn completed_stages_get_timestamps_once() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Stage(StageLabel::EngineInit));
        let first_end = ledger.stages()[0].ended_at;
        assert!(first_end.is_some());

        std::thread::sleep(std::time::Duration::from_millis(5));
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(Analyst::Market)));
        assert_eq!(ledger.stages()[0].ended_at, first_end);
    }

    // ── Monotonicity ────────────────────────────────────────────────

    #[test]
    fn regression_guard_keeps_percentage() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Percent(60.0));
        assert!((ledger.progress_pct() - 60.0).abs() < 1e-9);
        let before_update = ledger.snapshot().last_update;

        std::thread::sleep(std::time::Duration::from_millis(5));
        ledger.update(ProgressUpdate::Percent(40.0));
        assert!((ledger.progress_pct() - 60.0).abs() < 1e-9);

        // The timestamp still moved.
        assert!(ledger.snapshot().last_update > before_update);
    }

    #[test]
    fn current_index_never_decreases() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        let updates = [50.0, 20.0, 70.0, 70.0, 10.0, 90.0];
        let mut last_index = 0;
        for pct in updates {
            ledger.update(ProgressUpdate::Percent(pct));
            let index = ledger.current_index();
            assert!(index >= last_index, "index regressed at {pct}");
            last_index = index;
        }
    }

    #[test]
    fn duplicate_and_out_of_order_events_are_harmless() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(
            Analyst::Fundamentals,
        )));
        let pct = ledger.progress_pct();

        // A late event for an earlier stage.
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(Analyst::Market)));
        assert!((ledger.progress_pct() - pct).abs() < 1e-9);

        // The same event twice.
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(
            Analyst::Fundamentals,
        )));
        assert!((ledger.progress_pct() - pct).abs() < 1e-9);
    }

    #[test]
    fn message_event_moves_nothing_but_message() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Percent(30.0));
        ledger.update(ProgressUpdate::Message("fetching fundamentals".into()));
        assert!((ledger.progress_pct() - 30.0).abs() < 1e-9);
        assert_eq!(ledger.snapshot().last_message, "fetching fundamentals");
    }

    #[test]
    fn unplanned_stage_label_updates_message_only() {
        let params = AnalysisParameters {
            selected_analysts: vec![Analyst::Market],
            ..AnalysisParameters::default()
        };
        let mut ledger = ProgressLedger::new("t1", &params);
        ledger.update(ProgressUpdate::Percent(20.0));

        // News analyst was not requested; its label is not in the plan.
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(Analyst::News)));
        assert!((ledger.progress_pct() - 20.0).abs() < 1e-9);
    }

    // ── Stage status boundaries ─────────────────────────────────────

    #[test]
    fn straddled_stage_is_current() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        // 20% sits inside the market analyst stage (10..27.5).
        ledger.update(ProgressUpdate::Percent(20.0));

        let stages = ledger.stages();
        // All five prep stages completed.
        assert!(stages[..5]
            .iter()
            .all(|s| s.status == StageStatus::Completed));
        assert_eq!(stages[5].status, StageStatus::Current);
        assert!(stages[5].started_at.is_some());
        assert!(stages[5].ended_at.is_none());
        assert!(stages[6..]
            .iter()
            .all(|s| s.status == StageStatus::Pending));

        assert_eq!(ledger.current_index(), 5);
    }

    // ── Finalization ────────────────────────────────────────────────

    #[test]
    fn mark_failed_preserves_partial_percentage() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Percent(45.0));
        ledger.mark_failed("provider timeout");

        assert_eq!(ledger.status(), TaskStatus::Failed);
        assert!((ledger.progress_pct() - 45.0).abs() < 1e-9);

        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.failure_reason.as_deref(), Some("provider timeout"));
        // Finished stages stay completed, the rest are failed.
        assert!(snapshot
            .steps
            .iter()
            .all(|s| matches!(s.status, StageStatus::Completed | StageStatus::Failed)));
    }

    #[test]
    fn finalization_is_exactly_once() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.mark_completed();
        ledger.mark_failed("too late");
        assert_eq!(ledger.status(), TaskStatus::Completed);
        assert_eq!(ledger.progress_pct(), 100.0);

        // Late progress events are ignored after finalization.
        ledger.update(ProgressUpdate::Percent(10.0));
        assert_eq!(ledger.progress_pct(), 100.0);
    }

    // ── Time estimates ──────────────────────────────────────────────

    #[test]
    fn snapshot_times_shrink_remaining_only() {
        let ledger = ProgressLedger::new("t1", &standard_two_analysts());
        let snapshot = ledger.snapshot();
        // Standard depth, two analysts: 240 * 1.5 = 360.
        assert!((snapshot.estimated_total_secs - 360.0).abs() < 1e-9);
        assert!(snapshot.remaining_secs <= snapshot.estimated_total_secs);
        assert!(snapshot.elapsed_secs >= 0.0);
    }

    #[test]
    fn refresh_times_is_exceedable() {
        let mut snapshot = ProgressLedger::new("t1", &standard_two_analysts()).snapshot();
        // Pretend the run started long ago: elapsed exceeds the estimate.
        snapshot.started_at = Utc::now() - chrono::Duration::seconds(1000);
        snapshot.refresh_times(Utc::now());
        assert!((snapshot.estimated_total_secs - 360.0).abs() < 1e-9);
        assert_eq!(snapshot.remaining_secs, 0.0);
        assert!(snapshot.elapsed_secs > snapshot.estimated_total_secs);
    }

    #[test]
    fn completed_snapshot_collapses_estimate_to_elapsed() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.mark_completed();
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.remaining_secs, 0.0);
        assert!((snapshot.estimated_total_secs - snapshot.elapsed_secs).abs() < 1e-9);
    }

    // ── Serde ───────────────────────────────────────────────────────

    #[test]
    fn snapshot_roundtrip() {
        let mut ledger = ProgressLedger::new("t1", &standard_two_analysts());
        ledger.update(ProgressUpdate::Stage(StageLabel::Analyst(Analyst::Market)));
        let snapshot = ledger.snapshot();

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: ProgressSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.task_id, "t1");
        assert!((back.progress_pct - 27.5).abs() < 1e-9);
        assert_eq!(back.steps.len(), snapshot.steps.len());
    }
}
