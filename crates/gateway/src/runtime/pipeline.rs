//! The analysis pipeline boundary.
//!
//! [`AnalysisPipeline::propagate`] is a long-running synchronous call —
//! minutes to tens of minutes against a real engine — so the worker runs
//! it on a blocking thread. It reports progress by invoking the callback
//! with [`ProgressUpdate`] values in stage order, returns the final
//! `(state, decision)` pair on success, and errors on failure.

use std::time::Duration;

use tg_domain::stage::{ProgressUpdate, StageLabel};
use tg_domain::task::Analyst;
use tg_domain::Result;

pub type ProgressCallback<'a> = &'a (dyn Fn(ProgressUpdate) + Send + Sync);

pub trait AnalysisPipeline: Send + Sync {
    /// Run the full multi-agent analysis for one symbol. Must be called
    /// off the event loop.
    fn propagate(
        &self,
        symbol: &str,
        trade_date: &str,
        progress: ProgressCallback<'_>,
        task_id: &str,
    ) -> Result<(serde_json::Value, serde_json::Value)>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Simulated driver
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Development driver used when no analysis engine is linked.
///
/// Walks the complete stage vocabulary with a fixed delay per stage; the
/// ledger silently skips labels outside a task's plan, so the reported
/// progress follows whatever plan the task was built with.
pub struct SimulatedPipeline {
    stage_delay: Duration,
}

impl SimulatedPipeline {
    pub fn new(stage_delay: Duration) -> Self {
        Self { stage_delay }
    }

    fn stage_walk() -> Vec<StageLabel> {
        let mut labels = vec![
            StageLabel::Preparation,
            StageLabel::Environment,
            StageLabel::CostEstimate,
            StageLabel::Parameters,
            StageLabel::EngineInit,
        ];
        for analyst in [
            Analyst::Market,
            Analyst::Fundamentals,
            Analyst::News,
            Analyst::Social,
        ] {
            labels.push(StageLabel::Analyst(analyst));
        }
        labels.extend([StageLabel::BullResearcher, StageLabel::BearResearcher]);
        for round in 1..=3 {
            labels.push(StageLabel::DebateRound(round));
        }
        labels.extend([
            StageLabel::ResearchManager,
            StageLabel::TraderDecision,
            StageLabel::RiskAggressive,
            StageLabel::RiskConservative,
            StageLabel::RiskNeutral,
            StageLabel::RiskManager,
            StageLabel::SignalProcessing,
            StageLabel::ReportGeneration,
        ]);
        labels
    }
}

impl AnalysisPipeline for SimulatedPipeline {
    fn propagate(
        &self,
        symbol: &str,
        trade_date: &str,
        progress: ProgressCallback<'_>,
        _task_id: &str,
    ) -> Result<(serde_json::Value, serde_json::Value)> {
        progress(ProgressUpdate::Message(format!(
            "starting analysis of {symbol} for {trade_date}"
        )));

        for label in Self::stage_walk() {
            if !self.stage_delay.is_zero() {
                std::thread::sleep(self.stage_delay);
            }
            progress(ProgressUpdate::Stage(label));
        }

        let state = serde_json::json!({
            "symbol": symbol,
            "trade_date": trade_date,
            "simulated": true,
        });
        let decision = serde_json::json!({
            "action": "hold",
            "confidence": 0.6,
            "risk_score": 0.4,
            "summary": format!("Simulated analysis of {symbol}: no position change recommended."),
        });
        Ok((state, decision))
    }
}
