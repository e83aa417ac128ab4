//! Stage plan construction and duration estimation.
//!
//! Weights live on the 0–100 scale and always sum to exactly 100:
//!
//! ```text
//! preparation      10   (5 fixed sub-stages: 3/2/1/2/2)
//! analysts         35   (split equally across requested analysts)
//! debate           25   (bull + bear + N rounds + manager, equal split)
//! trader decision   8
//! risk assessment  15   (4 fixed stages)
//! finalization      7   (signal 4, report 3)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tg_domain::stage::StageLabel;
use tg_domain::task::AnalysisParameters;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Current,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub label: StageLabel,
    pub name: String,
    pub description: String,
    /// Share of the 0–100 scale this stage covers.
    pub weight: f64,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Stage {
    fn new(label: StageLabel, weight: f64) -> Self {
        Self {
            name: label.display_name(),
            description: label.description(),
            label,
            weight,
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan construction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PREP_WEIGHTS: [(StageLabel, f64); 5] = [
    (StageLabel::Preparation, 3.0),
    (StageLabel::Environment, 2.0),
    (StageLabel::CostEstimate, 1.0),
    (StageLabel::Parameters, 2.0),
    (StageLabel::EngineInit, 2.0),
];

const ANALYST_TOTAL: f64 = 35.0;
const DEBATE_TOTAL: f64 = 25.0;
const TRADER_WEIGHT: f64 = 8.0;
const RISK_EACH: f64 = 15.0 / 4.0;
const SIGNAL_WEIGHT: f64 = 4.0;
const REPORT_WEIGHT: f64 = 3.0;

/// Build the ordered stage plan for one task.
///
/// The plan is a pure function of the parameters; the weight sum is a
/// structural invariant asserted here.
pub fn build_plan(params: &AnalysisParameters) -> Vec<Stage> {
    let mut stages = Vec::new();

    for (label, weight) in PREP_WEIGHTS {
        stages.push(Stage::new(label, weight));
    }

    let analyst_count = params.selected_analysts.len().max(1);
    let analyst_weight = ANALYST_TOTAL / analyst_count as f64;
    for analyst in &params.selected_analysts {
        stages.push(Stage::new(StageLabel::Analyst(*analyst), analyst_weight));
    }
    if params.selected_analysts.is_empty() {
        // Degenerate request: keep the weight block so the scale still
        // reaches 100.
        stages.push(Stage::new(
            StageLabel::Analyst(tg_domain::task::Analyst::Market),
            analyst_weight,
        ));
    }

    let rounds = params.research_depth.debate_rounds();
    let debate_weight = DEBATE_TOTAL / (3 + rounds) as f64;
    stages.push(Stage::new(StageLabel::BullResearcher, debate_weight));
    stages.push(Stage::new(StageLabel::BearResearcher, debate_weight));
    for round in 1..=rounds {
        stages.push(Stage::new(
            StageLabel::DebateRound(round as u8),
            debate_weight,
        ));
    }
    stages.push(Stage::new(StageLabel::ResearchManager, debate_weight));

    stages.push(Stage::new(StageLabel::TraderDecision, TRADER_WEIGHT));

    stages.push(Stage::new(StageLabel::RiskAggressive, RISK_EACH));
    stages.push(Stage::new(StageLabel::RiskConservative, RISK_EACH));
    stages.push(Stage::new(StageLabel::RiskNeutral, RISK_EACH));
    stages.push(Stage::new(StageLabel::RiskManager, RISK_EACH));

    stages.push(Stage::new(StageLabel::SignalProcessing, SIGNAL_WEIGHT));
    stages.push(Stage::new(StageLabel::ReportGeneration, REPORT_WEIGHT));

    let total: f64 = stages.iter().map(|s| s.weight).sum();
    assert!(
        (total - 100.0).abs() < 1e-6,
        "stage weights must sum to 100, got {total}"
    );

    stages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Duration estimation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Advisory wall-clock estimate for a full run, in seconds.
///
/// Calibrated against observed runs; analysts overlap, so the multiplier
/// grows sublinearly. The result is fixed once computed — it is display
/// material, never a timeout.
pub fn estimate_total_secs(params: &AnalysisParameters) -> f64 {
    use tg_domain::task::ResearchDepth;

    let base = match params.research_depth {
        ResearchDepth::Fast => 150.0,
        ResearchDepth::Standard => 240.0,
        ResearchDepth::Comprehensive => 480.0,
    };

    let analyst_multiplier = match params.selected_analysts.len() {
        0 | 1 => 1.0,
        2 => 1.5,
        3 => 2.0,
        4 => 2.4,
        n => 2.4 + (n - 4) as f64 * 0.3,
    };

    let provider_multiplier = match params.llm_provider.as_str() {
        "deepseek" => 0.8,
        "google" => 1.2,
        _ => 1.0,
    };

    base * analyst_multiplier * provider_multiplier
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
