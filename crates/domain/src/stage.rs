//! Stage vocabulary spoken at the pipeline boundary.
//!
//! The pipeline reports progress by invoking its callback with one of
//! these identifiers, in stage order. The progress ledger maps each label
//! onto its cumulative weight boundary; no text matching is involved.

use serde::{Deserialize, Serialize};

use crate::task::Analyst;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stage labels
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageLabel {
    /// Symbol validation and data source checks.
    Preparation,
    /// API key / environment verification.
    Environment,
    /// Cost estimate for the requested depth.
    CostEstimate,
    /// Parameter and model selection.
    Parameters,
    /// Analysis engine initialization.
    EngineInit,
    /// One per requested analyst.
    Analyst(Analyst),
    BullResearcher,
    BearResearcher,
    /// 1-based debate round.
    DebateRound(u8),
    ResearchManager,
    TraderDecision,
    RiskAggressive,
    RiskConservative,
    RiskNeutral,
    RiskManager,
    SignalProcessing,
    ReportGeneration,
}

impl StageLabel {
    pub fn display_name(self) -> String {
        match self {
            Self::Preparation => "Preparation".to_string(),
            Self::Environment => "Environment Check".to_string(),
            Self::CostEstimate => "Cost Estimate".to_string(),
            Self::Parameters => "Parameter Setup".to_string(),
            Self::EngineInit => "Engine Startup".to_string(),
            Self::Analyst(a) => a.display_name().to_string(),
            Self::BullResearcher => "Bull Researcher".to_string(),
            Self::BearResearcher => "Bear Researcher".to_string(),
            Self::DebateRound(n) => format!("Research Debate Round {n}"),
            Self::ResearchManager => "Research Manager".to_string(),
            Self::TraderDecision => "Trader Decision".to_string(),
            Self::RiskAggressive => "Aggressive Risk Assessment".to_string(),
            Self::RiskConservative => "Conservative Risk Assessment".to_string(),
            Self::RiskNeutral => "Neutral Risk Assessment".to_string(),
            Self::RiskManager => "Risk Manager".to_string(),
            Self::SignalProcessing => "Signal Processing".to_string(),
            Self::ReportGeneration => "Report Generation".to_string(),
        }
    }

    pub fn description(self) -> String {
        match self {
            Self::Preparation => "Validate the symbol and check data source availability".to_string(),
            Self::Environment => "Verify API keys and runtime configuration".to_string(),
            Self::CostEstimate => "Estimate API cost for the requested depth".to_string(),
            Self::Parameters => "Configure analysis parameters and model selection".to_string(),
            Self::EngineInit => "Initialize the analysis engine".to_string(),
            Self::Analyst(a) => a.description().to_string(),
            Self::BullResearcher => "Build the bull case from analyst reports".to_string(),
            Self::BearResearcher => "Identify risks and weaknesses in the thesis".to_string(),
            Self::DebateRound(_) => "Bull and bear researchers debate in depth".to_string(),
            Self::ResearchManager => "Synthesize the debate into a research consensus".to_string(),
            Self::TraderDecision => "Turn the research consensus into a trading plan".to_string(),
            Self::RiskAggressive => "Assess risk from an aggressive stance".to_string(),
            Self::RiskConservative => "Assess risk from a conservative stance".to_string(),
            Self::RiskNeutral => "Assess risk from a neutral stance".to_string(),
            Self::RiskManager => "Consolidate risk views into control limits".to_string(),
            Self::SignalProcessing => "Process all outputs into a trading signal".to_string(),
            Self::ReportGeneration => "Assemble the final analysis report".to_string(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Progress updates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One progress event flowing from the pipeline into the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressUpdate {
    /// Free-text note. Updates the last message and timestamp only; never
    /// moves the percentage.
    Message(String),
    /// A pipeline stage has completed. Mapped to its cumulative weight
    /// boundary by the ledger.
    Stage(StageLabel),
    /// Explicit target percentage (0–100).
    Percent(f64),
}
