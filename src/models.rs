//! Core data models for the consensus index

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// One of the five weighted sub-dimensions feeding the composite score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Capability,
    LabourMarket,
    Sentiment,
    Industry,
    Barriers,
}

impl Pillar {
    pub const ALL: [Pillar; 5] = [
        Pillar::Capability,
        Pillar::LabourMarket,
        Pillar::Sentiment,
        Pillar::Industry,
        Pillar::Barriers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Pillar::Capability => "capability",
            Pillar::LabourMarket => "labour_market",
            Pillar::Sentiment => "sentiment",
            Pillar::Industry => "industry",
            Pillar::Barriers => "barriers",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Pillar::Capability => "Capability",
            Pillar::LabourMarket => "Labour market",
            Pillar::Sentiment => "Sentiment",
            Pillar::Industry => "Industry adoption",
            Pillar::Barriers => "Barriers",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

/// Consensus strength classified from the spread of provider deltas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelAgreement {
    Agree,
    MostlyAgree,
    Disagree,
    Partial,
}

impl fmt::Display for ModelAgreement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModelAgreement::Agree => "agree",
            ModelAgreement::MostlyAgree => "mostly_agree",
            ModelAgreement::Disagree => "disagree",
            ModelAgreement::Partial => "partial",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityFlag {
    ExternalDataMissing,
    ExternalDataStale,
    SparseEvidence,
    FewPillarsPopulated,
    DegradedConsensus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Success,
    Failed,
    Skipped,
}

//
// ================= Pillar Scores =================
//

/// Fixed 5-key pillar map. Provider values live in [-5, 5].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PillarScores {
    pub capability: f64,
    pub labour_market: f64,
    pub sentiment: f64,
    pub industry: f64,
    pub barriers: f64,
}

impl PillarScores {
    pub fn get(&self, pillar: Pillar) -> f64 {
        match pillar {
            Pillar::Capability => self.capability,
            Pillar::LabourMarket => self.labour_market,
            Pillar::Sentiment => self.sentiment,
            Pillar::Industry => self.industry,
            Pillar::Barriers => self.barriers,
        }
    }

    pub fn set(&mut self, pillar: Pillar, value: f64) {
        match pillar {
            Pillar::Capability => self.capability = value,
            Pillar::LabourMarket => self.labour_market = value,
            Pillar::Sentiment => self.sentiment = value,
            Pillar::Industry => self.industry = value,
            Pillar::Barriers => self.barriers = value,
        }
    }

    /// Number of pillars carrying a non-zero value.
    pub fn populated_count(&self) -> usize {
        Pillar::ALL
            .iter()
            .filter(|p| self.get(**p).abs() > f64::EPSILON)
            .count()
    }

    pub fn clamped(mut self, lo: f64, hi: f64) -> Self {
        for pillar in Pillar::ALL {
            self.set(pillar, self.get(pillar).clamp(lo, hi));
        }
        self
    }
}

//
// ================= Signals =================
//

/// A single piece of cited evidence attached to a score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub text: String,
    pub direction: Direction,
    pub source: String,
    /// Impact on the index, in [-5, 5].
    pub impact: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

//
// ================= Model Score =================
//

/// One provider's judgment. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScore {
    pub provider_id: String,
    pub pillar_scores: PillarScores,
    pub technical_delta: f64,
    pub economic_delta: f64,
    pub suggested_delta: f64,
    pub analysis: String,
    pub top_signals: Vec<Signal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

//
// ================= Evidence =================
//

/// An ingested article/event routed to a pillar by the feed collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub pillar: Pillar,
    pub title: String,
    pub summary: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub published_at: DateTime<Utc>,
}

//
// ================= Score Snapshot =================
//

/// The daily record. Invariant: at most one per calendar date,
/// score and sub-scores within [5, 95].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub date: NaiveDate,
    pub score: f64,
    pub score_technical: f64,
    pub score_economic: f64,
    pub delta: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_explanation: Option<String>,
    pub analysis: String,
    pub signals: Vec<Signal>,
    pub pillar_scores: PillarScores,
    pub model_scores: Vec<ModelScore>,
    pub model_agreement: ModelAgreement,
    pub model_spread: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_gap: Option<f64>,
    pub prompt_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_data: Option<BTreeMap<String, serde_json::Value>>,
    pub is_decay: bool,
    pub data_quality_flags: Vec<DataQualityFlag>,
    pub created_at: DateTime<Utc>,
}

//
// ================= External Data =================
//

/// Append-only external indicator history. "Latest" is the most recent
/// `fetched_at` per key; a same-day re-fetch updates that day's row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDataPoint {
    pub key: String,
    pub value: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

//
// ================= Prompt Version =================
//

/// Content-addressed record of every prompt ever sent. Write-once per hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptVersion {
    pub hash: String,
    pub prompt_text: String,
    pub first_used: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

//
// ================= Cron Run =================
//

/// Audit row for a scheduled tick. A date counts as completed only if
/// both phases succeeded on that date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRun {
    pub id: Uuid,
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub fetch_status: PhaseStatus,
    pub score_status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CronRun {
    pub fn succeeded(&self) -> bool {
        self.fetch_status == PhaseStatus::Success && self.score_status == PhaseStatus::Success
    }
}

//
// ================= Provider Usage =================
//

/// Usage/latency telemetry, always recorded — including a synthetic
/// failure row when retries are exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider_id: String,
    pub latency_ms: u64,
    pub success: bool,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub recorded_at: DateTime<Utc>,
}

//
// ================= Consensus Output =================
//

/// The merged result of one scoring round, before it is applied to the
/// previous day's score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreUpdate {
    /// Dampened composite delta — the single daily-movement cap applies here.
    pub delta: f64,
    pub technical_delta: f64,
    pub economic_delta: f64,
    pub analysis: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_explanation: Option<String>,
    pub signals: Vec<Signal>,
    pub pillar_scores: PillarScores,
    pub model_scores: Vec<ModelScore>,
    pub agreement: ModelAgreement,
    pub spread: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_gap: Option<f64>,
    pub prompt_hash: String,
    pub prompt_text: String,
    pub data_quality_flags: Vec<DataQualityFlag>,
    pub usage: Vec<ProviderUsage>,
}

//
// ================= Daily Outcome =================
//

/// What `run_daily_update` reports back to admin/scheduler callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyUpdateOutcome {
    pub date: NaiveDate,
    pub score: f64,
    pub delta: f64,
    pub already_exists: bool,
}
