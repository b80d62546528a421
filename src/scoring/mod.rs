//! Decay & idempotency orchestrator
//!
//! The top-level daily state machine. Per calendar day exactly one of
//! three paths runs: return the existing snapshot, persist a decay
//! step, or run the full evidence → fan-out → consensus pipeline.
//! The orchestrator is stateless per invocation — everything it needs
//! is loaded from the store at the start.

use crate::config::ScoringPolicy;
use crate::consensus;
use crate::error::IndexError;
use crate::external::{external_snapshot_map, staleness_flags};
use crate::models::{
    DailyUpdateOutcome, DataQualityFlag, EvidenceItem, ModelAgreement, Pillar, PillarScores,
    ScoreSnapshot, ScoreUpdate,
};
use crate::prompt::{compose_prompt, prompt_hash, PromptInputs, HISTORY_WINDOW_DAYS};
use crate::providers::{call_providers, ProviderClient};
use crate::retry::RetryPolicy;
use crate::state::StateStore;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Sentinel prompt hash recorded on decay days, when no packet is
/// composed and no provider is invoked.
pub const DECAY_PROMPT_HASH: &str = "0000000000000000";

/// Everything one scoring round works from, loaded up front so the
/// consensus/decay logic stays testable without a live store.
#[derive(Debug)]
pub struct EvidenceContext {
    pub today: NaiveDate,
    pub previous: Option<ScoreSnapshot>,
    pub history: Vec<ScoreSnapshot>,
    pub evidence: Vec<EvidenceItem>,
    pub external: BTreeMap<String, Value>,
    pub external_flags: Vec<DataQualityFlag>,
}

/// Coordinates the daily update across store, providers and policy.
pub struct ScoreOrchestrator {
    store: Arc<dyn StateStore>,
    providers: Vec<Arc<dyn ProviderClient>>,
    policy: ScoringPolicy,
    retry: RetryPolicy,
}

impl ScoreOrchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        providers: Vec<Arc<dyn ProviderClient>>,
        policy: ScoringPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            providers,
            policy,
            retry,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// The daily entrypoint. Idempotent per calendar day.
    pub async fn run_daily_update(&self, today: NaiveDate) -> Result<DailyUpdateOutcome> {
        // Path 1: the day is already scored — zero provider calls.
        if let Some(existing) = self.store.snapshot_for(today).await? {
            info!(date = %today, score = existing.score, "snapshot already exists");
            return Ok(outcome(&existing, true));
        }

        let previous = self.store.latest_snapshot().await?;
        let since = previous
            .as_ref()
            .map(|s| s.created_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let evidence = self.store.unscored_evidence(since).await?;

        // Path 2: nothing new arrived — decay instead of scoring.
        if evidence.is_empty() {
            let snapshot = self.decay_snapshot(previous.as_ref(), today);
            info!(
                date = %today,
                score = snapshot.score,
                delta = snapshot.delta,
                "no new evidence, persisting decay snapshot"
            );
            return self.persist(snapshot).await;
        }

        // Path 3: the full pipeline.
        let ctx = self.load_context(today, previous, evidence).await?;
        let update = self.run_scoring(&ctx).await?;
        let snapshot = self.apply_update(&ctx, &update);

        self.store
            .record_prompt(&update.prompt_hash, &update.prompt_text, snapshot.created_at)
            .await?;

        self.persist(snapshot).await
    }

    /// Admin rescore: drop today's snapshot and dependents, then
    /// unconditionally run the full scoring path.
    pub async fn rescore(&self, today: NaiveDate) -> Result<DailyUpdateOutcome> {
        let removed = self.store.delete_snapshot(today).await?;
        if removed {
            info!(date = %today, "existing snapshot deleted for rescore");
        }

        let previous = self.store.latest_snapshot().await?;
        let since = previous
            .as_ref()
            .map(|s| s.created_at)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let evidence = self.store.unscored_evidence(since).await?;

        let ctx = self.load_context(today, previous, evidence).await?;
        let update = self.run_scoring(&ctx).await?;
        let snapshot = self.apply_update(&ctx, &update);

        self.store
            .record_prompt(&update.prompt_hash, &update.prompt_text, snapshot.created_at)
            .await?;

        self.persist(snapshot).await
    }

    /// Compose the packet, fan out, validate, aggregate. Telemetry is
    /// recorded even when every provider fails.
    pub async fn run_scoring(&self, ctx: &EvidenceContext) -> Result<ScoreUpdate> {
        let (current, technical, economic) = self.baseline(ctx.previous.as_ref());

        let inputs = PromptInputs {
            current_score: current,
            score_technical: technical,
            score_economic: economic,
            history: &ctx.history,
            evidence: &ctx.evidence,
            external: &ctx.external,
        };
        let prompt = compose_prompt(&inputs);
        let hash = prompt_hash(&prompt);

        let fan_out = call_providers(&self.providers, &prompt, &self.retry).await?;

        self.store.record_usage(&fan_out.usage).await?;

        if fan_out.scores.is_empty() {
            return Err(IndexError::AllProvidersFailed(format!(
                "0 of {} providers produced a usable judgment",
                fan_out.configured
            )));
        }

        let mut flags = ctx.external_flags.clone();
        if ctx.evidence.len() < self.policy.min_evidence_items {
            flags.push(DataQualityFlag::SparseEvidence);
        }
        if populated_pillars(&ctx.evidence) < self.policy.min_populated_pillars {
            flags.push(DataQualityFlag::FewPillarsPopulated);
        }
        if fan_out.scores.len() < fan_out.configured {
            flags.push(DataQualityFlag::DegradedConsensus);
        }

        let mut update = consensus::aggregate(
            fan_out.scores,
            &self.policy,
            hash,
            prompt,
            flags,
            fan_out.usage,
        );
        update.capability_gap = capability_gap(&ctx.external);

        Ok(update)
    }

    /// Load everything one scoring round needs from the store.
    pub async fn load_context(
        &self,
        today: NaiveDate,
        previous: Option<ScoreSnapshot>,
        evidence: Vec<EvidenceItem>,
    ) -> Result<EvidenceContext> {
        let history = self.store.history(HISTORY_WINDOW_DAYS).await?;
        let latest_external = self.store.latest_external().await?;

        let external_flags = staleness_flags(
            &latest_external,
            Utc::now(),
            self.policy.external_stale_after_hours,
        );
        let external = external_snapshot_map(&latest_external);

        Ok(EvidenceContext {
            today,
            previous,
            history,
            evidence,
            external,
            external_flags,
        })
    }

    fn baseline(&self, previous: Option<&ScoreSnapshot>) -> (f64, f64, f64) {
        match previous {
            Some(prev) => (prev.score, prev.score_technical, prev.score_economic),
            None => (
                self.policy.initial_score,
                self.policy.initial_score,
                self.policy.initial_score,
            ),
        }
    }

    /// Apply a consensus update to the previous score. The composite
    /// moves to a whole point; sub-scores move at one decimal.
    fn apply_update(&self, ctx: &EvidenceContext, update: &ScoreUpdate) -> ScoreSnapshot {
        let (prev_score, prev_technical, prev_economic) = self.baseline(ctx.previous.as_ref());
        let floor = self.policy.score_floor;
        let ceiling = self.policy.score_ceiling;

        ScoreSnapshot {
            date: ctx.today,
            score: (prev_score + update.delta).round().clamp(floor, ceiling),
            score_technical: round1(prev_technical + update.technical_delta)
                .clamp(floor, ceiling),
            score_economic: round1(prev_economic + update.economic_delta).clamp(floor, ceiling),
            delta: update.delta,
            delta_explanation: update.delta_explanation.clone(),
            analysis: update.analysis.clone(),
            signals: update.signals.clone(),
            pillar_scores: update.pillar_scores,
            model_scores: update.model_scores.clone(),
            model_agreement: update.agreement,
            model_spread: update.spread,
            capability_gap: update.capability_gap,
            prompt_hash: update.prompt_hash.clone(),
            external_data: (!ctx.external.is_empty()).then(|| ctx.external.clone()),
            is_decay: false,
            data_quality_flags: update.data_quality_flags.clone(),
            created_at: Utc::now(),
        }
    }

    /// Build the decay-path snapshot: after enough silent days the
    /// score drifts one step toward the neutral target.
    fn decay_snapshot(&self, previous: Option<&ScoreSnapshot>, today: NaiveDate) -> ScoreSnapshot {
        let (prev_score, prev_technical, prev_economic) = self.baseline(previous);
        let pillar_scores = previous
            .map(|p| p.pillar_scores)
            .unwrap_or_else(PillarScores::default);
        let last_date = previous.map(|p| p.date).unwrap_or(today);

        let elapsed = (today - last_date).num_days();
        let distance = self.policy.decay_target - prev_score;

        let delta = if elapsed >= self.policy.decay_after_days
            && distance.abs() >= self.policy.decay_step
        {
            if distance > 0.0 {
                self.policy.decay_step
            } else {
                -self.policy.decay_step
            }
        } else {
            0.0
        };

        let analysis = if delta != 0.0 {
            format!(
                "No new evidence for {} days; the index drifts toward its neutral resting level.",
                elapsed
            )
        } else {
            "No new evidence since the last update; the index holds.".to_string()
        };

        ScoreSnapshot {
            date: today,
            score: round1(prev_score + delta)
                .clamp(self.policy.score_floor, self.policy.score_ceiling),
            score_technical: prev_technical,
            score_economic: prev_economic,
            delta,
            delta_explanation: None,
            analysis,
            signals: Vec::new(),
            pillar_scores,
            model_scores: Vec::new(),
            model_agreement: ModelAgreement::Partial,
            model_spread: 0.0,
            capability_gap: previous.and_then(|p| p.capability_gap),
            prompt_hash: DECAY_PROMPT_HASH.to_string(),
            external_data: None,
            is_decay: true,
            data_quality_flags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Insert, surfacing a lost same-date race as the existing
    /// snapshot rather than an error.
    async fn persist(&self, snapshot: ScoreSnapshot) -> Result<DailyUpdateOutcome> {
        match self.store.insert_snapshot(&snapshot).await {
            Ok(()) => Ok(outcome(&snapshot, false)),
            Err(IndexError::SnapshotExists(_)) => {
                warn!(date = %snapshot.date, "lost same-date insert race, returning winner");
                let existing = self
                    .store
                    .snapshot_for(snapshot.date)
                    .await?
                    .ok_or_else(|| {
                        IndexError::StateError(
                            "snapshot vanished after duplicate-date conflict".to_string(),
                        )
                    })?;
                Ok(outcome(&existing, true))
            }
            Err(e) => Err(e),
        }
    }
}

fn outcome(snapshot: &ScoreSnapshot, already_exists: bool) -> DailyUpdateOutcome {
    DailyUpdateOutcome {
        date: snapshot.date,
        score: snapshot.score,
        delta: snapshot.delta,
        already_exists,
    }
}

fn populated_pillars(evidence: &[EvidenceItem]) -> usize {
    Pillar::ALL
        .iter()
        .filter(|p| evidence.iter().any(|e| e.pillar == **p))
        .count()
}

/// Capability gap between the best benchmark run and a solved board,
/// derived from whichever external key carries a best_resolved figure.
fn capability_gap(external: &BTreeMap<String, Value>) -> Option<f64> {
    external.values().find_map(|value| {
        let best = value.get("best_resolved")?.as_f64()?;
        Some(round1(100.0 - best))
    })
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
