//! State persistence layer
//!
//! One trait for everything the orchestrator loads and persists. The
//! in-memory implementation backs development and tests; the Postgres
//! implementation is selected at startup when a database URL is
//! configured.

pub mod postgres;

pub use postgres::PostgresStateStore;

use crate::error::IndexError;
use crate::models::{
    CronRun, EvidenceItem, ExternalDataPoint, PromptVersion, ProviderUsage, ScoreSnapshot,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Trait for state persistence
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    async fn latest_snapshot(&self) -> Result<Option<ScoreSnapshot>>;
    async fn snapshot_for(&self, date: NaiveDate) -> Result<Option<ScoreSnapshot>>;
    /// Newest-first, at most `limit` snapshots.
    async fn history(&self, limit: usize) -> Result<Vec<ScoreSnapshot>>;
    /// Rejects a duplicate date with `SnapshotExists`.
    async fn insert_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<()>;
    /// Removes the snapshot and all dependent rows. Returns whether a
    /// snapshot existed.
    async fn delete_snapshot(&self, date: NaiveDate) -> Result<bool>;

    async fn add_evidence(&self, items: &[EvidenceItem]) -> Result<()>;
    async fn unscored_evidence(&self, since: DateTime<Utc>) -> Result<Vec<EvidenceItem>>;

    /// Append-only per key; a same-day re-fetch updates that day's row.
    async fn record_external(
        &self,
        key: &str,
        value: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<()>;
    /// Most recent point per key.
    async fn latest_external(&self) -> Result<BTreeMap<String, ExternalDataPoint>>;
    /// Newest-first history for one key.
    async fn external_history(&self, key: &str, limit: usize) -> Result<Vec<ExternalDataPoint>>;

    /// Insert-if-absent by hash; an existing hash only bumps last_used.
    async fn record_prompt(&self, hash: &str, text: &str, used_at: DateTime<Utc>) -> Result<()>;
    async fn prompt_version(&self, hash: &str) -> Result<Option<PromptVersion>>;

    async fn record_usage(&self, usage: &[ProviderUsage]) -> Result<()>;

    async fn record_cron_run(&self, run: &CronRun) -> Result<()>;
    /// True only if some run on this date succeeded in both phases.
    async fn run_completed(&self, date: NaiveDate) -> Result<bool>;
}

/// In-memory state store for development and tests
#[derive(Default)]
pub struct InMemoryStateStore {
    snapshots: Arc<RwLock<BTreeMap<NaiveDate, ScoreSnapshot>>>,
    evidence: Arc<RwLock<Vec<EvidenceItem>>>,
    external: Arc<RwLock<HashMap<String, Vec<ExternalDataPoint>>>>,
    prompts: Arc<RwLock<HashMap<String, PromptVersion>>>,
    usage: Arc<RwLock<Vec<ProviderUsage>>>,
    cron_runs: Arc<RwLock<Vec<CronRun>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: everything `record_usage` has seen.
    pub async fn recorded_usage(&self) -> Vec<ProviderUsage> {
        self.usage.read().await.clone()
    }
}

#[async_trait::async_trait]
impl StateStore for InMemoryStateStore {
    async fn latest_snapshot(&self) -> Result<Option<ScoreSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.values().next_back().cloned())
    }

    async fn snapshot_for(&self, date: NaiveDate) -> Result<Option<ScoreSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&date).cloned())
    }

    async fn history(&self, limit: usize) -> Result<Vec<ScoreSnapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.values().rev().take(limit).cloned().collect())
    }

    async fn insert_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        if snapshots.contains_key(&snapshot.date) {
            return Err(IndexError::SnapshotExists(snapshot.date.to_string()));
        }
        snapshots.insert(snapshot.date, snapshot.clone());
        Ok(())
    }

    async fn delete_snapshot(&self, date: NaiveDate) -> Result<bool> {
        let mut snapshots = self.snapshots.write().await;
        let existed = snapshots.remove(&date).is_some();

        if existed {
            // Dependent telemetry goes with the parent row.
            let mut usage = self.usage.write().await;
            usage.retain(|u| u.recorded_at.date_naive() != date);
        }

        Ok(existed)
    }

    async fn add_evidence(&self, items: &[EvidenceItem]) -> Result<()> {
        let mut evidence = self.evidence.write().await;
        evidence.extend_from_slice(items);
        Ok(())
    }

    async fn unscored_evidence(&self, since: DateTime<Utc>) -> Result<Vec<EvidenceItem>> {
        let evidence = self.evidence.read().await;
        Ok(evidence
            .iter()
            .filter(|item| item.published_at > since)
            .cloned()
            .collect())
    }

    async fn record_external(
        &self,
        key: &str,
        value: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut external = self.external.write().await;
        let points = external.entry(key.to_string()).or_default();

        let same_day = points
            .iter_mut()
            .find(|p| p.fetched_at.date_naive() == fetched_at.date_naive());

        match same_day {
            Some(point) => {
                point.value = value.clone();
                point.fetched_at = fetched_at;
            }
            None => points.push(ExternalDataPoint {
                key: key.to_string(),
                value: value.clone(),
                fetched_at,
            }),
        }

        points.sort_by(|a, b| b.fetched_at.cmp(&a.fetched_at));
        Ok(())
    }

    async fn latest_external(&self) -> Result<BTreeMap<String, ExternalDataPoint>> {
        let external = self.external.read().await;
        Ok(external
            .iter()
            .filter_map(|(key, points)| points.first().map(|p| (key.clone(), p.clone())))
            .collect())
    }

    async fn external_history(&self, key: &str, limit: usize) -> Result<Vec<ExternalDataPoint>> {
        let external = self.external.read().await;
        Ok(external
            .get(key)
            .map(|points| points.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn record_prompt(&self, hash: &str, text: &str, used_at: DateTime<Utc>) -> Result<()> {
        let mut prompts = self.prompts.write().await;
        prompts
            .entry(hash.to_string())
            .and_modify(|p| p.last_used = used_at)
            .or_insert_with(|| PromptVersion {
                hash: hash.to_string(),
                prompt_text: text.to_string(),
                first_used: used_at,
                last_used: used_at,
            });
        Ok(())
    }

    async fn prompt_version(&self, hash: &str) -> Result<Option<PromptVersion>> {
        let prompts = self.prompts.read().await;
        Ok(prompts.get(hash).cloned())
    }

    async fn record_usage(&self, rows: &[ProviderUsage]) -> Result<()> {
        let mut usage = self.usage.write().await;
        usage.extend_from_slice(rows);
        Ok(())
    }

    async fn record_cron_run(&self, run: &CronRun) -> Result<()> {
        let mut runs = self.cron_runs.write().await;
        runs.push(run.clone());
        Ok(())
    }

    async fn run_completed(&self, date: NaiveDate) -> Result<bool> {
        let runs = self.cron_runs.read().await;
        Ok(runs.iter().any(|run| run.date == date && run.succeeded()))
    }
}

/// Pick the store backend from the environment: Postgres when a
/// database URL is configured and the pool initializes, otherwise
/// in-memory.
pub fn build_state_store() -> Arc<dyn StateStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PostgresStateStore::connect_lazy(&url) {
            Ok(store) => {
                info!("State store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres state store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("State store backend: in-memory");
    Arc::new(InMemoryStateStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DataQualityFlag, ModelAgreement, PillarScores};
    use chrono::TimeZone;
    use serde_json::json;

    fn snapshot(date: &str, score: f64) -> ScoreSnapshot {
        ScoreSnapshot {
            date: date.parse().unwrap(),
            score,
            score_technical: score,
            score_economic: score,
            delta: 0.0,
            delta_explanation: None,
            analysis: "test".to_string(),
            signals: vec![],
            pillar_scores: PillarScores::default(),
            model_scores: vec![],
            model_agreement: ModelAgreement::Partial,
            model_spread: 0.0,
            capability_gap: None,
            prompt_hash: "0".repeat(16),
            external_data: None,
            is_decay: false,
            data_quality_flags: Vec::<DataQualityFlag>::new(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn duplicate_date_insert_is_rejected() {
        let store = InMemoryStateStore::new();
        store.insert_snapshot(&snapshot("2026-08-01", 33.0)).await.unwrap();

        let err = store
            .insert_snapshot(&snapshot("2026-08-01", 34.0))
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::SnapshotExists(_)));
    }

    #[tokio::test]
    async fn history_is_newest_first() {
        let store = InMemoryStateStore::new();
        store.insert_snapshot(&snapshot("2026-08-01", 33.0)).await.unwrap();
        store.insert_snapshot(&snapshot("2026-08-03", 35.0)).await.unwrap();
        store.insert_snapshot(&snapshot("2026-08-02", 34.0)).await.unwrap();

        let history = store.history(2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].date.to_string(), "2026-08-03");
        assert_eq!(history[1].date.to_string(), "2026-08-02");

        let latest = store.latest_snapshot().await.unwrap().unwrap();
        assert_eq!(latest.score, 35.0);
    }

    #[tokio::test]
    async fn same_day_external_refetch_updates_instead_of_duplicating() {
        let store = InMemoryStateStore::new();
        let morning = Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2026, 8, 1, 18, 0, 0).unwrap();

        store.record_external("benchmark", &json!(70.0), morning).await.unwrap();
        store.record_external("benchmark", &json!(71.0), evening).await.unwrap();

        let history = store.external_history("benchmark", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].value, json!(71.0));

        let next_day = Utc.with_ymd_and_hms(2026, 8, 2, 6, 0, 0).unwrap();
        store.record_external("benchmark", &json!(72.0), next_day).await.unwrap();

        let history = store.external_history("benchmark", 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, json!(72.0));
    }

    #[tokio::test]
    async fn prompt_record_is_write_once_per_hash() {
        let store = InMemoryStateStore::new();
        let first = Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2026, 8, 5, 6, 0, 0).unwrap();

        store.record_prompt("abcd", "packet v1", first).await.unwrap();
        store.record_prompt("abcd", "ignored rewrite", later).await.unwrap();

        let version = store.prompt_version("abcd").await.unwrap().unwrap();
        assert_eq!(version.prompt_text, "packet v1");
        assert_eq!(version.first_used, first);
        assert_eq!(version.last_used, later);
    }

    #[tokio::test]
    async fn run_completed_requires_both_phases() {
        let store = InMemoryStateStore::new();
        let date: NaiveDate = "2026-08-01".parse().unwrap();

        let partial = CronRun {
            id: uuid::Uuid::new_v4(),
            date,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            fetch_status: crate::models::PhaseStatus::Success,
            score_status: crate::models::PhaseStatus::Failed,
            error: Some("providers down".to_string()),
        };
        store.record_cron_run(&partial).await.unwrap();
        assert!(!store.run_completed(date).await.unwrap());

        let full = CronRun {
            id: uuid::Uuid::new_v4(),
            date,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            fetch_status: crate::models::PhaseStatus::Success,
            score_status: crate::models::PhaseStatus::Success,
            error: None,
        };
        store.record_cron_run(&full).await.unwrap();
        assert!(store.run_completed(date).await.unwrap());
    }

    #[tokio::test]
    async fn unscored_evidence_filters_by_time() {
        let store = InMemoryStateStore::new();
        let old = Utc.with_ymd_and_hms(2026, 7, 20, 6, 0, 0).unwrap();
        let new = Utc.with_ymd_and_hms(2026, 8, 1, 6, 0, 0).unwrap();

        let items = vec![
            EvidenceItem {
                pillar: crate::models::Pillar::Capability,
                title: "old".to_string(),
                summary: "old".to_string(),
                source: "feed".to_string(),
                url: None,
                published_at: old,
            },
            EvidenceItem {
                pillar: crate::models::Pillar::Industry,
                title: "new".to_string(),
                summary: "new".to_string(),
                source: "feed".to_string(),
                url: None,
                published_at: new,
            },
        ];
        store.add_evidence(&items).await.unwrap();

        let cutoff = Utc.with_ymd_and_hms(2026, 7, 25, 0, 0, 0).unwrap();
        let unscored = store.unscored_evidence(cutoff).await.unwrap();
        assert_eq!(unscored.len(), 1);
        assert_eq!(unscored[0].title, "new");
    }
}
