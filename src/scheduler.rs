//! Daily scheduler
//!
//! One tick per period: skip dates that already completed, otherwise
//! run the fetch phase then the score phase and record a CronRun with
//! per-phase status. A partially-failed date is retried on the next
//! tick; the orchestrator's idempotency makes the retry safe.

use crate::external::ExternalDataCollector;
use crate::models::{CronRun, DailyUpdateOutcome, PhaseStatus};
use crate::scoring::ScoreOrchestrator;
use crate::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info};
use uuid::Uuid;

pub struct DailyScheduler {
    orchestrator: Arc<ScoreOrchestrator>,
    collector: ExternalDataCollector,
    tick_interval: Duration,
}

impl DailyScheduler {
    pub fn new(
        orchestrator: Arc<ScoreOrchestrator>,
        collector: ExternalDataCollector,
        tick_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            collector,
            tick_interval,
        }
    }

    /// Run forever, ticking at the configured interval. Tick failures
    /// are logged and self-heal on a later tick.
    pub async fn run(&self) {
        let mut ticker = interval(self.tick_interval);

        loop {
            ticker.tick().await;
            match self.tick(Utc::now()).await {
                Ok(Some(outcome)) => {
                    info!(
                        date = %outcome.date,
                        score = outcome.score,
                        delta = outcome.delta,
                        already_exists = outcome.already_exists,
                        "scheduled run finished"
                    );
                }
                Ok(None) => {}
                Err(e) => error!(error = %e, "scheduled run failed, next tick retries"),
            }
        }
    }

    /// One scheduled attempt for `now`'s calendar date. Returns `None`
    /// when the date already completed both phases.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Option<DailyUpdateOutcome>> {
        let date = now.date_naive();
        let store = self.orchestrator.store();

        if store.run_completed(date).await? {
            return Ok(None);
        }

        let started_at = now;

        // Fetch phase. A failure here does not block scoring — the
        // packet is built from the last known external data, flagged
        // stale — but the date will not count as completed.
        let fetched = self.collector.refresh(store.as_ref()).await;
        let fetch_status = if fetched > 0 {
            PhaseStatus::Success
        } else {
            PhaseStatus::Failed
        };

        // Score phase.
        let (score_status, outcome, error) =
            match self.orchestrator.run_daily_update(date).await {
                Ok(outcome) => (PhaseStatus::Success, Some(outcome), None),
                Err(e) => (PhaseStatus::Failed, None, Some(e.to_string())),
            };

        let run = CronRun {
            id: Uuid::new_v4(),
            date,
            started_at,
            completed_at: Some(Utc::now()),
            fetch_status,
            score_status,
            error,
        };
        store.record_cron_run(&run).await?;

        info!(
            date = %date,
            fetch = ?fetch_status,
            score = ?score_status,
            "cron run recorded"
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoringPolicy;
    use crate::models::{EvidenceItem, Pillar};
    use crate::providers::test_support::ScriptedProvider;
    use crate::providers::test_support::judgment;
    use crate::retry::RetryPolicy;
    use crate::state::{InMemoryStateStore, StateStore};
    use chrono::TimeZone;

    fn scheduler(store: Arc<InMemoryStateStore>) -> DailyScheduler {
        let providers = vec![ScriptedProvider::ok("anthropic", judgment(1.0, "Up."))];
        let orchestrator = Arc::new(ScoreOrchestrator::new(
            store,
            providers,
            ScoringPolicy::default(),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
        ));

        // No sources configured: the fetch phase fails, which must not
        // block the score phase.
        let collector = ExternalDataCollector::new(
            Vec::new(),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
        );

        DailyScheduler::new(orchestrator, collector, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn partial_success_is_retried_next_tick() {
        let store = Arc::new(InMemoryStateStore::new());
        store
            .add_evidence(&[EvidenceItem {
                pillar: Pillar::Capability,
                title: "t".to_string(),
                summary: "s".to_string(),
                source: "feed".to_string(),
                url: None,
                published_at: Utc.with_ymd_and_hms(2026, 8, 6, 1, 0, 0).unwrap(),
            }])
            .await
            .unwrap();

        let sched = scheduler(Arc::clone(&store));
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 6, 0, 0).unwrap();

        // Fetch failed (no sources) → date not completed even though
        // scoring succeeded.
        let outcome = sched.tick(now).await.unwrap();
        assert!(outcome.is_some());
        assert!(!store.run_completed(now.date_naive()).await.unwrap());

        // The next tick retries; scoring is idempotent.
        let outcome = sched.tick(now).await.unwrap();
        assert!(outcome.unwrap().already_exists);
    }

    #[tokio::test]
    async fn completed_date_is_skipped() {
        let store = Arc::new(InMemoryStateStore::new());
        let sched = scheduler(Arc::clone(&store));
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 6, 0, 0).unwrap();

        let run = CronRun {
            id: Uuid::new_v4(),
            date: now.date_naive(),
            started_at: now,
            completed_at: Some(now),
            fetch_status: PhaseStatus::Success,
            score_status: PhaseStatus::Success,
            error: None,
        };
        store.record_cron_run(&run).await.unwrap();

        assert!(sched.tick(now).await.unwrap().is_none());
    }
}
