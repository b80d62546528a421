//! Postgres-backed state store
//!
//! Schema bootstrap runs lazily on first use. Complex fields are
//! stored as JSON text and read back with safe defaults, so one
//! corrupt row never breaks its neighbours.

use super::StateStore;
use crate::error::IndexError;
use crate::models::{
    CronRun, DataQualityFlag, EvidenceItem, ExternalDataPoint, ModelAgreement, ModelScore,
    Pillar, PhaseStatus, PillarScores, PromptVersion, ProviderUsage, ScoreSnapshot,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

pub struct PostgresStateStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresStateStore {
    /// Build a lazily-connecting store; the pool connects on first
    /// query, not here.
    pub fn connect_lazy(url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| IndexError::StateError(format!("Failed to build pool: {}", e)))?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                for ddl in SCHEMA {
                    sqlx::query(ddl).execute(&self.pool).await?;
                }
                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| IndexError::StateError(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    async fn model_scores_for(&self, date: NaiveDate) -> Result<Vec<ModelScore>> {
        let rows = sqlx::query(
            "SELECT payload FROM model_scores WHERE snapshot_date = $1 ORDER BY provider_id",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load model scores", e))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let payload: String = row.try_get("payload").ok()?;
                match serde_json::from_str(&payload) {
                    Ok(score) => Some(score),
                    Err(e) => {
                        warn!(date = %date, error = %e, "skipping corrupt model score row");
                        None
                    }
                }
            })
            .collect())
    }

    async fn snapshot_from_row(&self, row: &PgRow) -> Result<ScoreSnapshot> {
        let date: NaiveDate = row
            .try_get("date")
            .map_err(|e| db_err("Missing snapshot date", e))?;

        let signals_text: String = row.try_get("signals").unwrap_or_default();
        let pillars_text: String = row.try_get("pillar_scores").unwrap_or_default();
        let flags_text: String = row.try_get("data_quality_flags").unwrap_or_default();
        let external_text: Option<String> = row.try_get("external_data").ok();
        let agreement_text: String = row
            .try_get("model_agreement")
            .unwrap_or_else(|_| "partial".to_string());

        let model_scores = self.model_scores_for(date).await?;

        Ok(ScoreSnapshot {
            date,
            score: row.try_get("score").unwrap_or(0.0),
            score_technical: row.try_get("score_technical").unwrap_or(0.0),
            score_economic: row.try_get("score_economic").unwrap_or(0.0),
            delta: row.try_get("delta").unwrap_or(0.0),
            delta_explanation: row.try_get("delta_explanation").ok(),
            analysis: row.try_get("analysis").unwrap_or_default(),
            signals: serde_json::from_str(&signals_text).unwrap_or_default(),
            pillar_scores: serde_json::from_str::<PillarScores>(&pillars_text).unwrap_or_default(),
            model_scores,
            model_agreement: agreement_from_db(&agreement_text),
            model_spread: row.try_get("model_spread").unwrap_or(0.0),
            capability_gap: row.try_get("capability_gap").ok(),
            prompt_hash: row.try_get("prompt_hash").unwrap_or_default(),
            external_data: external_text.and_then(|t| serde_json::from_str(&t).ok()),
            is_decay: row.try_get("is_decay").unwrap_or(false),
            data_quality_flags: serde_json::from_str::<Vec<DataQualityFlag>>(&flags_text)
                .unwrap_or_default(),
            created_at: row.try_get("created_at").unwrap_or_else(|_| Utc::now()),
        })
    }
}

const SNAPSHOT_COLUMNS: &str = "date, score, score_technical, score_economic, delta, \
     delta_explanation, analysis, signals, pillar_scores, model_agreement, model_spread, \
     capability_gap, prompt_hash, external_data, is_decay, data_quality_flags, created_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS score_snapshots (
      date DATE PRIMARY KEY,
      score DOUBLE PRECISION NOT NULL,
      score_technical DOUBLE PRECISION NOT NULL,
      score_economic DOUBLE PRECISION NOT NULL,
      delta DOUBLE PRECISION NOT NULL,
      delta_explanation TEXT,
      analysis TEXT NOT NULL,
      signals TEXT NOT NULL DEFAULT '[]',
      pillar_scores TEXT NOT NULL DEFAULT '{}',
      model_agreement TEXT NOT NULL,
      model_spread DOUBLE PRECISION NOT NULL DEFAULT 0,
      capability_gap DOUBLE PRECISION,
      prompt_hash TEXT NOT NULL,
      external_data TEXT,
      is_decay BOOLEAN NOT NULL DEFAULT FALSE,
      data_quality_flags TEXT NOT NULL DEFAULT '[]',
      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS model_scores (
      snapshot_date DATE NOT NULL,
      provider_id TEXT NOT NULL,
      payload TEXT NOT NULL,
      PRIMARY KEY (snapshot_date, provider_id)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provider_usage (
      id BIGSERIAL PRIMARY KEY,
      provider_id TEXT NOT NULL,
      latency_ms BIGINT NOT NULL,
      success BOOLEAN NOT NULL,
      prompt_tokens BIGINT NOT NULL,
      completion_tokens BIGINT NOT NULL,
      recorded_at TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS external_data (
      key TEXT NOT NULL,
      value TEXT NOT NULL,
      fetched_at TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_external_data_key_time
    ON external_data (key, fetched_at DESC);
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prompt_versions (
      hash TEXT PRIMARY KEY,
      prompt_text TEXT NOT NULL,
      first_used TIMESTAMPTZ NOT NULL,
      last_used TIMESTAMPTZ NOT NULL
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cron_runs (
      id UUID PRIMARY KEY,
      date DATE NOT NULL,
      started_at TIMESTAMPTZ NOT NULL,
      completed_at TIMESTAMPTZ,
      fetch_status TEXT NOT NULL,
      score_status TEXT NOT NULL,
      error TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS evidence_items (
      id BIGSERIAL PRIMARY KEY,
      pillar TEXT NOT NULL,
      title TEXT NOT NULL,
      summary TEXT NOT NULL,
      source TEXT NOT NULL,
      url TEXT,
      published_at TIMESTAMPTZ NOT NULL
    );
    "#,
];

#[async_trait::async_trait]
impl StateStore for PostgresStateStore {
    async fn latest_snapshot(&self) -> Result<Option<ScoreSnapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM score_snapshots ORDER BY date DESC LIMIT 1",
            SNAPSHOT_COLUMNS
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load latest snapshot", e))?;

        match row {
            Some(row) => Ok(Some(self.snapshot_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn snapshot_for(&self, date: NaiveDate) -> Result<Option<ScoreSnapshot>> {
        self.ensure_schema().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM score_snapshots WHERE date = $1",
            SNAPSHOT_COLUMNS
        ))
        .bind(date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load snapshot", e))?;

        match row {
            Some(row) => Ok(Some(self.snapshot_from_row(&row).await?)),
            None => Ok(None),
        }
    }

    async fn history(&self, limit: usize) -> Result<Vec<ScoreSnapshot>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM score_snapshots ORDER BY date DESC LIMIT $1",
            SNAPSHOT_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load history", e))?;

        let mut snapshots = Vec::with_capacity(rows.len());
        for row in &rows {
            snapshots.push(self.snapshot_from_row(row).await?);
        }
        Ok(snapshots)
    }

    async fn insert_snapshot(&self, snapshot: &ScoreSnapshot) -> Result<()> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin snapshot transaction", e))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO score_snapshots
              (date, score, score_technical, score_economic, delta, delta_explanation,
               analysis, signals, pillar_scores, model_agreement, model_spread,
               capability_gap, prompt_hash, external_data, is_decay, data_quality_flags,
               created_at)
            VALUES
              ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (date) DO NOTHING
            "#,
        )
        .bind(snapshot.date)
        .bind(snapshot.score)
        .bind(snapshot.score_technical)
        .bind(snapshot.score_economic)
        .bind(snapshot.delta)
        .bind(&snapshot.delta_explanation)
        .bind(&snapshot.analysis)
        .bind(serde_json::to_string(&snapshot.signals)?)
        .bind(serde_json::to_string(&snapshot.pillar_scores)?)
        .bind(agreement_to_db(snapshot.model_agreement))
        .bind(snapshot.model_spread)
        .bind(snapshot.capability_gap)
        .bind(&snapshot.prompt_hash)
        .bind(
            snapshot
                .external_data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(snapshot.is_decay)
        .bind(serde_json::to_string(&snapshot.data_quality_flags)?)
        .bind(snapshot.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to insert snapshot", e))?;

        // The unique-per-date constraint is the correctness backstop
        // when two ticks race past the idempotency check.
        if inserted.rows_affected() == 0 {
            return Err(IndexError::SnapshotExists(snapshot.date.to_string()));
        }

        for score in &snapshot.model_scores {
            sqlx::query(
                r#"
                INSERT INTO model_scores (snapshot_date, provider_id, payload)
                VALUES ($1, $2, $3)
                ON CONFLICT (snapshot_date, provider_id) DO UPDATE SET payload = EXCLUDED.payload
                "#,
            )
            .bind(snapshot.date)
            .bind(&score.provider_id)
            .bind(serde_json::to_string(score)?)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to insert model score", e))?;
        }

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit snapshot transaction", e))?;

        Ok(())
    }

    async fn delete_snapshot(&self, date: NaiveDate) -> Result<bool> {
        self.ensure_schema().await?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin delete transaction", e))?;

        // Dependent rows go before the parent row.
        sqlx::query("DELETE FROM model_scores WHERE snapshot_date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to delete model scores", e))?;

        sqlx::query("DELETE FROM provider_usage WHERE recorded_at::date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to delete provider usage", e))?;

        let deleted = sqlx::query("DELETE FROM score_snapshots WHERE date = $1")
            .bind(date)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to delete snapshot", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit delete transaction", e))?;

        Ok(deleted.rows_affected() > 0)
    }

    async fn add_evidence(&self, items: &[EvidenceItem]) -> Result<()> {
        self.ensure_schema().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO evidence_items (pillar, title, summary, source, url, published_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(item.pillar.as_str())
            .bind(&item.title)
            .bind(&item.summary)
            .bind(&item.source)
            .bind(&item.url)
            .bind(item.published_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("Failed to insert evidence", e))?;
        }
        Ok(())
    }

    async fn unscored_evidence(&self, since: DateTime<Utc>) -> Result<Vec<EvidenceItem>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT pillar, title, summary, source, url, published_at
            FROM evidence_items
            WHERE published_at > $1
            ORDER BY published_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load evidence", e))?;

        Ok(rows
            .iter()
            .map(|row| {
                let pillar_text: String = row.try_get("pillar").unwrap_or_default();
                EvidenceItem {
                    pillar: pillar_from_db(&pillar_text),
                    title: row.try_get("title").unwrap_or_default(),
                    summary: row.try_get("summary").unwrap_or_default(),
                    source: row.try_get("source").unwrap_or_default(),
                    url: row.try_get("url").ok(),
                    published_at: row.try_get("published_at").unwrap_or_else(|_| Utc::now()),
                }
            })
            .collect())
    }

    async fn record_external(
        &self,
        key: &str,
        value: &Value,
        fetched_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_schema().await?;

        let serialized = serde_json::to_string(value)?;

        let updated = sqlx::query(
            r#"
            UPDATE external_data SET value = $2, fetched_at = $3
            WHERE key = $1 AND fetched_at::date = $3::date
            "#,
        )
        .bind(key)
        .bind(&serialized)
        .bind(fetched_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update external data", e))?;

        if updated.rows_affected() == 0 {
            sqlx::query("INSERT INTO external_data (key, value, fetched_at) VALUES ($1, $2, $3)")
                .bind(key)
                .bind(&serialized)
                .bind(fetched_at)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("Failed to insert external data", e))?;
        }

        Ok(())
    }

    async fn latest_external(&self) -> Result<BTreeMap<String, ExternalDataPoint>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (key) key, value, fetched_at
            FROM external_data
            ORDER BY key, fetched_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load external data", e))?;

        let mut latest = BTreeMap::new();
        for row in &rows {
            let key: String = row.try_get("key").unwrap_or_default();
            let raw: String = row.try_get("value").unwrap_or_default();

            // Safe-default read: one corrupt key must not break others.
            let value: Value = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping corrupt external data row");
                    continue;
                }
            };

            latest.insert(
                key.clone(),
                ExternalDataPoint {
                    key,
                    value,
                    fetched_at: row.try_get("fetched_at").unwrap_or_else(|_| Utc::now()),
                },
            );
        }
        Ok(latest)
    }

    async fn external_history(&self, key: &str, limit: usize) -> Result<Vec<ExternalDataPoint>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT key, value, fetched_at FROM external_data
            WHERE key = $1 ORDER BY fetched_at DESC LIMIT $2
            "#,
        )
        .bind(key)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load external history", e))?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let raw: String = row.try_get("value").ok()?;
                let value: Value = serde_json::from_str(&raw).ok()?;
                Some(ExternalDataPoint {
                    key: key.to_string(),
                    value,
                    fetched_at: row.try_get("fetched_at").ok()?,
                })
            })
            .collect())
    }

    async fn record_prompt(&self, hash: &str, text: &str, used_at: DateTime<Utc>) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO prompt_versions (hash, prompt_text, first_used, last_used)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (hash) DO UPDATE SET last_used = EXCLUDED.last_used
            "#,
        )
        .bind(hash)
        .bind(text)
        .bind(used_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to record prompt", e))?;

        Ok(())
    }

    async fn prompt_version(&self, hash: &str) -> Result<Option<PromptVersion>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            "SELECT hash, prompt_text, first_used, last_used FROM prompt_versions WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load prompt version", e))?;

        Ok(row.map(|row| PromptVersion {
            hash: row.try_get("hash").unwrap_or_default(),
            prompt_text: row.try_get("prompt_text").unwrap_or_default(),
            first_used: row.try_get("first_used").unwrap_or_else(|_| Utc::now()),
            last_used: row.try_get("last_used").unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn record_usage(&self, rows: &[ProviderUsage]) -> Result<()> {
        self.ensure_schema().await?;

        for usage in rows {
            sqlx::query(
                r#"
                INSERT INTO provider_usage
                  (provider_id, latency_ms, success, prompt_tokens, completion_tokens, recorded_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(&usage.provider_id)
            .bind(usage.latency_ms as i64)
            .bind(usage.success)
            .bind(usage.prompt_tokens)
            .bind(usage.completion_tokens)
            .bind(usage.recorded_at)
            .execute(&self.pool)
            .await
            .map_err(|e| db_err("Failed to record usage", e))?;
        }
        Ok(())
    }

    async fn record_cron_run(&self, run: &CronRun) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO cron_runs
              (id, date, started_at, completed_at, fetch_status, score_status, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
              completed_at = EXCLUDED.completed_at,
              fetch_status = EXCLUDED.fetch_status,
              score_status = EXCLUDED.score_status,
              error = EXCLUDED.error
            "#,
        )
        .bind(run.id)
        .bind(run.date)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(phase_to_db(run.fetch_status))
        .bind(phase_to_db(run.score_status))
        .bind(&run.error)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to record cron run", e))?;

        Ok(())
    }

    async fn run_completed(&self, date: NaiveDate) -> Result<bool> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT EXISTS(
              SELECT 1 FROM cron_runs
              WHERE date = $1 AND fetch_status = 'success' AND score_status = 'success'
            ) AS completed
            "#,
        )
        .bind(date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to check cron completion", e))?;

        Ok(row.try_get("completed").unwrap_or(false))
    }
}

fn db_err(context: &str, e: sqlx::Error) -> IndexError {
    IndexError::StateError(format!("{}: {}", context, e))
}

fn phase_to_db(status: PhaseStatus) -> &'static str {
    match status {
        PhaseStatus::Success => "success",
        PhaseStatus::Failed => "failed",
        PhaseStatus::Skipped => "skipped",
    }
}

fn agreement_to_db(agreement: ModelAgreement) -> &'static str {
    match agreement {
        ModelAgreement::Agree => "agree",
        ModelAgreement::MostlyAgree => "mostly_agree",
        ModelAgreement::Disagree => "disagree",
        ModelAgreement::Partial => "partial",
    }
}

fn agreement_from_db(raw: &str) -> ModelAgreement {
    match raw {
        "agree" => ModelAgreement::Agree,
        "mostly_agree" => ModelAgreement::MostlyAgree,
        "disagree" => ModelAgreement::Disagree,
        _ => ModelAgreement::Partial,
    }
}

fn pillar_from_db(raw: &str) -> Pillar {
    match raw {
        "capability" => Pillar::Capability,
        "labour_market" => Pillar::LabourMarket,
        "sentiment" => Pillar::Sentiment,
        "industry" => Pillar::Industry,
        _ => Pillar::Barriers,
    }
}
