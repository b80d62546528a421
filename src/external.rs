//! External data collection
//!
//! One GET per leaderboard/time-series source, each fetched and parsed
//! independently through the shared retry combinator. A broken source
//! is logged and skipped — it never blocks the others and never fails
//! the fetch phase on its own.

use crate::leaderboard::{parse_agent_leaderboard, parse_benchmark};
use crate::models::{DataQualityFlag, ExternalDataPoint};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::state::StateStore;
use crate::trend::{build_trend, Observation};
use crate::Result;
use crate::error::IndexError;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// How a source's body is turned into structured data.
#[derive(Debug, Clone)]
pub enum SourceKind {
    /// Benchmark-table page; the named tracks are extracted.
    Benchmark { tracks: Vec<String> },
    /// Server-rendered agent leaderboard.
    AgentLeaderboard,
    /// JSON array of `{date, value}` observations, newest-first.
    TimeSeries,
}

#[derive(Debug, Clone)]
pub struct ExternalSource {
    pub key: String,
    pub url: String,
    pub kind: SourceKind,
}

pub struct ExternalDataCollector {
    client: Client,
    sources: Vec<ExternalSource>,
    retry: RetryPolicy,
}

impl ExternalDataCollector {
    pub fn new(sources: Vec<ExternalSource>, retry: RetryPolicy) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            sources,
            retry,
        }
    }

    /// The production source set.
    pub fn default_sources() -> Vec<ExternalSource> {
        vec![
            ExternalSource {
                key: "swe_benchmark".to_string(),
                url: "https://www.swebench.com/".to_string(),
                kind: SourceKind::Benchmark {
                    tracks: vec!["SWE-bench Verified".to_string(), "SWE-bench Lite".to_string()],
                },
            },
            ExternalSource {
                key: "agent_leaderboard".to_string(),
                url: "https://huggingface.co/spaces/gaia-benchmark/leaderboard".to_string(),
                kind: SourceKind::AgentLeaderboard,
            },
            ExternalSource {
                key: "dev_job_postings".to_string(),
                url: "https://fred.stlouisfed.org/graph/fredgraph.json?id=IHLIDXUSTPSOFTDEVE"
                    .to_string(),
                kind: SourceKind::TimeSeries,
            },
        ]
    }

    /// Fetch every source, recording the parsed value per key.
    /// Returns how many sources succeeded; per-source failures are
    /// logged and skipped.
    pub async fn refresh(&self, store: &dyn StateStore) -> usize {
        let mut succeeded = 0;

        for source in &self.sources {
            match self.fetch_source(source).await {
                Ok(value) => {
                    if let Err(e) = store.record_external(&source.key, &value, Utc::now()).await {
                        warn!(key = %source.key, error = %e, "failed to persist external data");
                        continue;
                    }
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(key = %source.key, error = %e, "external source skipped");
                }
            }
        }

        info!(
            succeeded,
            configured = self.sources.len(),
            "external data refresh finished"
        );
        succeeded
    }

    async fn fetch_source(&self, source: &ExternalSource) -> Result<Value> {
        let body = retry_with_backoff(&self.retry, &source.key, || {
            let client = self.client.clone();
            let url = source.url.clone();
            async move {
                let response = client.get(&url).send().await?;
                if !response.status().is_success() {
                    return Err(IndexError::ExternalDataError(format!(
                        "{} returned {}",
                        url,
                        response.status()
                    )));
                }
                Ok(response.text().await?)
            }
        })
        .await?;

        parse_source_payload(&source.kind, &body)
    }
}

/// Turn one source body into the value stored per key. Pure, so each
/// source format is independently testable.
pub fn parse_source_payload(kind: &SourceKind, body: &str) -> Result<Value> {
    match kind {
        SourceKind::Benchmark { tracks } => {
            let track_refs: Vec<&str> = tracks.iter().map(String::as_str).collect();
            let results = parse_benchmark(body, &track_refs)?;
            if results.is_empty() {
                return Err(IndexError::ExternalDataError(
                    "benchmark page had no usable tracks".to_string(),
                ));
            }

            let best_resolved = results
                .iter()
                .filter_map(|t| t.top().map(|e| e.resolved))
                .fold(None, |best: Option<f64>, v| {
                    Some(best.map_or(v, |b| b.max(v)))
                });

            let tracks_json: Vec<Value> = results
                .iter()
                .map(|t| {
                    json!({
                        "track": t.track,
                        "top_model": t.top().map(|e| e.model.clone()),
                        "top_resolved": t.top().map(|e| e.resolved),
                        "entries": t.entries.len(),
                    })
                })
                .collect();

            Ok(json!({
                "best_resolved": best_resolved,
                "tracks": tracks_json,
            }))
        }
        SourceKind::AgentLeaderboard => {
            let board = parse_agent_leaderboard(body)?;
            let top = board.top();
            Ok(json!({
                "top_agent": top.map(|e| e.agent.clone()),
                "top_model": top.map(|e| e.model.clone()),
                "top_overall": top.map(|e| e.overall),
                "median_overall": board.median_overall,
                "entries": board.entries.len(),
            }))
        }
        SourceKind::TimeSeries => {
            let observations: Vec<Observation> = serde_json::from_str(body).map_err(|e| {
                IndexError::ExternalDataError(format!("time series not parseable: {}", e))
            })?;

            let trend = build_trend(&observations).ok_or_else(|| {
                IndexError::ExternalDataError(
                    "time series had no numeric current value".to_string(),
                )
            })?;

            Ok(serde_json::to_value(trend)?)
        }
    }
}

/// Data-quality flags derived from the latest external points.
pub fn staleness_flags(
    latest: &BTreeMap<String, ExternalDataPoint>,
    now: DateTime<Utc>,
    stale_after_hours: i64,
) -> Vec<DataQualityFlag> {
    if latest.is_empty() {
        return vec![DataQualityFlag::ExternalDataMissing];
    }

    let horizon = Duration::hours(stale_after_hours);
    if latest.values().any(|p| now - p.fetched_at > horizon) {
        return vec![DataQualityFlag::ExternalDataStale];
    }

    Vec::new()
}

/// The prompt-facing view of the latest external points.
pub fn external_snapshot_map(
    latest: &BTreeMap<String, ExternalDataPoint>,
) -> BTreeMap<String, Value> {
    latest
        .iter()
        .map(|(key, point)| (key.clone(), point.value.clone()))
        .collect()
}
