//! Trend building over variable-cadence time series
//!
//! External sources report daily or weekly, so week-over-week and
//! month-over-month changes are found by nearest-date search rather
//! than fixed array offsets.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A raw observation as fetched from a source, newest-first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub date: NaiveDate,
    pub value: Value,
}

/// Percent-change summary for one series.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trend {
    pub current: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_1w: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_4w: Option<f64>,
}

/// Build a trend from newest-first observations.
///
/// Returns `None` on empty input or when the current value is not
/// numeric. Non-numeric and placeholder values are filtered out before
/// anything else.
pub fn build_trend(observations: &[Observation]) -> Option<Trend> {
    let points: Vec<(NaiveDate, f64)> = observations
        .iter()
        .filter_map(|obs| numeric(&obs.value).map(|v| (obs.date, v)))
        .collect();

    let (current_date, current) = *points.first()?;

    let previous = points.get(1).map(|(_, v)| *v);
    let change_1w = change_against_nearest(&points[1..], current_date, current, 7);
    let change_4w = change_against_nearest(&points[1..], current_date, current, 28);

    Some(Trend {
        current,
        previous,
        change_1w,
        change_4w,
    })
}

/// Percent change against the prior observation nearest to
/// `days_back` days before the current date.
fn change_against_nearest(
    older: &[(NaiveDate, f64)],
    current_date: NaiveDate,
    current: f64,
    days_back: i64,
) -> Option<f64> {
    let target = current_date - Duration::days(days_back);

    let (_, baseline) = older
        .iter()
        .min_by_key(|(date, _)| (*date - target).num_days().abs())?;

    if baseline.abs() < f64::EPSILON {
        return None;
    }

    Some(round1((current - baseline) / baseline * 100.0))
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
