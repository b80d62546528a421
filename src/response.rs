//! Provider response parsing & validation
//!
//! Providers are asked for bare JSON but routinely wrap it in markdown
//! fences. A response missing any required field is rejected whole —
//! no partial trust of malformed judgments.

use crate::error::IndexError;
use crate::models::{Direction, ModelScore, Pillar, PillarScores, Signal};
use crate::Result;
use serde_json::Value;

/// Free-text analysis is truncated to this many characters.
pub const MAX_ANALYSIS_LEN: usize = 2000;
/// Notes are truncated to this many characters.
pub const MAX_NOTES_LEN: usize = 500;
/// Signal text is truncated to this many characters.
pub const MAX_SIGNAL_TEXT_LEN: usize = 280;

const PILLAR_BOUND: f64 = 5.0;

/// Parse one provider's raw completion into a `ModelScore`.
///
/// Required: the pillar-score map, the suggested delta, and non-empty
/// analysis text. Optional arrays and numbers default to empty/zero.
pub fn parse_model_score(provider_id: &str, raw: &str) -> Result<ModelScore> {
    let cleaned = strip_fences(raw);

    let json: Value = serde_json::from_str(cleaned).map_err(|e| {
        IndexError::InvalidResponse(format!("{}: not valid JSON: {}", provider_id, e))
    })?;

    let pillar_map = json
        .get("pillar_scores")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            IndexError::InvalidResponse(format!("{}: missing pillar_scores map", provider_id))
        })?;

    let mut pillar_scores = PillarScores::default();
    for pillar in Pillar::ALL {
        let value = pillar_map
            .get(pillar.as_str())
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        pillar_scores.set(pillar, value.clamp(-PILLAR_BOUND, PILLAR_BOUND));
    }

    let suggested_delta = json
        .get("suggested_delta")
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            IndexError::InvalidResponse(format!("{}: missing suggested_delta", provider_id))
        })?;

    let analysis = json
        .get("analysis")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            IndexError::InvalidResponse(format!("{}: missing analysis text", provider_id))
        })?;

    let technical_delta = json
        .get("technical_delta")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let economic_delta = json
        .get("economic_delta")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let top_signals = json
        .get("top_signals")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_signal).collect())
        .unwrap_or_default();

    let notes = json
        .get("notes")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| truncate(s, MAX_NOTES_LEN));

    Ok(ModelScore {
        provider_id: provider_id.to_string(),
        pillar_scores,
        technical_delta,
        economic_delta,
        suggested_delta,
        analysis: truncate(analysis, MAX_ANALYSIS_LEN),
        top_signals,
        notes,
    })
}

fn parse_signal(value: &Value) -> Option<Signal> {
    let text = value.get("text").and_then(Value::as_str)?.trim();
    if text.is_empty() {
        return None;
    }

    let direction = match value.get("direction").and_then(Value::as_str) {
        Some("up") => Direction::Up,
        Some("down") => Direction::Down,
        _ => Direction::Neutral,
    };

    let source = value
        .get("source")
        .and_then(Value::as_str)
        .unwrap_or("unattributed")
        .trim()
        .to_string();

    let impact = value
        .get("impact")
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
        .clamp(-PILLAR_BOUND, PILLAR_BOUND);

    let url = value
        .get("url")
        .and_then(Value::as_str)
        .and_then(sanitize_url);

    Some(Signal {
        text: truncate(text, MAX_SIGNAL_TEXT_LEN),
        direction,
        source,
        impact,
        url,
    })
}

/// Only http(s) survives; every other scheme is dropped.
fn sanitize_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let lowered = trimmed.to_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        Some(trimmed.to_string())
    } else {
        None
    }
}

/// Remove surrounding markdown fence markers before JSON parsing.
fn strip_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
