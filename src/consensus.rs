//! Consensus aggregation
//!
//! Merges independent provider judgments into one ScoreUpdate:
//! weighted delta, dampening, agreement classification, signal and
//! pillar merges, and narrative synthesis.

use crate::config::ScoringPolicy;
use crate::models::{
    DataQualityFlag, ModelAgreement, ModelScore, Pillar, PillarScores, ProviderUsage,
    ScoreUpdate, Signal,
};
use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};

lazy_static! {
    /// Fixed provider weight set; renormalized over whoever responded.
    static ref PROVIDER_WEIGHTS: HashMap<&'static str, f64> = HashMap::from([
        ("anthropic", 0.40),
        ("openai", 0.35),
        ("gemini", 0.25),
    ]);
}

/// Weight for providers absent from the fixed table.
const DEFAULT_PROVIDER_WEIGHT: f64 = 0.25;

/// Signals matching in their first 50 lowercased characters are
/// duplicates.
const SIGNAL_KEY_LEN: usize = 50;

/// Spread below this classifies as full agreement.
const AGREE_SPREAD: f64 = 1.0;
/// Spread up to and including this classifies as mostly_agree.
const MOSTLY_AGREE_SPREAD: f64 = 2.5;

pub fn provider_weight(provider_id: &str) -> f64 {
    PROVIDER_WEIGHTS
        .get(provider_id)
        .copied()
        .unwrap_or(DEFAULT_PROVIDER_WEIGHT)
}

/// Weighted mean of one judgment dimension, weights renormalized to the
/// providers present. A single provider passes its value through
/// unmodified.
fn weighted_mean(scores: &[ModelScore], extract: impl Fn(&ModelScore) -> f64) -> f64 {
    match scores.len() {
        0 => 0.0,
        1 => extract(&scores[0]),
        _ => {
            let total: f64 = scores.iter().map(|s| provider_weight(&s.provider_id)).sum();
            if total <= f64::EPSILON {
                return scores.iter().map(&extract).sum::<f64>() / scores.len() as f64;
            }
            scores
                .iter()
                .map(|s| provider_weight(&s.provider_id) * extract(s))
                .sum::<f64>()
                / total
        }
    }
}

/// Weighted mean of the suggested deltas.
pub fn weighted_delta(scores: &[ModelScore]) -> f64 {
    weighted_mean(scores, |s| s.suggested_delta)
}

/// The single daily-movement cap: clamp the raw delta, scale it down,
/// clamp again, round to one decimal.
pub fn dampen(raw_delta: f64, policy: &ScoringPolicy) -> f64 {
    let clamped = raw_delta.clamp(-policy.max_raw_delta, policy.max_raw_delta);
    let scaled = clamped * policy.dampening_factor;
    round1(scaled.clamp(-policy.max_daily_delta, policy.max_daily_delta))
}

/// Classify consensus strength from the spread (max − min) of the
/// per-provider suggested deltas.
pub fn classify_agreement(deltas: &[f64]) -> (ModelAgreement, f64) {
    if deltas.len() < 2 {
        return (ModelAgreement::Partial, 0.0);
    }

    let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
    let spread = max - min;

    let agreement = if spread < AGREE_SPREAD {
        ModelAgreement::Agree
    } else if spread <= MOSTLY_AGREE_SPREAD {
        ModelAgreement::MostlyAgree
    } else {
        ModelAgreement::Disagree
    };

    (agreement, round1(spread))
}

/// Dedupe on the lowercased first-50-char key (first occurrence wins)
/// and sort by absolute impact descending.
pub fn merge_signals(signals: Vec<Signal>) -> Vec<Signal> {
    let mut seen = HashSet::new();
    let mut merged: Vec<Signal> = Vec::with_capacity(signals.len());

    for signal in signals {
        let key: String = signal
            .text
            .to_lowercase()
            .chars()
            .take(SIGNAL_KEY_LEN)
            .collect();
        if seen.insert(key) {
            merged.push(signal);
        }
    }

    // Stable sort: first-seen order survives among equal impacts.
    merged.sort_by(|a, b| b.impact.abs().total_cmp(&a.impact.abs()));
    merged
}

/// Component-wise arithmetic mean of the pillar maps, one decimal.
pub fn merge_pillars(scores: &[ModelScore]) -> PillarScores {
    let mut merged = PillarScores::default();
    if scores.is_empty() {
        return merged;
    }

    for pillar in Pillar::ALL {
        let sum: f64 = scores.iter().map(|s| s.pillar_scores.get(pillar)).sum();
        merged.set(pillar, round1(sum / scores.len() as f64));
    }
    merged
}

/// Prefer the item the predicate marks as primary, else the first item
/// that yields a value. One implementation for every optional
/// note/explanation field.
pub fn pick_preferred<T, R>(
    items: &[T],
    is_primary: impl Fn(&T) -> bool,
    extract: impl Fn(&T) -> Option<R>,
) -> Option<R> {
    items
        .iter()
        .find(|item| is_primary(item))
        .and_then(&extract)
        .or_else(|| items.iter().find_map(&extract))
}

/// Abbreviations whose trailing period never ends a sentence.
const ABBREVIATIONS: &[&str] = &[
    "e.g", "i.e", "etc", "vs", "cf", "approx", "est", "dr", "mr", "ms", "u.s", "u.k", "a.i",
];

/// First sentence of a text, without splitting on decimal numbers or
/// common abbreviations.
pub fn first_sentence(text: &str) -> &str {
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();

    for (i, c) in trimmed.char_indices() {
        if c != '.' && c != '!' && c != '?' {
            continue;
        }

        if c == '.' {
            let prev_digit = i > 0 && bytes[i - 1].is_ascii_digit();
            let next_digit = i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit();
            if prev_digit && next_digit {
                continue;
            }

            let word_start = trimmed[..i]
                .rfind(|ch: char| ch.is_whitespace() || ch == '(')
                .map(|p| p + 1)
                .unwrap_or(0);
            let word = trimmed[word_start..i].to_lowercase();
            if ABBREVIATIONS.contains(&word.as_str()) {
                continue;
            }
        }

        match trimmed[i + c.len_utf8()..].chars().next() {
            None => return trimmed,
            Some(next) if next.is_whitespace() => return &trimmed[..i + c.len_utf8()],
            _ => continue,
        }
    }

    trimmed
}

fn display_name(provider_id: &str) -> String {
    match provider_id {
        "anthropic" => "Anthropic".to_string(),
        "openai" => "OpenAI".to_string(),
        "gemini" => "Gemini".to_string(),
        other => {
            let mut chars = other.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => other.to_string(),
            }
        }
    }
}

/// Build the daily narrative from the provider analyses.
pub fn synthesize_narrative(
    scores: &[ModelScore],
    agreement: ModelAgreement,
    primary_provider: &str,
) -> String {
    if scores.len() == 1 {
        return scores[0].analysis.clone();
    }

    match agreement {
        ModelAgreement::Disagree => {
            let clauses: Vec<String> = scores
                .iter()
                .map(|score| {
                    let verb = if score.suggested_delta > f64::EPSILON {
                        "upgraded"
                    } else if score.suggested_delta < -f64::EPSILON {
                        "downgraded"
                    } else {
                        "held steady"
                    };
                    format!(
                        "{} {} the score ({:+.1}), citing: {}",
                        display_name(&score.provider_id),
                        verb,
                        score.suggested_delta,
                        first_sentence(&score.analysis)
                    )
                })
                .collect();
            clauses.join(" ")
        }
        _ => pick_preferred(
            scores,
            |s| s.provider_id == primary_provider,
            |s| {
                let trimmed = s.analysis.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            },
        )
        .unwrap_or_default(),
    }
}

/// Merge valid provider judgments into one ScoreUpdate.
pub fn aggregate(
    scores: Vec<ModelScore>,
    policy: &ScoringPolicy,
    prompt_hash: String,
    prompt_text: String,
    data_quality_flags: Vec<DataQualityFlag>,
    usage: Vec<ProviderUsage>,
) -> ScoreUpdate {
    let deltas: Vec<f64> = scores.iter().map(|s| s.suggested_delta).collect();
    let (agreement, spread) = classify_agreement(&deltas);

    let delta = dampen(weighted_delta(&scores), policy);
    let technical_delta = dampen(weighted_mean(&scores, |s| s.technical_delta), policy);
    let economic_delta = dampen(weighted_mean(&scores, |s| s.economic_delta), policy);

    let analysis = synthesize_narrative(&scores, agreement, &policy.primary_provider);
    let delta_explanation = pick_preferred(
        &scores,
        |s| s.provider_id == policy.primary_provider,
        |s| s.notes.clone(),
    );

    let signals = merge_signals(scores.iter().flat_map(|s| s.top_signals.clone()).collect());
    let pillar_scores = merge_pillars(&scores);

    ScoreUpdate {
        delta,
        technical_delta,
        economic_delta,
        analysis,
        delta_explanation,
        signals,
        pillar_scores,
        model_scores: scores,
        agreement,
        spread,
        capability_gap: None,
        prompt_hash,
        prompt_text,
        data_quality_flags,
        usage,
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn score(provider_id: &str, delta: f64, analysis: &str) -> ModelScore {
        ModelScore {
            provider_id: provider_id.to_string(),
            pillar_scores: PillarScores {
                capability: delta,
                labour_market: 0.0,
                sentiment: 0.0,
                industry: 0.0,
                barriers: 0.0,
            },
            technical_delta: delta,
            economic_delta: delta,
            suggested_delta: delta,
            analysis: analysis.to_string(),
            top_signals: vec![],
            notes: None,
        }
    }

    fn signal(text: &str, impact: f64) -> Signal {
        Signal {
            text: text.to_string(),
            direction: Direction::Up,
            source: "test".to_string(),
            impact,
            url: None,
        }
    }

    #[test]
    fn dampening_caps_large_deltas() {
        let policy = ScoringPolicy::default();
        assert_eq!(dampen(5.0, &policy), 1.2);
        assert_eq!(dampen(-5.0, &policy), -1.2);
        assert_eq!(dampen(0.0, &policy), 0.0);
        assert_eq!(dampen(2.0, &policy), 0.6);
    }

    #[test]
    fn agreement_boundaries_are_inclusive() {
        let (a, s) = classify_agreement(&[1.0, 2.0]);
        assert_eq!(a, ModelAgreement::MostlyAgree);
        assert_eq!(s, 1.0);

        let (a, _) = classify_agreement(&[0.0, 2.5]);
        assert_eq!(a, ModelAgreement::MostlyAgree);

        let (a, _) = classify_agreement(&[0.0, 2.6]);
        assert_eq!(a, ModelAgreement::Disagree);

        let (a, _) = classify_agreement(&[1.0, 1.5]);
        assert_eq!(a, ModelAgreement::Agree);
    }

    #[test]
    fn single_provider_is_partial_with_zero_spread() {
        let (a, s) = classify_agreement(&[2.0]);
        assert_eq!(a, ModelAgreement::Partial);
        assert_eq!(s, 0.0);
    }

    #[test]
    fn single_provider_delta_passes_through_unweighted() {
        let scores = vec![score("anthropic", 2.0, "up")];
        assert_eq!(weighted_delta(&scores), 2.0);
    }

    #[test]
    fn weights_renormalize_over_responders() {
        // anthropic 0.40, gemini 0.25 → renormalized 8/13 and 5/13.
        let scores = vec![score("anthropic", 1.0, "a"), score("gemini", 0.0, "b")];
        let expected = 0.40 / 0.65;
        assert!((weighted_delta(&scores) - expected).abs() < 1e-9);
    }

    #[test]
    fn merged_signals_dedupe_on_first_fifty_chars() {
        let long = "a".repeat(60);
        let also_long = format!("{}{}", "a".repeat(50), "different tail");

        let merged = merge_signals(vec![
            signal(&long, 1.0),
            signal(&also_long, 5.0),
            signal("Other signal", 2.0),
        ]);

        assert_eq!(merged.len(), 2);
        // First occurrence won, even though the duplicate had higher impact.
        assert_eq!(merged.iter().filter(|s| s.text.starts_with('a')).count(), 1);
        assert_eq!(merged[0].impact, 2.0);
    }

    #[test]
    fn merged_signals_sort_by_absolute_impact() {
        let merged = merge_signals(vec![
            signal("small", 0.5),
            signal("big negative", -4.0),
            signal("medium", 2.0),
        ]);
        assert_eq!(merged[0].text, "big negative");
        assert_eq!(merged[2].text, "small");
    }

    #[test]
    fn pillar_merge_is_componentwise_mean() {
        let scores = vec![score("anthropic", 2.0, "a"), score("openai", 1.0, "b")];
        let merged = merge_pillars(&scores);
        assert_eq!(merged.capability, 1.5);
        assert_eq!(merged.barriers, 0.0);
    }

    #[test]
    fn pick_preferred_prefers_primary_then_first() {
        let scores = vec![
            score("gemini", 1.0, "gemini view"),
            score("anthropic", 1.0, "anthropic view"),
        ];

        let preferred = pick_preferred(
            &scores,
            |s| s.provider_id == "anthropic",
            |s| Some(s.analysis.clone()),
        );
        assert_eq!(preferred.as_deref(), Some("anthropic view"));

        let fallback = pick_preferred(
            &scores,
            |s| s.provider_id == "missing",
            |s| Some(s.analysis.clone()),
        );
        assert_eq!(fallback.as_deref(), Some("gemini view"));
    }

    #[test]
    fn first_sentence_survives_decimals_and_abbreviations() {
        assert_eq!(
            first_sentence("Adoption grew 3.5 percent this quarter. More follows."),
            "Adoption grew 3.5 percent this quarter."
        );
        assert_eq!(
            first_sentence("Tools improved (e.g. code review agents) across vendors. Next."),
            "Tools improved (e.g. code review agents) across vendors."
        );
        assert_eq!(first_sentence("No terminal punctuation"), "No terminal punctuation");
    }

    #[test]
    fn single_provider_narrative_is_verbatim() {
        let scores = vec![score("gemini", 1.0, "Only view. With two sentences.")];
        let narrative = synthesize_narrative(&scores, ModelAgreement::Partial, "anthropic");
        assert_eq!(narrative, "Only view. With two sentences.");
    }

    #[test]
    fn agreement_narrative_prefers_primary() {
        let scores = vec![
            score("openai", 1.0, "openai view"),
            score("anthropic", 1.2, "anthropic view"),
        ];
        let narrative = synthesize_narrative(&scores, ModelAgreement::Agree, "anthropic");
        assert_eq!(narrative, "anthropic view");
    }

    #[test]
    fn disagreement_narrative_has_one_clause_per_provider() {
        let scores = vec![
            score("anthropic", 2.0, "Capability jumped sharply. Details follow."),
            score("openai", -1.5, "Barriers dominate right now. More."),
            score("gemini", 0.0, "Nothing decisive today."),
        ];
        let narrative = synthesize_narrative(&scores, ModelAgreement::Disagree, "anthropic");

        assert!(narrative.contains("Anthropic upgraded the score (+2.0), citing: Capability jumped sharply."));
        assert!(narrative.contains("OpenAI downgraded the score (-1.5), citing: Barriers dominate right now."));
        assert!(narrative.contains("Gemini held steady the score (+0.0), citing: Nothing decisive today."));
    }

    #[test]
    fn aggregate_produces_a_complete_update() {
        let policy = ScoringPolicy::default();
        let scores = vec![score("anthropic", 2.0, "Up."), score("openai", 1.5, "Up too.")];

        let update = aggregate(
            scores,
            &policy,
            "abcd".to_string(),
            "packet".to_string(),
            vec![],
            vec![],
        );

        assert_eq!(update.agreement, ModelAgreement::Agree);
        assert_eq!(update.model_scores.len(), 2);
        // Weighted mean in (1.5, 2.0) → dampened to ~0.5-0.6.
        assert!(update.delta > 0.0 && update.delta <= policy.max_daily_delta);
    }
}
