//! Scoring policy configuration
//!
//! Every behavioural knob of the decay/dampening state machine lives here
//! as a named field. Defaults are the production calibration; each can be
//! overridden from the environment at startup.

use std::env;

/// Policy knobs for the daily update rule.
#[derive(Debug, Clone)]
pub struct ScoringPolicy {
    /// Baseline used when no previous snapshot exists.
    pub initial_score: f64,
    /// Days without evidence before the score starts drifting.
    pub decay_after_days: i64,
    /// Size of one decay nudge toward the neutral target.
    pub decay_step: f64,
    /// Neutral target the score drifts toward under decay.
    pub decay_target: f64,
    /// Scale applied to the clamped raw consensus delta.
    pub dampening_factor: f64,
    /// Raw consensus delta is clamped to ±this before scaling.
    pub max_raw_delta: f64,
    /// Final daily movement is clamped to ±this after scaling.
    pub max_daily_delta: f64,
    /// Lower bound for score and sub-scores.
    pub score_floor: f64,
    /// Upper bound for score and sub-scores.
    pub score_ceiling: f64,
    /// Evidence counts below this set the sparse-evidence flag.
    pub min_evidence_items: usize,
    /// Populated-pillar counts below this set the few-pillars flag.
    pub min_populated_pillars: usize,
    /// External snapshots older than this many hours are flagged stale.
    pub external_stale_after_hours: i64,
    /// Provider whose narrative/notes win ties in consensus merges.
    pub primary_provider: String,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            initial_score: 50.0,
            decay_after_days: 7,
            decay_step: 0.1,
            decay_target: 40.0,
            dampening_factor: 0.3,
            max_raw_delta: 4.0,
            max_daily_delta: 1.2,
            score_floor: 5.0,
            score_ceiling: 95.0,
            min_evidence_items: 5,
            min_populated_pillars: 5,
            external_stale_after_hours: 48,
            primary_provider: "anthropic".to_string(),
        }
    }
}

impl ScoringPolicy {
    /// Build the policy from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut policy = Self::default();

        if let Some(v) = env_f64("SCORE_INITIAL") {
            policy.initial_score = v;
        }
        if let Some(v) = env_i64("SCORE_DECAY_AFTER_DAYS") {
            policy.decay_after_days = v;
        }
        if let Some(v) = env_f64("SCORE_DECAY_STEP") {
            policy.decay_step = v;
        }
        if let Some(v) = env_f64("SCORE_DECAY_TARGET") {
            policy.decay_target = v;
        }
        if let Some(v) = env_f64("SCORE_DAMPENING_FACTOR") {
            policy.dampening_factor = v;
        }
        if let Some(v) = env_f64("SCORE_MAX_RAW_DELTA") {
            policy.max_raw_delta = v;
        }
        if let Some(v) = env_f64("SCORE_MAX_DAILY_DELTA") {
            policy.max_daily_delta = v;
        }
        if let Some(v) = env_i64("SCORE_EXTERNAL_STALE_HOURS") {
            policy.external_stale_after_hours = v;
        }
        if let Ok(v) = env::var("SCORE_PRIMARY_PROVIDER") {
            if !v.trim().is_empty() {
                policy.primary_provider = v.trim().to_lowercase();
            }
        }

        policy
    }
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok()?.trim().parse().ok()
}

fn env_i64(key: &str) -> Option<i64> {
    env::var(key).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_calibration() {
        let policy = ScoringPolicy::default();
        assert_eq!(policy.decay_after_days, 7);
        assert!((policy.decay_step - 0.1).abs() < f64::EPSILON);
        assert!((policy.dampening_factor - 0.3).abs() < f64::EPSILON);
        assert!((policy.max_daily_delta - 1.2).abs() < f64::EPSILON);
    }
}
