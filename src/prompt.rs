//! Evidence packet / prompt composition
//!
//! Pure, deterministic assembly of the context bundle every provider
//! receives. No wall-clock and no randomness: identical inputs must
//! yield byte-identical output so the prompt hash is a valid
//! content-addressed audit key.

use crate::models::{EvidenceItem, Pillar, ScoreSnapshot};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Providers must cite at least this many signals.
pub const REQUIRED_SIGNAL_COUNT: usize = 3;
/// Length limit stated in the output contract for the analysis field.
pub const MAX_ANALYSIS_CHARS: usize = 1200;
/// Length limit stated in the output contract for the notes field.
pub const MAX_NOTES_CHARS: usize = 500;
/// History entries rendered into the packet.
pub const HISTORY_WINDOW_DAYS: usize = 14;

const NO_EVIDENCE_MARKER: &str = "(no new evidence in this pillar)";

/// Everything the composer needs, loaded ahead of time by the caller.
#[derive(Debug)]
pub struct PromptInputs<'a> {
    pub current_score: f64,
    pub score_technical: f64,
    pub score_economic: f64,
    /// Newest-first snapshots; only the first 14 are rendered.
    pub history: &'a [ScoreSnapshot],
    pub evidence: &'a [EvidenceItem],
    pub external: &'a BTreeMap<String, Value>,
}

/// Compose the evidence packet sent verbatim to every provider.
pub fn compose_prompt(inputs: &PromptInputs<'_>) -> String {
    let mut out = String::new();

    out.push_str(
        "You are one of several independent analysts maintaining a daily index (0-100) \
         of whether AI can replace professional software engineers. Judge only from the \
         evidence below and suggest a small daily adjustment.\n\n",
    );

    out.push_str(&format!(
        "CURRENT INDEX\ncomposite: {:.1}\ntechnical: {:.1}\neconomic: {:.1}\n\n",
        inputs.current_score, inputs.score_technical, inputs.score_economic
    ));

    out.push_str(&format!("SCORE HISTORY (last {} days)\n", HISTORY_WINDOW_DAYS));
    if inputs.history.is_empty() {
        out.push_str("(no prior scores)\n");
    } else {
        let line = inputs
            .history
            .iter()
            .take(HISTORY_WINDOW_DAYS)
            .map(|s| format!("{}: {:.1} ({:+.1})", s.date, s.score, s.delta))
            .collect::<Vec<_>>()
            .join("; ");
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');

    out.push_str("EVIDENCE BY PILLAR\n");
    for pillar in Pillar::ALL {
        out.push_str(&format!("## {}\n", pillar.label()));

        let mut any = false;
        for item in inputs.evidence.iter().filter(|e| e.pillar == pillar) {
            any = true;
            out.push_str(&format!(
                "- {} — {} [{}]\n",
                item.title, item.summary, item.source
            ));
        }
        if !any {
            out.push_str(NO_EVIDENCE_MARKER);
            out.push('\n');
        }
    }
    out.push('\n');

    // External indicators are rendered only when present.
    if !inputs.external.is_empty() {
        out.push_str("EXTERNAL INDICATORS\n");
        for (key, value) in inputs.external {
            out.push_str(&format!("- {}: {}\n", key, value));
        }
        out.push('\n');
    }

    out.push_str(&output_contract());
    out
}

/// The fixed output-schema contract appended to every packet.
fn output_contract() -> String {
    format!(
        "OUTPUT\nRespond with a single JSON object and nothing else:\n\
         {{\n\
         \x20 \"pillar_scores\": {{\"capability\": n, \"labour_market\": n, \"sentiment\": n, \"industry\": n, \"barriers\": n}},\n\
         \x20 \"technical_delta\": n,\n\
         \x20 \"economic_delta\": n,\n\
         \x20 \"suggested_delta\": n,\n\
         \x20 \"analysis\": \"string, at most {} characters\",\n\
         \x20 \"top_signals\": [{{\"text\": \"...\", \"direction\": \"up|down|neutral\", \"source\": \"...\", \"impact\": n, \"url\": \"optional http(s) link\"}}],\n\
         \x20 \"notes\": \"optional string, at most {} characters\"\n\
         }}\n\
         All pillar scores and impacts lie in [-5, 5]; deltas lie in [-4, 4].\n\
         Cite at least {} signals.\n",
        MAX_ANALYSIS_CHARS, MAX_NOTES_CHARS, REQUIRED_SIGNAL_COUNT
    )
}

/// Content-addressed key for a composed prompt: first 16 hex chars of
/// its SHA-256.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(16);
    hash
}
