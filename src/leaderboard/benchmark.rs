//! Benchmark-table leaderboard parser
//!
//! Primary strategy parses the JSON blob the site embeds for its own
//! rendering; the fallback scans markdown-table rows. A blob that is
//! present but malformed is a hard error, distinct from the silent
//! no-blob fallthrough.

use super::normalize_name;
use crate::error::IndexError;
use crate::Result;
use serde::Deserialize;
use tracing::debug;

/// Resolved percentages above this are corrupt and rejected.
const MAX_RESOLVED: f64 = 100.0;

const UNKNOWN_MODEL: &str = "Unknown";

#[derive(Debug, Deserialize)]
struct BlobTrack {
    name: Option<String>,
    #[serde(default)]
    results: Vec<BlobResult>,
}

#[derive(Debug, Deserialize)]
struct BlobResult {
    name: Option<String>,
    folder: Option<String>,
    resolved: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkEntry {
    pub model: String,
    /// Percentage of tasks resolved, in [0, 100].
    pub resolved: f64,
}

/// Entries for one requested track, sorted descending by resolved.
#[derive(Debug, Clone)]
pub struct TrackResult {
    pub track: String,
    pub entries: Vec<BenchmarkEntry>,
}

impl TrackResult {
    pub fn top(&self) -> Option<&BenchmarkEntry> {
        self.entries.first()
    }
}

type Strategy = fn(&str, &[&str]) -> Result<Option<Vec<TrackResult>>>;

/// Ordered strategies: first non-empty, non-throwing result wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("json_blob", parse_json_blob),
    ("markdown_table", parse_markdown_tables),
];

/// Parse a benchmark leaderboard page for the requested tracks.
///
/// Track names are matched case/spacing-insensitively. Returns an empty
/// list when no strategy found anything usable.
pub fn parse_benchmark(html: &str, tracks: &[&str]) -> Result<Vec<TrackResult>> {
    for (name, strategy) in STRATEGIES {
        if let Some(results) = strategy(html, tracks)? {
            if !results.is_empty() {
                debug!(strategy = name, tracks = results.len(), "benchmark parsed");
                return Ok(results);
            }
        }
    }
    Ok(Vec::new())
}

/// Primary strategy: the embedded JSON blob, an array of
/// `{name, results: [{name|folder, resolved}]}`.
fn parse_json_blob(html: &str, tracks: &[&str]) -> Result<Option<Vec<TrackResult>>> {
    // No results marker anywhere → no blob; fall through silently.
    let Some(marker) = html.find("\"results\"") else {
        return Ok(None);
    };

    let start = enclosing_array_start(html, marker).ok_or_else(|| {
        IndexError::LeaderboardParse(
            "benchmark blob failed to parse: results marker without enclosing array".to_string(),
        )
    })?;

    let slice = balanced_array(&html[start..]).ok_or_else(|| {
        IndexError::LeaderboardParse(
            "benchmark blob failed to parse: unterminated array".to_string(),
        )
    })?;

    let blob: Vec<BlobTrack> = serde_json::from_str(slice).map_err(|e| {
        IndexError::LeaderboardParse(format!("benchmark blob failed to parse: {}", e))
    })?;

    let mut results = Vec::new();
    for requested in tracks {
        let wanted = normalize_name(requested);

        let Some(track) = blob.iter().find(|t| {
            t.name
                .as_deref()
                .map(|n| normalize_name(n) == wanted)
                .unwrap_or(false)
        }) else {
            continue;
        };

        let mut entries: Vec<BenchmarkEntry> = track
            .results
            .iter()
            .filter_map(|r| {
                let resolved = r.resolved?;
                if resolved > MAX_RESOLVED || resolved < 0.0 {
                    return None;
                }
                let model = r
                    .name
                    .as_deref()
                    .or(r.folder.as_deref())
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or(UNKNOWN_MODEL)
                    .to_string();
                Some(BenchmarkEntry { model, resolved })
            })
            .collect();

        entries.sort_by(|a, b| b.resolved.total_cmp(&a.resolved));
        results.push(TrackResult {
            track: requested.to_string(),
            entries,
        });
    }

    Ok(Some(results))
}

/// Fallback strategy: markdown-table rows grouped under the heading
/// that names the track.
fn parse_markdown_tables(html: &str, tracks: &[&str]) -> Result<Option<Vec<TrackResult>>> {
    let mut results: Vec<TrackResult> = tracks
        .iter()
        .map(|t| TrackResult {
            track: t.to_string(),
            entries: Vec::new(),
        })
        .collect();

    let mut current_heading = String::new();

    for line in html.lines() {
        let trimmed = line.trim();

        if let Some(heading) = trimmed.strip_prefix('#') {
            current_heading = normalize_name(heading);
            continue;
        }

        if !trimmed.starts_with('|') {
            continue;
        }

        let cells: Vec<&str> = trimmed
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();

        // Separator rows (|---|---|) carry no data.
        if cells.iter().all(|c| c.chars().all(|ch| ch == '-' || ch == ':')) {
            continue;
        }

        let Some(resolved) = row_resolved(&cells) else {
            continue;
        };
        if resolved > MAX_RESOLVED || resolved < 0.0 {
            continue;
        }

        let Some(slot) = results
            .iter_mut()
            .find(|r| current_heading.contains(&normalize_name(&r.track)))
        else {
            continue;
        };

        let model = cells
            .iter()
            .find(|c| !c.is_empty() && numeric_cell(c).is_none())
            .map(|c| c.to_string())
            .unwrap_or_else(|| UNKNOWN_MODEL.to_string());

        slot.entries.push(BenchmarkEntry { model, resolved });
    }

    for result in &mut results {
        result.entries.sort_by(|a, b| b.resolved.total_cmp(&a.resolved));
    }
    results.retain(|r| !r.entries.is_empty());

    Ok(Some(results))
}

/// The resolved percentage of a row: the cell marked with '%', else the
/// last numeric cell (so leading rank columns are skipped).
fn row_resolved(cells: &[&str]) -> Option<f64> {
    if let Some(v) = cells
        .iter()
        .find(|c| c.ends_with('%'))
        .and_then(|c| numeric_cell(c))
    {
        return Some(v);
    }
    cells.iter().rev().find_map(|c| numeric_cell(c))
}

fn numeric_cell(cell: &str) -> Option<f64> {
    cell.trim().trim_end_matches('%').trim().parse().ok()
}

/// Nearest `[` before `marker` whose next non-whitespace char opens an
/// object — the start of the blob array.
fn enclosing_array_start(html: &str, marker: usize) -> Option<usize> {
    let bytes = html.as_bytes();
    for i in (0..marker).rev() {
        if bytes[i] != b'[' {
            continue;
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        if j < bytes.len() && bytes[j] == b'{' {
            return Some(i);
        }
    }
    None
}

/// Slice out one balanced JSON array, honoring strings and escapes.
fn balanced_array(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '[' if !in_string => depth += 1,
            ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOB_PAGE: &str = r#"
        <html><script>window.__DATA__ = [
          {"name": "SWE-bench Verified", "results": [
            {"name": "Claude 4.5", "resolved": 74.2},
            {"folder": "gpt-5-agent", "resolved": 71.8},
            {"resolved": 55.0},
            {"name": "corrupt-run", "resolved": 250.0}
          ]},
          {"name": "SWE-bench Lite", "results": [
            {"name": "Claude 4.5", "resolved": 61.3}
          ]}
        ];</script></html>
    "#;

    #[test]
    fn blob_strategy_extracts_and_sorts_tracks() {
        let results = parse_benchmark(BLOB_PAGE, &["swe-bench verified"]).unwrap();
        assert_eq!(results.len(), 1);
        let entries = &results[0].entries;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].model, "Claude 4.5");
        assert_eq!(entries[0].resolved, 74.2);
        assert_eq!(entries[1].model, "gpt-5-agent");
    }

    #[test]
    fn missing_model_names_default_to_unknown() {
        let results = parse_benchmark(BLOB_PAGE, &["SWE-bench Verified"]).unwrap();
        assert!(results[0].entries.iter().any(|e| e.model == "Unknown"));
    }

    #[test]
    fn impossible_resolved_values_are_rejected() {
        let results = parse_benchmark(BLOB_PAGE, &["SWE-bench Verified"]).unwrap();
        assert!(results[0].entries.iter().all(|e| e.resolved <= 100.0));
    }

    #[test]
    fn malformed_blob_is_a_distinct_error() {
        let page = r#"<script>[{"name": "SWE-bench Verified", "results": [{"name": "x", "resolved": }]}]</script>"#;
        let err = parse_benchmark(page, &["SWE-bench Verified"]).unwrap_err();
        assert!(matches!(err, IndexError::LeaderboardParse(_)));
    }

    #[test]
    fn no_blob_falls_through_to_markdown() {
        let page = "\
# SWE-bench Verified\n\
| Rank | Model | Resolved |\n\
|------|-------|----------|\n\
| 1 | Claude 4.5 | 74.2% |\n\
| 2 | GPT-5 Agent | 71.8% |\n";
        let results = parse_benchmark(page, &["SWE-bench Verified"]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entries[0].model, "Claude 4.5");
        assert_eq!(results[0].entries[0].resolved, 74.2);
    }

    #[test]
    fn markdown_rows_under_other_headings_are_ignored() {
        let page = "\
# Something Else\n\
| 1 | NotOurs | 99.0% |\n\
# SWE-bench Verified\n\
| 1 | Claude 4.5 | 74.2% |\n";
        let results = parse_benchmark(page, &["SWE-bench Verified"]).unwrap();
        assert_eq!(results[0].entries.len(), 1);
        assert_eq!(results[0].entries[0].model, "Claude 4.5");
    }

    #[test]
    fn nothing_found_yields_empty_not_error() {
        let results = parse_benchmark("<html>maintenance page</html>", &["SWE-bench"]).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn track_match_is_case_and_spacing_insensitive() {
        let results = parse_benchmark(BLOB_PAGE, &["SWE BENCH LITE"]).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].entries[0].resolved, 61.3);
    }
}
