//! Agent-leaderboard parser
//!
//! The source is server-rendered markup with no structured data
//! attribute. The parser scans for rank markers, then extracts the
//! agent/model/overall/pass-rate/per-language cells from a bounded
//! trailing window by positional pattern matching.

use crate::error::IndexError;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"<[^>]+>").unwrap();
    static ref RANK_RE: Regex = Regex::new(r"^#?(\d{1,3})\.?$").unwrap();
    static ref NUMBER_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)\s*%?$").unwrap();
}

/// Cells inspected after each rank marker before giving up on the row.
const TRAILING_WINDOW: usize = 12;

/// Stored entries are capped at the top of the board.
const MAX_STORED_ENTRIES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub rank: u32,
    pub agent: String,
    pub model: String,
    pub overall: f64,
    pub pass_rate: f64,
    pub language_scores: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLeaderboard {
    /// Top entries, sorted descending by overall score.
    pub entries: Vec<AgentEntry>,
    /// Middle of the full sorted board, before the storage cap.
    pub median_overall: f64,
}

impl AgentLeaderboard {
    pub fn top(&self) -> Option<&AgentEntry> {
        self.entries.first()
    }
}

/// Parse a server-rendered agent leaderboard page.
///
/// Zero valid rows is a hard error — upstream treats it as a fetch
/// failure, never as a silently empty board.
pub fn parse_agent_leaderboard(html: &str) -> Result<AgentLeaderboard> {
    let text = TAG_RE.replace_all(html, "\n");
    let cells: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let mut entries = Vec::new();
    let mut next_rank = 1u32;

    for (i, cell) in cells.iter().enumerate() {
        // Rank markers must ascend from 1; bare integer score cells
        // elsewhere on the page never start a row.
        if !is_rank_marker(cell, next_rank) {
            continue;
        }
        let rank = next_rank;
        next_rank += 1;

        let window_end = (i + 1 + TRAILING_WINDOW).min(cells.len());
        if let Some(entry) = extract_entry(rank, &cells[i + 1..window_end]) {
            entries.push(entry);
        }
    }

    if entries.is_empty() {
        return Err(IndexError::LeaderboardEmpty(
            "no valid rows in agent leaderboard".to_string(),
        ));
    }

    entries.sort_by(|a, b| b.overall.total_cmp(&a.overall));
    let median_overall = entries[entries.len() / 2].overall;
    entries.truncate(MAX_STORED_ENTRIES);

    Ok(AgentLeaderboard {
        entries,
        median_overall,
    })
}

/// Positional extraction within the trailing window: agent name, model
/// name, then a run of numbers — overall, pass rate, per-language.
fn extract_entry(rank: u32, window: &[&str]) -> Option<AgentEntry> {
    let mut agent: Option<String> = None;
    let mut model: Option<String> = None;
    let mut numbers: Vec<f64> = Vec::new();

    for cell in window {
        if is_rank_marker(cell, rank + 1) {
            break;
        }

        if let Some(value) = numeric_cell(cell) {
            // Numbers before the agent name are noise (movement arrows).
            if agent.is_some() {
                numbers.push(value);
            }
            continue;
        }

        if agent.is_none() {
            agent = Some(cell.to_string());
        } else if model.is_none() && numbers.is_empty() {
            model = Some(cell.to_string());
        } else if !numbers.is_empty() {
            // Text after the score run belongs to the next row.
            break;
        }
    }

    let agent = agent?;
    let overall = numbers.first().copied().unwrap_or(0.0);
    let pass_rate = numbers.get(1).copied().unwrap_or(0.0);

    // Placeholder rows carry zeros in both score columns.
    if overall <= 0.0 && pass_rate <= 0.0 {
        return None;
    }

    Some(AgentEntry {
        rank,
        agent,
        model: model.unwrap_or_else(|| "Unknown".to_string()),
        overall,
        pass_rate,
        language_scores: numbers.get(2..).unwrap_or_default().to_vec(),
    })
}

fn is_rank_marker(cell: &str, expected: u32) -> bool {
    RANK_RE
        .captures(cell)
        .and_then(|caps| caps[1].parse::<u32>().ok())
        .map(|rank| rank == expected)
        .unwrap_or(false)
}

fn numeric_cell(cell: &str) -> Option<f64> {
    NUMBER_RE
        .captures(cell)
        .and_then(|caps| caps[1].parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "\
<table>\
<tr><td>1</td><td>Devika Swarm</td><td>claude-4.5</td><td>61.2%</td><td>70.4%</td><td>64.0</td><td>58.5</td></tr>\
<tr><td>2</td><td>AutoCoder</td><td>gpt-5</td><td>57.8%</td><td>66.1%</td><td>60.2</td><td>55.0</td></tr>\
<tr><td>3</td><td>Placeholder Agent</td><td>tbd</td><td>0</td><td>0</td></tr>\
<tr><td>4</td><td>PatchBot</td><td>gemini-2.5</td><td>49.3%</td><td>58.7%</td><td>51.1</td><td>47.2</td></tr>\
</table>";

    #[test]
    fn parses_rows_and_sorts_descending() {
        let board = parse_agent_leaderboard(PAGE).unwrap();
        assert_eq!(board.entries.len(), 3);
        assert_eq!(board.entries[0].agent, "Devika Swarm");
        assert_eq!(board.entries[0].model, "claude-4.5");
        assert_eq!(board.entries[0].overall, 61.2);
        assert_eq!(board.entries[0].pass_rate, 70.4);
        assert_eq!(board.entries[0].language_scores, vec![64.0, 58.5]);
        assert!(board.entries[1].overall >= board.entries[2].overall);
    }

    #[test]
    fn placeholder_rows_are_dropped() {
        let board = parse_agent_leaderboard(PAGE).unwrap();
        assert!(board.entries.iter().all(|e| e.agent != "Placeholder Agent"));
    }

    #[test]
    fn median_is_middle_of_sorted_board() {
        let board = parse_agent_leaderboard(PAGE).unwrap();
        // Sorted overall: 61.2, 57.8, 49.3 → middle index 1.
        assert_eq!(board.median_overall, 57.8);
    }

    #[test]
    fn zero_valid_rows_is_a_hard_error() {
        let err = parse_agent_leaderboard("<html>nothing here</html>").unwrap_err();
        assert!(matches!(err, IndexError::LeaderboardEmpty(_)));
    }

    #[test]
    fn entries_are_capped_at_top_ten() {
        let mut page = String::from("<table>");
        for rank in 1..=14 {
            page.push_str(&format!(
                "<tr><td>{}</td><td>Agent{}</td><td>model</td><td>{}.0</td><td>50.0</td></tr>",
                rank,
                rank,
                90 - rank
            ));
        }
        page.push_str("</table>");

        let board = parse_agent_leaderboard(&page).unwrap();
        assert_eq!(board.entries.len(), 10);
        // Median computed over all 14 before the cap: sorted desc, index 7.
        assert_eq!(board.median_overall, 82.0);
    }

    #[test]
    fn missing_model_cell_defaults_to_unknown() {
        let page = "<tr><td>1</td><td>SoloAgent</td><td>44.0</td><td>50.0</td></tr>";
        let board = parse_agent_leaderboard(page).unwrap();
        assert_eq!(board.entries[0].model, "Unknown");
        assert_eq!(board.entries[0].overall, 44.0);
    }
}
