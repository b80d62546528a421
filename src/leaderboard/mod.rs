//! Leaderboard scrapers
//!
//! External leaderboards are outside our control, so each one is parsed
//! by an ordered list of independently-testable strategies. A strategy
//! either yields entries, falls through to the next, or raises a hard
//! parse error when the page is present but corrupt.

pub mod agents;
pub mod benchmark;

pub use agents::{parse_agent_leaderboard, AgentEntry, AgentLeaderboard};
pub use benchmark::{parse_benchmark, BenchmarkEntry, TrackResult};

/// Case/spacing-insensitive normalization used when matching track and
/// section names against requested ones.
pub(crate) fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
