//! Funding amount parsing and deduplication
//!
//! Funding headlines state the same round in many shapes ("$500M",
//! "up to 500 million", "$0.5B"). These helpers normalize free-text
//! amounts into millions USD and build collision keys so equivalent
//! statements from different feeds dedupe to one event.

/// Leading qualifiers stripped from amounts before parsing, so
/// "up to $500M" and "$500M" build the same key.
const AMOUNT_QUALIFIERS: &[&str] = &[
    "up to",
    "more than",
    "at least",
    "approximately",
    "around",
    "about",
    "roughly",
    "nearly",
    "almost",
];

/// Currency markers that are not USD. Fails soft to 0 upstream.
const NON_USD_MARKERS: &[&str] = &["€", "£", "¥", "eur", "gbp", "jpy", "cny", "inr"];

/// Bare numbers at or above this are raw dollars, below are already
/// millions.
const RAW_DOLLAR_THRESHOLD: f64 = 100_000.0;

/// Parse a free-text currency amount into millions USD.
///
/// Recognizes K/M/B/T suffixes (case-insensitive) and spelled-out
/// thousand/million/billion/trillion. Unparsable or non-USD input
/// yields 0.
pub fn parse_amount(raw: &str) -> f64 {
    try_parse_amount(raw).unwrap_or(0.0)
}

fn try_parse_amount(raw: &str) -> Option<f64> {
    let lowered = raw.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }

    if NON_USD_MARKERS.iter().any(|m| lowered.contains(m)) {
        return None;
    }

    let cleaned = lowered
        .replace("usd", " ")
        .replace('$', " ")
        .replace(',', "");
    let cleaned = cleaned.trim();

    let numeric_end = cleaned
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
        .map(|(i, c)| i + c.len_utf8())
        .last()?;

    let value: f64 = cleaned[..numeric_end].parse().ok()?;
    let suffix = cleaned[numeric_end..].trim_start();

    let millions = if suffix.is_empty() {
        if value >= RAW_DOLLAR_THRESHOLD {
            value / 1_000_000.0
        } else {
            value
        }
    } else if suffix.starts_with("thousand") || suffix.starts_with('k') {
        value / 1_000.0
    } else if suffix.starts_with("trillion") || suffix.starts_with('t') {
        value * 1_000_000.0
    } else if suffix.starts_with("billion") || suffix.starts_with('b') {
        value * 1_000.0
    } else if suffix.starts_with("million") || suffix.starts_with('m') {
        value
    } else {
        return None;
    };

    Some(millions)
}

/// Build a dedupe key of the form `company|amount` where equivalent
/// statements collide. Falls back to the raw lowercased amount when it
/// cannot be parsed.
pub fn dedupe_key(company: &str, amount: &str) -> String {
    let company = company.trim().to_lowercase();
    let mut amt = amount.trim().to_lowercase();

    loop {
        let mut stripped = false;
        for qualifier in AMOUNT_QUALIFIERS {
            if let Some(rest) = amt.strip_prefix(qualifier) {
                amt = rest.trim_start().to_string();
                stripped = true;
            }
        }
        if !stripped {
            break;
        }
    }

    match try_parse_amount(&amt) {
        Some(value) => format!("{}|{}", company, format_amount(value)),
        None => format!("{}|{}", company, amt),
    }
}

/// Tiered rounding that coalesces near-duplicate amounts reported by
/// different sources. Values are in millions USD.
pub fn bucket_amount(value: f64) -> f64 {
    if value < 10.0 {
        return value.round();
    }

    let granularity = if value < 100.0 {
        5.0
    } else if value < 1_000.0 {
        25.0
    } else if value < 10_000.0 {
        250.0
    } else {
        1_000.0
    };

    (value / granularity).round() * granularity
}

fn format_amount(value: f64) -> String {
    if (value - value.round()).abs() < 1e-9 {
        format!("{}", value.round() as i64)
    } else {
        format!("{}", value)
    }
}
