//! Duration strings.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s*(ms|s|m|h)\s*$").unwrap());

/// Parse a duration such as `700ms`, `1.5s`, `20s`, `1m` or `2h`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let caps = DURATION_REGEX.captures(input)?;
    let value: f64 = caps[1].parse().ok()?;
    let millis = match &caps[2] {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return None,
    };
    // Millisecond resolution is all the scheduler needs.
    Some(Duration::from_millis(millis.round() as u64))
}
