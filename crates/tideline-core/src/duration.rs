//! Human-readable duration strings ("500ms", "30s", "5m", "1h").

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration {0:?}: expected a number with an optional ms/s/m/h suffix")]
pub struct DurationError(pub String);

/// Parse a duration string like "5s", "500ms", "2m", "1h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    let invalid = || DurationError(s.to_string());

    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(|ms| Some(Duration::from_millis(ms)))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(|secs| Some(Duration::from_secs(secs)))
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().map(|m| m.checked_mul(60).map(Duration::from_secs))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().map(|h| h.checked_mul(3600).map(Duration::from_secs))
    } else {
        s.parse::<u64>().map(|secs| Some(Duration::from_secs(secs)))
    };

    // Overflowing minute or hour counts are as invalid as garbage.
    parsed.ok().flatten().ok_or_else(invalid)
}
