//! Timing values for the `editor` section (`startup_timeout`,
//! `readiness_interval`, `grace_period`), written as `10s`, `250ms` or `1m`.

use std::time::Duration;

/// Parse `<n>ms`, `<n>s`, `<n>m` or a bare `<n>` (seconds).
///
/// Whitespace around the unit is tolerated. Negative, fractional and
/// overflowing values yield `None`, and the setting falls back to its
/// default.
///
/// ```
/// use devhost::config::parse_duration_string;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration_string("10s"), Some(Duration::from_secs(10)));
/// assert_eq!(parse_duration_string("250 ms"), Some(Duration::from_millis(250)));
/// ```
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();
    let unit_at = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (amount, unit) = s.split_at(unit_at);

    let amount: u64 = amount.parse().ok()?;
    let millis_per_unit = match unit.trim() {
        "ms" => 1,
        "" | "s" => 1_000,
        "m" => 60_000,
        _ => return None,
    };

    amount.checked_mul(millis_per_unit).map(Duration::from_millis)
}
