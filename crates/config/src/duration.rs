//! Human-friendly duration strings used by the scheduler settings.

use anyhow::{Result, bail};

/// Parse a duration string such as `"30s"`, `"1m"`, `"2h"` or `"1d"` into
/// milliseconds.
pub fn parse_duration_ms(input: &str) -> Result<u64> {
    let input = input.trim();
    if input.is_empty() {
        bail!("empty duration string");
    }

    let Some(split) = input.find(|c: char| c.is_alphabetic()) else {
        bail!("duration missing unit suffix (ms/s/m/h/d): {input}");
    };
    let (num_str, suffix) = input.split_at(split);

    let value: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid number in duration: {num_str}"))?;

    if value == 0 {
        bail!("duration must be > 0");
    }

    let factor = match suffix {
        "ms" => 1,
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        _ => bail!("unknown duration suffix: {suffix} (expected ms/s/m/h/d)"),
    };

    value
        .checked_mul(factor)
        .ok_or_else(|| anyhow::anyhow!("duration too large: {input}"))
}
