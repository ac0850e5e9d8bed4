//! Human-readable durations such as `500ms`, `3m`, `1h30m` or `7d`.

use crate::{Error, Result};
use std::time::Duration;

/// Parses a duration made of one or more `<number><unit>` parts.
///
/// Units: `ns`, `us`, `ms`, `s`, `m`, `h`, `d`. A bare `0` is accepted.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for empty input, a missing or unknown
/// unit, or a value that overflows.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }
    if trimmed.is_empty() {
        return Err(invalid(input, "empty duration"));
    }

    let mut total = Duration::ZERO;
    let mut rest = trimmed;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        if digits == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid(input, "number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = scale(value, &rest[..unit_len]).ok_or_else(|| {
            if unit_len == 0 {
                invalid(input, "missing unit")
            } else {
                invalid(input, "unknown unit or value too large")
            }
        })?;
        rest = &rest[unit_len..];

        total = total
            .checked_add(part)
            .ok_or_else(|| invalid(input, "value too large"))?;
    }
    Ok(total)
}

/// Parses a scheduling interval; a leading `-` disables scheduling.
///
/// Negative intervals map to [`Duration::ZERO`].
///
/// # Errors
///
/// Same as [`parse_duration`] for the unsigned part.
pub fn parse_interval(input: &str) -> Result<Duration> {
    match input.trim().strip_prefix('-') {
        Some(magnitude) => parse_duration(magnitude).map(|_| Duration::ZERO),
        None => parse_duration(input),
    }
}

/// Parses an optional bound; `none`, `off` and `0` mean unbounded.
///
/// # Errors
///
/// Same as [`parse_duration`].
pub fn parse_optional_duration(input: &str) -> Result<Option<Duration>> {
    match input.trim().to_lowercase().as_str() {
        "none" | "off" | "0" => Ok(None),
        _ => parse_duration(input).map(Some),
    }
}

fn scale(value: u64, unit: &str) -> Option<Duration> {
    let secs_per = |factor: u64| value.checked_mul(factor).map(Duration::from_secs);
    match unit {
        "ns" => Some(Duration::from_nanos(value)),
        "us" | "µs" => Some(Duration::from_micros(value)),
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => secs_per(60),
        "h" => secs_per(60 * 60),
        "d" => secs_per(24 * 60 * 60),
        _ => None,
    }
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidInput(format!("invalid duration '{input}': {reason}"))
}
