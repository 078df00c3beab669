use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind};

const UNITS: &[(&str, f64)] = &[
    ("ns", 1e-9),
    ("us", 1e-6),
    ("µs", 1e-6),
    ("ms", 1e-3),
    ("s", 1.0),
    ("m", 60.0),
    ("h", 3600.0),
];

/// Parses durations written as a sequence of decimal numbers with unit
/// suffixes, e.g. `90s`, `1h30m` or `1.5h`.
pub fn parse_duration(input: &str) -> Result<Duration, CoreError> {
    let text = input.trim();
    if text.is_empty() {
        return Err(invalid(input, "duration is empty"));
    }
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.starts_with('-') {
        return Err(invalid(input, "duration must not be negative"));
    }

    let mut rest = text.strip_prefix('+').unwrap_or(text);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| invalid(input, "malformed number"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS
            .iter()
            .find(|(name, _)| *name == unit)
            .map(|(_, scale)| *scale)
            .ok_or_else(|| {
                if unit.is_empty() {
                    invalid(input, "missing unit")
                } else {
                    invalid(input, &format!("unknown unit '{unit}'"))
                }
            })?;
        rest = &rest[unit_len..];

        total += value * scale;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid(input, "duration out of range"))
}

fn invalid(input: &str, reason: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::InvalidInput,
        format!("invalid duration '{input}': {reason}"),
    )
}
