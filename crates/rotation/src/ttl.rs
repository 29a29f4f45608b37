//! TTL parsing: Go-style duration strings extended with a days suffix.
//!
//! Accepts the usual `ns`/`us`/`µs`/`ms`/`s`/`m`/`h` units, fractional
//! values (`1.5h`), concatenated segments (`2h45m`), and additionally `Nd`
//! for N days (`90d`, `1.5d`), which service catalogs use for credential
//! lifetimes.

use std::time::Duration;

use umbra_error::{Result, UmbraError};

const NANOS_PER: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1_000.0),
    ("µs", 1_000.0),
    ("ms", 1_000_000.0),
    ("s", 1_000_000_000.0),
    ("m", 60.0 * 1_000_000_000.0),
    ("h", 3_600.0 * 1_000_000_000.0),
    ("d", 86_400.0 * 1_000_000_000.0),
];

/// Parse a TTL string into a duration.
pub fn parse_ttl(input: &str) -> Result<Duration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid(input, "empty duration"));
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total_nanos = 0.0f64;
    let mut rest = trimmed;
    let mut matched_any = false;

    while !rest.is_empty() {
        // Leading number (integer or decimal).
        let number_len = rest
            .char_indices()
            .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .ok_or_else(|| invalid(input, format!("expected a number at '{rest}'")))?;
        let (number_str, after_number) = rest.split_at(number_len);
        let value: f64 = number_str
            .parse()
            .map_err(|_| invalid(input, format!("bad number '{number_str}'")))?;

        // Unit. Longest-match first so `ms` wins over `m`.
        let mut unit_matched = None;
        for (unit, nanos) in NANOS_PER {
            if after_number.starts_with(unit) {
                match unit_matched {
                    Some((prev, _)) if str::len(prev) >= unit.len() => {}
                    _ => unit_matched = Some((*unit, *nanos)),
                }
            }
        }
        let (unit, nanos) =
            unit_matched.ok_or_else(|| invalid(input, format!("missing unit after '{number_str}'")))?;

        total_nanos += value * nanos;
        matched_any = true;
        rest = &after_number[unit.len()..];
    }

    if !matched_any {
        return Err(invalid(input, "no duration segments"));
    }
    if total_nanos < 0.0 || !total_nanos.is_finite() {
        return Err(invalid(input, "duration out of range"));
    }
    Ok(Duration::from_nanos(total_nanos as u64))
}

fn invalid(input: &str, why: impl Into<String>) -> UmbraError {
    UmbraError::validation(format!("invalid duration '{input}': {}", why.into()))
        .with_suggestion("use Go-style durations like 30m, 1.5h, 2h45m, or 90d")
}
