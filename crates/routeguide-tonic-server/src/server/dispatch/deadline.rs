//! Caller deadlines.
//!
//! A client states its deadline in the `grpc-timeout` request header: at most
//! eight ASCII digits followed by a unit, one of `H` (hours), `M` (minutes),
//! `S` (seconds), `m` (milliseconds), `u` (microseconds) or `n`
//! (nanoseconds).

use core::time::Duration;
use tonic::metadata::MetadataMap;

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Longest accepted value: eight digits and a unit.
const MAX_TIMEOUT_LEN: usize = 9;

/// Reads the caller's deadline from the request metadata.
///
/// A missing or malformed header yields `None`; the call then falls back to
/// the server's own request timeout, if any.
pub fn requested_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    let timeout = parse_timeout(value);
    if timeout.is_none() {
        tracing::debug!(value, "ignoring malformed grpc-timeout");
    }
    timeout
}

fn parse_timeout(value: &str) -> Option<Duration> {
    if !value.is_ascii() || value.len() < 2 || value.len() > MAX_TIMEOUT_LEN {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// The tighter of two optional limits.
pub fn earliest(a: Option<Duration>, b: Option<Duration>) -> Option<Duration> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_timeout("10S"), Some(Duration::from_secs(10)));
        assert_eq!(parse_timeout("150m"), Some(Duration::from_millis(150)));
        assert_eq!(parse_timeout("250u"), Some(Duration::from_micros(250)));
        assert_eq!(parse_timeout("99999999n"), Some(Duration::from_nanos(99_999_999)));
    }

    #[test]
    fn rejects_malformed_values() {
        for value in ["", "m", "10", "10x", "-5S", "1.5S", "123456789S", " 5S"] {
            assert_eq!(parse_timeout(value), None, "{value:?}");
        }
    }

    #[test]
    fn reads_the_header_from_metadata() {
        let mut metadata = MetadataMap::new();
        assert_eq!(requested_timeout(&metadata), None);

        metadata.insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("500m"));
        assert_eq!(requested_timeout(&metadata), Some(Duration::from_millis(500)));

        metadata.insert(GRPC_TIMEOUT_HEADER, MetadataValue::from_static("soon"));
        assert_eq!(requested_timeout(&metadata), None);
    }

    #[test]
    fn earliest_prefers_the_tighter_limit() {
        let short = Some(Duration::from_millis(10));
        let long = Some(Duration::from_secs(10));
        assert_eq!(earliest(short, long), short);
        assert_eq!(earliest(long, short), short);
        assert_eq!(earliest(None, long), long);
        assert_eq!(earliest(short, None), short);
        assert_eq!(earliest(None, None), None);
    }
}
