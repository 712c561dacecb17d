//! Plaintext metric line parsing.
//!
//! Lines follow the Graphite plaintext protocol: `name value timestamp`,
//! separated by whitespace.

use vigil_metrics::MetricName;

use crate::error::{FilterError, Result};

/// Latest accepted timestamp, 9999-12-31T23:59:59Z.
pub const MAX_TIMESTAMP: i64 = 253_402_300_799;

/// A parsed, not yet matched, metric line.
#[derive(Debug, Clone, PartialEq)]
pub struct PlainMetric {
    /// The series name.
    pub name: String,
    /// The value.
    pub value: f64,
    /// Unix timestamp in seconds.
    pub timestamp: i64,
}

/// Parses one `name value timestamp` line.
///
/// Fractional timestamps are truncated to whole seconds.
///
/// # Errors
///
/// Returns `FilterError::InvalidLine` if the line does not have exactly
/// three fields, the name is not a valid series name, the value is not a
/// finite number, or the timestamp is not a number in
/// `0..=`[`MAX_TIMESTAMP`].
pub fn parse_line(line: &str) -> Result<PlainMetric> {
    let invalid = |reason: String| FilterError::InvalidLine {
        line: line.to_string(),
        reason,
    };

    let mut fields = line.split_whitespace();
    let (Some(name), Some(value), Some(timestamp), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(invalid("expected `name value timestamp`".to_string()));
    };

    let name = MetricName::new(name).map_err(|e| invalid(e.to_string()))?;

    let value: f64 = value
        .parse()
        .map_err(|_| invalid(format!("value {value:?} is not a number")))?;
    if !value.is_finite() {
        return Err(invalid(format!("value {value} is not finite")));
    }

    let timestamp = parse_timestamp(timestamp)
        .ok_or_else(|| invalid(format!("timestamp {timestamp:?} is not a number")))?;
    if !(0..=MAX_TIMESTAMP).contains(&timestamp) {
        return Err(invalid(format!("timestamp {timestamp} is out of range")));
    }

    Ok(PlainMetric {
        name: name.into_inner(),
        value,
        timestamp,
    })
}

#[allow(clippy::cast_possible_truncation)]
fn parse_timestamp(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|ts| ts.is_finite())
            .map(|ts| ts.trunc() as i64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn parses_plaintext_line() {
        let parsed = parse_line("servers.web-01.cpu 42.5 1700000000").unwrap();
        assert_eq!(
            parsed,
            PlainMetric {
                name: "servers.web-01.cpu".to_string(),
                value: 42.5,
                timestamp: 1_700_000_000,
            }
        );
    }

    #[test]
    fn tolerates_extra_whitespace_and_fractional_timestamp() {
        let parsed = parse_line("  a.b\t-1e3   1700000000.75 \n").unwrap();
        assert_eq!(parsed.value, -1000.0);
        assert_eq!(parsed.timestamp, 1_700_000_000);
    }

    #[test_case("" ; "empty")]
    #[test_case("a.b 1" ; "missing timestamp")]
    #[test_case("a.b 1 2 3" ; "extra field")]
    #[test_case("a.b one 2" ; "value not a number")]
    #[test_case("a.b NaN 2" ; "value not finite")]
    #[test_case("a.b 1 soon" ; "timestamp not a number")]
    #[test_case("a.b 1 -1" ; "negative timestamp")]
    #[test_case("servers.web-01.cpu 1 -1e30" ; "huge negative float timestamp")]
    #[test_case("a.b 1 1e30" ; "huge float timestamp")]
    #[test_case("a.b 1 9223372036854775807" ; "timestamp beyond year 9999")]
    fn rejects_malformed(line: &str) {
        assert!(matches!(parse_line(line), Err(FilterError::InvalidLine { .. })));
    }

    #[test]
    fn accepts_timestamp_bounds() {
        assert_eq!(parse_line("a.b 1 0").unwrap().timestamp, 0);
        assert_eq!(
            parse_line(&format!("a.b 1 {MAX_TIMESTAMP}")).unwrap().timestamp,
            MAX_TIMESTAMP
        );
    }
}
