//! Graphite-style pattern matching for ingested series names.
//!
//! A pattern is a dot-separated path. Within one segment, `*` matches any
//! run of characters and `{a,b}` matches any listed alternative, so
//! `servers.web-*.{cpu,mem}` matches `servers.web-01.cpu`.

use tracing::trace;

use crate::error::{FilterError, Result};
use crate::line::PlainMetric;
use crate::types::{DEFAULT_RETENTION, MatchedMetric};

/// A parsed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    /// One entry per path segment; each holds the alternatives with braces
    /// expanded.
    segments: Vec<Vec<String>>,
}

impl Pattern {
    /// Parses a pattern.
    ///
    /// # Errors
    ///
    /// Returns `FilterError::InvalidPattern` for empty segments or
    /// unbalanced or nested braces.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let invalid = |reason: &str| FilterError::InvalidPattern {
            pattern: raw.clone(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("empty pattern"));
        }

        let mut segments = Vec::new();
        for segment in split_segments(&raw).ok_or_else(|| invalid("unbalanced braces"))? {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            segments.push(expand_braces(segment).ok_or_else(|| invalid("unbalanced or nested braces"))?);
        }

        Ok(Self { raw, segments })
    }

    /// Returns the pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the series name matches.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        let mut parts = name.split('.');
        for alternatives in &self.segments {
            let Some(part) = parts.next() else {
                return false;
            };
            if !alternatives.iter().any(|glob| wildcard_match(glob, part)) {
                return false;
            }
        }
        parts.next().is_none()
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Splits on dots outside braces, so `{a.b,c}` stays one segment.
fn split_segments(raw: &str) -> Option<Vec<&str>> {
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.checked_sub(1)?,
            '.' if depth == 0 => {
                segments.push(&raw[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    if depth != 0 {
        return None;
    }
    segments.push(&raw[start..]);
    Some(segments)
}

/// Expands one brace group: `web-{a,b}` becomes `web-a`, `web-b`.
fn expand_braces(segment: &str) -> Option<Vec<String>> {
    let Some(open) = segment.find('{') else {
        return (!segment.contains('}')).then(|| vec![segment.to_string()]);
    };
    let close = open + segment[open..].find('}')?;

    let (prefix, inner, suffix) = (&segment[..open], &segment[open + 1..close], &segment[close + 1..]);
    if inner.contains('{') || suffix.contains('{') || suffix.contains('}') {
        return None;
    }

    Some(
        inner
            .split(',')
            .map(|alt| format!("{prefix}{alt}{suffix}"))
            .collect(),
    )
}

/// Matches `text` against a glob where `*` matches any run of characters.
fn wildcard_match(glob: &str, text: &str) -> bool {
    let (glob, text) = (glob.as_bytes(), text.as_bytes());
    let (mut g, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if g < glob.len() && glob[g] == b'*' {
            backtrack = Some((g, t));
            g += 1;
        } else if g < glob.len() && glob[g] == text[t] {
            g += 1;
            t += 1;
        } else if let Some((star, matched)) = backtrack {
            g = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    glob[g..].iter().all(|b| *b == b'*')
}

/// The set of patterns ingest matches series names against.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    retention: i64,
}

impl PatternSet {
    /// Parses every pattern.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to parse.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Pattern::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            retention: DEFAULT_RETENTION,
        })
    }

    /// Sets the sampling resolution stamped on matched metrics.
    #[must_use]
    pub const fn with_retention(mut self, retention: i64) -> Self {
        self.retention = retention;
        self
    }

    /// Returns the number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if there are no patterns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns every pattern the name matches.
    #[must_use]
    pub fn matching(&self, name: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|p| p.matches(name))
            .map(|p| p.as_str().to_string())
            .collect()
    }

    /// Matches a parsed line, returning `None` if no pattern matches.
    #[must_use]
    pub fn match_metric(&self, metric: PlainMetric) -> Option<MatchedMetric> {
        let patterns = self.matching(&metric.name);
        if patterns.is_empty() {
            trace!(metric = %metric.name, "no pattern matched");
            return None;
        }

        Some(MatchedMetric::new(
            metric.name,
            patterns,
            metric.value,
            metric.timestamp,
            self.retention,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pattern_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("servers.web-01.cpu", "servers.web-01.cpu", true ; "exact")]
        #[test_case("servers.*.cpu", "servers.web-01.cpu", true ; "star segment")]
        #[test_case("servers.*.cpu", "servers.web.01.cpu", false ; "star does not cross dots")]
        #[test_case("servers.web-*.cpu", "servers.web-01.cpu", true ; "star suffix")]
        #[test_case("servers.*-01.cpu", "servers.db-02.cpu", false ; "star prefix mismatch")]
        #[test_case("servers.web-01.{cpu,mem}", "servers.web-01.mem", true ; "alternatives")]
        #[test_case("servers.web-01.{cpu,mem}", "servers.web-01.disk", false ; "alternative miss")]
        #[test_case("servers.web-{01,02}-a.cpu", "servers.web-02-a.cpu", true ; "alternatives with affixes")]
        #[test_case("servers.*", "servers.web-01.cpu", false ; "too few segments")]
        #[test_case("servers.*.cpu.*", "servers.web-01.cpu", false ; "too many segments")]
        #[test_case("*", "", true ; "star matches empty")]
        fn matches(pattern: &str, name: &str, expected: bool) {
            assert_eq!(Pattern::parse(pattern).unwrap().matches(name), expected);
        }

        #[test_case("" ; "empty")]
        #[test_case("a..b" ; "empty segment")]
        #[test_case("a.{b,c" ; "unclosed brace")]
        #[test_case("a.b,c}" ; "stray close brace")]
        #[test_case("a.{b,{c,d}}" ; "nested braces")]
        fn rejects_invalid(pattern: &str) {
            assert!(matches!(
                Pattern::parse(pattern),
                Err(FilterError::InvalidPattern { .. })
            ));
        }

        #[test]
        fn wildcard_backtracks() {
            assert!(wildcard_match("a*b*c", "axxbyyc"));
            assert!(wildcard_match("a*c", "abcbc"));
            assert!(!wildcard_match("a*c", "abcb"));
            assert!(wildcard_match("**", "anything"));
        }
    }

    mod set_tests {
        use super::*;

        #[test]
        fn matching_returns_every_hit() {
            let set = PatternSet::new(["servers.*.cpu", "servers.web-01.*", "db.*"]).unwrap();

            assert_eq!(
                set.matching("servers.web-01.cpu"),
                vec!["servers.*.cpu", "servers.web-01.*"]
            );
            assert!(set.matching("other.metric").is_empty());
        }

        #[test]
        fn match_metric_stamps_retention() {
            let set = PatternSet::new(["a.*"]).unwrap().with_retention(10);
            let matched = set
                .match_metric(PlainMetric {
                    name: "a.b".to_string(),
                    value: 2.5,
                    timestamp: 1_005,
                })
                .unwrap();

            assert_eq!(matched.patterns, vec!["a.*"]);
            assert_eq!(matched.retention, 10);
            assert_eq!(matched.retention_timestamp, 1_000);
        }

        #[test]
        fn unmatched_metric_is_dropped() {
            let set = PatternSet::new(["a.*"]).unwrap();
            let plain = PlainMetric {
                name: "b.c".to_string(),
                value: 1.0,
                timestamp: 1,
            };
            assert!(set.match_metric(plain).is_none());
        }

        #[test]
        fn new_reports_bad_pattern() {
            assert!(PatternSet::new(["ok.*", "bad.{"]).is_err());
        }
    }
}
