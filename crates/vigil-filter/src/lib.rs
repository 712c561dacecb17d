//! Metric matching and batched persistence for Vigil.
//!
//! `vigil-filter` sits between ingest and the checker:
//!
//! - [`parse_line`] and [`PatternSet`] turn plaintext lines into
//!   [`MatchedMetric`]s
//! - [`MetricsMatcher`] batches them and flushes through a [`PatternIndex`]
//! - [`MemoryPatternIndex`] archives the values and publishes one
//!   [`MetricEvent`] per matched pattern for the checker
//!
//! # Example
//!
//! ```rust
//! use vigil_filter::{PatternSet, parse_line};
//!
//! let patterns = PatternSet::new(["servers.*.cpu"]).unwrap();
//! let line = parse_line("servers.web-01.cpu 93.5 1700000000").unwrap();
//!
//! let matched = patterns.match_metric(line).unwrap();
//! assert_eq!(matched.patterns, vec!["servers.*.cpu"]);
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/vigil-filter/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod index;
pub mod line;
pub mod matcher;
pub mod patterns;
pub mod types;

// Re-export main types at crate root
pub use error::{FilterError, Result};
pub use index::{MemoryPatternIndex, PatternIndex};
pub use line::{MAX_TIMESTAMP, PlainMetric, parse_line};
pub use matcher::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, MatcherConfig, MetricsMatcher};
pub use patterns::{Pattern, PatternSet};
pub use types::{DEFAULT_RETENTION, MatchedMetric, MetricBatch, MetricEvent};
