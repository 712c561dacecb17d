//! Series archive and self-metrics for the Vigil alerting pipeline.
//!
//! `vigil-metrics` holds the values the pipeline has seen for each series and
//! the Prometheus counters and histograms the pipeline reports about itself.
//!
//! # Example
//!
//! ```rust
//! use vigil_metrics::{MetricName, MetricPoint, MetricStore};
//! use std::time::Duration;
//!
//! // Keep one day of points per series
//! let store = MetricStore::new(Duration::from_secs(86_400));
//!
//! let name = MetricName::new("servers.web-01.cpu.user").unwrap();
//! let now = MetricPoint::now_timestamp();
//! store.push_batch(vec![(name.clone(), MetricPoint::new(now, 42.5))]).unwrap();
//!
//! assert_eq!(store.latest(&name).map(|p| p.value), Some(42.5));
//! ```

#![doc(html_root_url = "https://docs.rs/vigil-metrics/0.1.0")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod prometheus;
pub mod storage;
pub mod types;

// Re-export main types at crate root
pub use error::{MetricsError, Result};
pub use prometheus::{CheckerMetrics, FilterMetrics, NotifierMetrics, PipelineRegistry};
pub use storage::MetricStore;
pub use types::{MetricName, MetricPoint};
