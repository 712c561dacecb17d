//! Trigger check dispatch for Vigil.
//!
//! `vigil-checker` consumes the [`MetricEvent`](vigil_filter::MetricEvent)s
//! published when matched points are saved and re-evaluates the triggers
//! watching each updated pattern.
//!
//! - [`CheckDispatcher`]: one task per metric event, one task per check,
//!   per-trigger mutual exclusion, an optional global concurrency cap and a
//!   periodic re-check of every known trigger
//! - [`ThresholdEvaluator`]: warn/error threshold triggers that queue a
//!   notification whenever their state changes
//! - [`LastActivity`]: when the last metric event was seen
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_checker::{CheckDispatcher, CheckerConfig, ThresholdEvaluator, TriggerDefinition};
//! use vigil_events::{EventStore, NotificationQueue};
//! use vigil_filter::{MemoryPatternIndex, MetricEvent};
//! use vigil_metrics::{MetricStore, PipelineRegistry};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let (index, _events) = MemoryPatternIndex::new(MetricStore::default());
//! index.register_trigger("cpu-high", ["servers.*.cpu"]);
//!
//! let queue = NotificationQueue::new(Arc::new(EventStore::in_memory()));
//! let evaluator = ThresholdEvaluator::new(Arc::new(index.clone()), queue.clone());
//! evaluator
//!     .upsert_trigger(TriggerDefinition {
//!         id: "cpu-high".to_string(),
//!         name: "CPU high".to_string(),
//!         patterns: vec!["servers.*.cpu".to_string()],
//!         warn_value: Some(80.0),
//!         error_value: Some(90.0),
//!     })
//!     .unwrap();
//!
//! let dispatcher = CheckDispatcher::new(
//!     Arc::new(index),
//!     Arc::new(evaluator),
//!     PipelineRegistry::new().checker_metrics().clone(),
//!     CheckerConfig::new(),
//! );
//! dispatcher
//!     .handle_metric_event(&MetricEvent::new("servers.*.cpu", "servers.web-01.cpu"))
//!     .await
//!     .unwrap();
//! # });
//! ```

#![forbid(unsafe_code)]
#![doc(html_root_url = "https://docs.rs/vigil-checker/0.1.0")]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod activity;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod locks;

// Re-export main types at crate root
pub use activity::LastActivity;
pub use config::{CheckerConfig, DEFAULT_CHECK_INTERVAL};
pub use dispatcher::CheckDispatcher;
pub use error::{CheckerError, Result};
pub use evaluator::{CheckFuture, CheckTask, ThresholdEvaluator, TriggerDefinition, TriggerEvaluator};
pub use locks::{TriggerGuard, TriggerLocks};
