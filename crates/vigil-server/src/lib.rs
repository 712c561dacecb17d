//! Vigil pipeline server.
//!
//! Reads plain-text metric lines (`name value timestamp`), batches matched
//! points into the pattern index, dispatches trigger checks and delivers
//! queued notifications. Configuration comes from one TOML file; see
//! [`ServerConfig`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod pipeline;

pub use config::{CheckerSection, EventsSection, FilterSection, LoggingSection, ServerConfig};
pub use error::{Result, ServerError};
pub use logging::{env_filter, init_tracing};
pub use pipeline::{IngestStats, Pipeline, ShutdownReport};
