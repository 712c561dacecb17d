//! Tracing subscriber setup.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LoggingSection;
use crate::error::{Result, ServerError};

/// Builds the filter: `RUST_LOG` when set, otherwise `vigil=<level>` for
/// every Vigil crate.
///
/// # Errors
///
/// Returns `ServerError::Config` if the level is not a valid directive.
pub fn env_filter(logging: &LoggingSection) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::new("warn");
    for target in ["vigil", "vigil_server", "vigil_filter", "vigil_checker", "vigil_events", "vigil_metrics"] {
        let directive = format!("{target}={}", logging.level)
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid logging.level '{}': {e}", logging.level)))?;
        filter = filter.add_directive(directive);
    }
    Ok(filter)
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns `ServerError::Config` for an invalid level or if a subscriber is
/// already installed.
pub fn init_tracing(logging: &LoggingSection) -> Result<()> {
    let filter = env_filter(logging)?;
    let (json, plain) = if logging.json {
        (Some(fmt::layer().json()), None)
    } else {
        (None, Some(fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(plain)
        .try_init()
        .map_err(|e| ServerError::Config(format!("failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_level() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let logging = LoggingSection {
            level: "loud".to_string(),
            json: false,
        };
        assert!(env_filter(&logging).is_err());
    }

    #[test]
    fn accepts_default_level() {
        assert!(env_filter(&LoggingSection::default()).is_ok());
    }
}
