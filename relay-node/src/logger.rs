//! Logging initialisation via tracing-subscriber.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Initialise the global subscriber. `RUST_LOG` takes precedence; `level`
/// (from config) is the fallback.
pub fn init(level: &str) -> Result<(), LoggerError> {
    parse_level(level)?;
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| LoggerError::Filter(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LoggerError::Install(e.to_string()))
}

/// Validate a plain level string such as `"info"` or `"debug"`.
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggerError> {
    if level.is_empty() {
        return Err(LoggerError::Filter("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| LoggerError::Filter(format!("unrecognised log level: '{level}'")))
}

#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    #[error("{0}")]
    Filter(String),
    #[error("failed to set subscriber: {0}")]
    Install(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_levels_parse() {
        for l in &["error", "warn", "info", "debug", "trace"] {
            assert!(parse_level(l).is_ok(), "expected '{l}' to be valid");
        }
    }

    #[test]
    fn invalid_level_errors() {
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("").is_err());
        assert!(matches!(init("loud"), Err(LoggerError::Filter(_))));
    }
}
