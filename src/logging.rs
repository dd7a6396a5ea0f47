//! Logging Setup
//!
//! Installs the global tracing subscriber. `RUST_LOG` wins over the
//! configured level; output goes to stderr unless a log file is set.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log filter {filter:?}: {error}")]
    Filter { filter: String, error: String },

    #[error("Failed to open log file {path:?}: {error}")]
    File { path: PathBuf, error: String },

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Unknown names fall back to pretty
    pub fn parse(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Initialize the global subscriber from config
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(std::env::var("RUST_LOG").ok(), &config.level)?;
    let writer = make_writer(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match LogFormat::parse(&config.format) {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(writer))
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_writer(writer)).try_init(),
    };
    result.map_err(|e| LoggingError::Init(e.to_string()))
}

fn build_filter(env: Option<String>, level: &str) -> Result<EnvFilter, LoggingError> {
    let directives = env
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| level.to_string());
    EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
        filter: directives.clone(),
        error: e.to_string(),
    })
}

fn make_writer(config: &LoggingConfig) -> Result<BoxMakeWriter, LoggingError> {
    let path = match &config.file {
        Some(path) => PathBuf::from(path),
        None => return Ok(BoxMakeWriter::new(std::io::stderr)),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| LoggingError::File {
            path: parent.to_path_buf(),
            error: e.to_string(),
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| LoggingError::File {
            path: path.clone(),
            error: e.to_string(),
        })?;
    Ok(BoxMakeWriter::new(Mutex::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_format_parse() {
        assert_eq!(LogFormat::parse("json"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" JSON "), LogFormat::Json);
        assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("fancy"), LogFormat::Pretty);
    }

    #[test]
    fn test_env_filter_wins() {
        assert!(build_filter(Some("incident_notify=trace".to_string()), "info").is_ok());
        assert!(build_filter(Some("  ".to_string()), "warn").is_ok());
        assert!(matches!(
            build_filter(None, "incident_notify=loudest"),
            Err(LoggingError::Filter { .. })
        ));
    }

    #[test]
    fn test_file_writer_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("notify.log");
        let config = LoggingConfig {
            file: Some(path.to_string_lossy().to_string()),
            ..LoggingConfig::default()
        };

        assert!(make_writer(&config).is_ok());
        assert!(path.exists());
    }
}
