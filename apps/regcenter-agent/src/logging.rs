use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
    /// Write to stderr.
    pub console: bool,
    /// Also write to a daily-rotated file in this directory.
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::Text,
            console: true,
            directory: None,
            file_name: "regcenter-agent.log".to_owned(),
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Filter directive for the given config and `-v` count.
#[must_use]
pub fn default_directive(cfg: &LoggingConfig, verbose: u8) -> String {
    match verbose {
        0 => cfg.level.clone(),
        1 => "debug".to_owned(),
        _ => "trace".to_owned(),
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
///
/// # Errors
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or a global subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig, verbose: u8) -> Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) if verbose == 0 => filter,
        _ => EnvFilter::try_new(default_directive(cfg, verbose))
            .with_context(|| format!("invalid log level '{}'", cfg.level))?,
    };

    let mut layers: Vec<BoxedLayer> = Vec::new();

    if cfg.console {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
        layers.push(match cfg.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    let mut guard = None;
    if let Some(dir) = &cfg.directory {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, &cfg.file_name);
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        layers.push(match cfg.format {
            LogFormat::Text => layer.boxed(),
            LogFormat::Json => layer.json().boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn verbosity_overrides_configured_level() {
        let cfg = LoggingConfig {
            level: "warn".to_owned(),
            ..LoggingConfig::default()
        };
        assert_eq!(default_directive(&cfg, 0), "warn");
        assert_eq!(default_directive(&cfg, 1), "debug");
        assert_eq!(default_directive(&cfg, 3), "trace");
    }

    #[test]
    fn format_is_snake_case() {
        let cfg: LoggingConfig =
            serde_json::from_str(r#"{"format":"json","console":false}"#).unwrap();
        assert_eq!(cfg.format, LogFormat::Json);
        assert!(!cfg.console);
        assert_eq!(cfg.level, "info");
    }
}
