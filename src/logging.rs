use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::{self, time::UtcTime};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogConfig, LogFormat};
use crate::{AppError, AppResult};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global subscriber: `config.filter` applied to a stderr layer
/// in the configured format, plus a daily-rolling JSON file when
/// `config.dir` is set. Keep the returned guard alive for as long as file
/// output should be flushed.
///
/// Calling this when a subscriber is already installed is not an error; the
/// existing subscriber stays in place.
pub fn init(config: &LogConfig) -> AppResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|err| {
        AppError::new("CONFIG/INVALID", "Invalid log filter.")
            .with_context("filter", config.filter.as_str())
            .with_cause(AppError::from(err.to_string()))
    })?;

    let mut layers: Vec<BoxedLayer> = Vec::with_capacity(2);
    layers.push(match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    });

    let mut guard = None;
    if let Some(dir) = &config.dir {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("larder")
            .filename_suffix("log")
            .build(dir)
            .map_err(|err| {
                AppError::new("CONFIG/INVALID", "Could not open the log directory.")
                    .with_context("dir", dir.display().to_string())
                    .with_cause(AppError::from(err.to_string()))
            })?;
        let (writer, worker) = tracing_appender::non_blocking(appender);
        layers.push(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer)
                .boxed(),
        );
        guard = Some(worker);
    }

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!(
            target: "larder",
            event = "logging_initialized",
            format = ?config.format,
            file = config.dir.is_some()
        );
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_filters() {
        let config = LogConfig {
            filter: "larder=notalevel".into(),
            ..LogConfig::default()
        };
        let err = init(&config).unwrap_err();
        assert_eq!(err.code(), "CONFIG/INVALID");
    }

    #[test]
    fn file_sink_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            filter: "larder=info".into(),
            format: LogFormat::Json,
            dir: Some(dir.path().to_path_buf()),
        };
        let guard = init(&config).unwrap();
        assert!(guard.is_some());
        // Second call leaves the first subscriber installed.
        let again = init(&LogConfig::default()).unwrap();
        assert!(again.is_none());
    }
}
