//! Log output for a migration run.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use stepwise_core::config::LoggingConfig;
use stepwise_core::error::{Result, StepwiseError};

/// Active logging for the current thread.
///
/// Events go to stdout and to the configured log file. `RUST_LOG` overrides
/// the configured level. Logging stays installed until the handle is dropped.
pub struct Logging {
    _guard: DefaultGuard,
}

impl Logging {
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file)
            .map_err(|e| {
                StepwiseError::Config(format!(
                    "Failed to open log file {}: {}",
                    config.file.display(),
                    e
                ))
            })?;

        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
                StepwiseError::Config(format!("Invalid log level '{}': {}", config.level, e))
            })?,
        };

        let writer = Mutex::new(file);
        let (stdout_json, stdout_text, file_json, file_text) = if config.json_format {
            (
                Some(fmt::layer().json()),
                None,
                Some(fmt::layer().json().with_ansi(false).with_writer(writer)),
                None,
            )
        } else {
            (
                None,
                Some(fmt::layer()),
                None,
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
            )
        };

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(stdout_json)
            .with(stdout_text)
            .with(file_json)
            .with(file_text);

        Ok(Self {
            _guard: tracing::subscriber::set_default(subscriber),
        })
    }
}
