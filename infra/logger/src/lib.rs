//! # Logger
//!
//! Installs the global `tracing` subscriber for rundial binaries: a console layer, an optional
//! rolling file layer written through a non-blocking worker, and an [`EnvFilter`] seeded from the
//! configured level. `RUST_LOG` is honoured unless an explicit filter is given.
//!
//! Settings come either from the fluent [`LoggerBuilder`] or from a deserialized
//! [`LoggingConfig`] (the `[logging]` table of a rundial config file).
//!
//! ## Example
//!
//! ```rust
//! # use rundial_logger::{Logger, LevelFilter};
//!
//! let _logger = Logger::builder()
//!     .name("rundial-probe")
//!     .level(LevelFilter::DEBUG)
//!     .env_filter("rundial=debug,h2=warn")
//!     .init()
//!     .unwrap();
//! ```

mod error;

pub use crate::error::LoggerError;
pub use tracing::level_filters::LevelFilter;
pub use tracing_appender::rolling::Rotation;

use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::fmt::layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const DEFAULT_NAME: &str = "rundial";
const DEFAULT_MAX_FILES: usize = 10;
const LOG_FILE_SUFFIX: &str = "log";

/// How console output is rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Rotation period of the log files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Self::MINUTELY,
            LogRotation::Hourly => Self::HOURLY,
            LogRotation::Daily => Self::DAILY,
            LogRotation::Never => Self::NEVER,
        }
    }
}

/// Serializable logger settings.
///
/// ```toml
/// [logging]
/// level = "debug"
/// filter = "rundial=trace,h2=warn"
/// format = "pretty"
/// directory = "/var/log/rundial"
/// rotation = "hourly"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub name: String,
    pub level: String,
    pub filter: Option<String>,
    pub console: bool,
    pub format: ConsoleFormat,
    /// Enables rolling file output into this directory.
    pub directory: Option<PathBuf>,
    pub rotation: LogRotation,
    pub max_files: usize,
    /// Write file output as JSON lines.
    pub json_files: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            level: "info".to_owned(),
            filter: None,
            console: true,
            format: ConsoleFormat::default(),
            directory: None,
            rotation: LogRotation::default(),
            max_files: DEFAULT_MAX_FILES,
            json_files: false,
        }
    }
}

/// A builder for configuring and initializing the global tracing subscriber.
#[must_use = "The builder must be configured before it can be used to initialize the logger."]
#[derive(Debug)]
pub struct LoggerBuilder {
    name: String,
    level: LevelFilter,
    env_filter: Option<String>,
    console: bool,
    format: ConsoleFormat,
    path: Option<PathBuf>,
    rotation: Rotation,
    max_files: usize,
    json: bool,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_owned(),
            level: LevelFilter::INFO,
            env_filter: None,
            console: true,
            format: ConsoleFormat::Compact,
            path: None,
            rotation: Rotation::DAILY,
            max_files: DEFAULT_MAX_FILES,
            json: false,
        }
    }
}

impl LoggerBuilder {
    /// Sets the name used as the log file prefix.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Configures the minimum log level to be emitted.
    pub const fn level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }

    /// Adds an explicit env filter (e.g., `rundial=debug,hyper=info`).
    ///
    /// Takes precedence over `RUST_LOG`. Invalid filters make [`LoggerBuilder::init`] fail.
    pub fn env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    pub const fn console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    pub const fn console_format(mut self, format: ConsoleFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables rolling file output into `path`.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn rotation(mut self, rotation: impl Into<Rotation>) -> Self {
        self.rotation = rotation.into();
        self
    }

    /// Configures the maximum number of log files to keep.
    pub const fn max_files(mut self, max: usize) -> Self {
        self.max_files = max;
        self
    }

    /// Writes file output as JSON lines.
    pub const fn json(mut self, enabled: bool) -> Self {
        self.json = enabled;
        self
    }

    /// Consumes the builder and installs the global subscriber.
    ///
    /// Keep the returned [`Logger`] alive until shutdown: it owns the worker that flushes
    /// file output.
    ///
    /// # Errors
    /// * [`LoggerError::InvalidConfiguration`] for an empty name, zero `max_files`, an invalid
    ///   filter, or when no output is enabled.
    /// * [`LoggerError::Io`] / [`LoggerError::Appender`] when the log directory is unusable.
    /// * [`LoggerError::Subscriber`] if a global subscriber is already set.
    pub fn init(self) -> Result<Logger, LoggerError> {
        self.validate()?;
        let env_filter = self.build_env_filter()?;

        let mut layers = Vec::new();

        if self.console {
            let console = layer().with_target(true);
            layers.push(match self.format {
                ConsoleFormat::Compact => console.compact().boxed(),
                ConsoleFormat::Pretty => console.pretty().boxed(),
                ConsoleFormat::Json => console.json().boxed(),
            });
        }

        let guard = if let Some(path) = self.path {
            fs::create_dir_all(&path).map_err(|source| LoggerError::Io {
                source,
                context: Some(format!("Creating {}", path.display()).into()),
            })?;

            let appender = RollingFileAppender::builder()
                .rotation(self.rotation)
                .filename_prefix(&self.name)
                .filename_suffix(LOG_FILE_SUFFIX)
                .max_log_files(self.max_files)
                .build(&path)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file = layer().with_writer(writer).with_ansi(false);
            layers.push(if self.json { file.json().boxed() } else { file.boxed() });
            Some(guard)
        } else {
            None
        };

        if layers.is_empty() {
            return Err(LoggerError::invalid("No output enabled. Enable console or file output."));
        }

        tracing_subscriber::registry().with(env_filter).with(layers).try_init()?;

        Ok(Logger { guard })
    }

    fn validate(&self) -> Result<(), LoggerError> {
        if self.name.trim().is_empty() {
            return Err(LoggerError::invalid("Logger name cannot be empty"));
        }
        if self.max_files == 0 {
            return Err(LoggerError::invalid("max_files must be greater than zero"));
        }
        Ok(())
    }

    fn build_env_filter(&self) -> Result<EnvFilter, LoggerError> {
        let builder = EnvFilter::builder().with_default_directive(self.level.into());
        self.env_filter.as_ref().map_or_else(
            || Ok(builder.from_env_lossy()),
            |filter| {
                builder.parse(filter).map_err(|e| LoggerError::InvalidConfiguration {
                    message: e.to_string().into(),
                    context: Some(format!("filter '{filter}'").into()),
                })
            },
        )
    }
}

/// A handle to the initialized logging system.
///
/// Holds the non-blocking worker guard; dropping it flushes pending file output.
#[must_use = "Dropping this handle stops the background log writer."]
#[derive(Debug)]
pub struct Logger {
    guard: Option<WorkerGuard>,
}

impl Logger {
    /// Returns a new [`LoggerBuilder`] with console output at `INFO`.
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    /// Builder preloaded from `config`.
    ///
    /// # Errors
    /// Returns [`LoggerError::InvalidConfiguration`] when `level` is not a valid level name.
    pub fn configured(config: &LoggingConfig) -> Result<LoggerBuilder, LoggerError> {
        let level = LevelFilter::from_str(&config.level).map_err(|e| {
            LoggerError::InvalidConfiguration {
                message: e.to_string().into(),
                context: Some(format!("level '{}'", config.level).into()),
            }
        })?;

        let mut builder = Self::builder()
            .name(config.name.as_str())
            .level(level)
            .console(config.console)
            .console_format(config.format)
            .rotation(config.rotation)
            .max_files(config.max_files)
            .json(config.json_files);
        if let Some(filter) = &config.filter {
            builder = builder.env_filter(filter.as_str());
        }
        if let Some(directory) = &config.directory {
            builder = builder.path(directory.as_path());
        }
        Ok(builder)
    }

    /// Installs the global subscriber described by `config`.
    ///
    /// # Errors
    /// See [`Logger::configured`] and [`LoggerBuilder::init`].
    pub fn from_config(config: &LoggingConfig) -> Result<Self, LoggerError> {
        Self::configured(config)?.init()
    }

    /// Returns the file worker guard, if file output is enabled.
    #[must_use]
    pub const fn guard(&self) -> Option<&WorkerGuard> {
        self.guard.as_ref()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        if self.guard.is_some() {
            tracing::debug!("Logger shutting down, flushing file output");
        }
    }
}
