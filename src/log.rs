//! Logging setup: a reloadable `tracing_subscriber::EnvFilter` plus a single
//! stdout format layer chosen by `log.format`.

use std::fmt;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::Layer as FmtLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload::Handle;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::{LogColor, LogFormat, LogLevel, LogSource, LoggingConfig};

/// The state of the exporter's logger.
pub struct Logger {
    filter: Handle<EnvFilter, Registry>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("filter", &self.filter).finish()
    }
}

impl Logger {
    /// Launches the global logger.
    ///
    /// ## Panics
    ///
    /// Panics if a global [`tracing`] subscriber has already been set.
    pub fn launch(config: &LoggingConfig) -> Result<&'static Logger, String> {
        let filter = make_env_filter(config);
        let (filter, filter_handle) = reload::Layer::new(filter);

        let ansi = resolve_color(config.color);
        let with_file = matches!(config.source, LogSource::File | LogSource::Full);
        let with_line_number = matches!(config.source, LogSource::Short | LogSource::File | LogSource::Full);

        match config.format {
            LogFormat::Logfmt => {
                let layer = FmtLayer::new()
                    .compact()
                    .with_ansi(ansi)
                    .with_file(with_file)
                    .with_line_number(with_line_number)
                    .with_target(matches!(config.source, LogSource::Full))
                    .with_writer(std::io::stdout);
                if config.time {
                    tracing_subscriber::registry().with(filter).with(layer).init();
                } else {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(layer.without_time())
                        .init();
                }
            }
            LogFormat::Json => {
                let layer = FmtLayer::new()
                    .json()
                    .with_ansi(ansi)
                    .with_file(with_file)
                    .with_line_number(with_line_number)
                    .with_target(matches!(config.source, LogSource::Full))
                    .with_writer(std::io::stdout);
                if config.time {
                    tracing_subscriber::registry().with(filter).with(layer).init();
                } else {
                    tracing_subscriber::registry()
                        .with(filter)
                        .with(layer.without_time())
                        .init();
                }
            }
        }

        Ok(Box::leak(Box::new(Self {
            filter: filter_handle,
        })))
    }

    pub fn apply(&self, config: &LoggingConfig) -> Result<(), String> {
        self.filter
            .reload(make_env_filter(config))
            .map_err(|_| "could not reload filter".to_string())
    }
}

fn make_env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::default().add_directive(LevelFilter::from(config.level).into())
}

fn resolve_color(color: LogColor) -> bool {
    match color {
        LogColor::Yes => true,
        LogColor::No => false,
        LogColor::Auto | LogColor::Unset => {
            supports_color::on(supports_color::Stream::Stdout).is_some()
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}
