//! Logging setup for `stellar-archivist`.
//!
//! Output goes to stderr so command output on stdout stays parseable. `RUST_LOG`
//! takes precedence over the configured level when set.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose per-request logging drowns out ours.
const NOISY_TARGETS: &[&str] = &["hyper", "reqwest", "h2", "opendal"];

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable text with optional ANSI colors.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("Invalid log format: {}", s)),
        }
    }
}

/// Logging configuration options.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: Level,
    pub format: LogFormat,
    /// Text format only.
    pub ansi_colors: bool,
    pub with_source_location: bool,
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Text,
            ansi_colors: true,
            with_source_location: false,
            with_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Set the log level from a string. Unknown levels fall back to INFO.
    pub fn with_level(mut self, level: &str) -> Self {
        self.level = match level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" | "warning" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        if format == LogFormat::Json {
            self.ansi_colors = false;
        }
        self
    }
}

/// Filter at `level`, with noisy dependencies held at `warn`.
pub fn default_filter(level: Level) -> anyhow::Result<EnvFilter> {
    let mut filter = EnvFilter::new(level.as_str().to_lowercase());
    for target in NOISY_TARGETS {
        filter = filter.add_directive(format!("{target}=warn").parse()?);
    }
    Ok(filter)
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => default_filter(config.level)?,
    };

    match config.format {
        LogFormat::Text => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.ansi_colors)
                .with_target(true)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_thread_ids(config.with_thread_ids)
                .with_file(config.with_source_location)
                .with_line_number(config.with_source_location);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .try_init()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_level() {
        assert_eq!(LogConfig::default().with_level("DEBUG").level, Level::DEBUG);
        assert_eq!(LogConfig::default().with_level("warning").level, Level::WARN);
        assert_eq!(LogConfig::default().with_level("loud").level, Level::INFO);
    }

    #[test]
    fn test_json_disables_colors() {
        let config = LogConfig::default().with_format(LogFormat::Json);
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.ansi_colors);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_filter_quiets_dependencies() {
        let filter = default_filter(Level::DEBUG).unwrap().to_string();
        assert!(filter.contains("debug"));
        for target in NOISY_TARGETS {
            assert!(filter.contains(&format!("{target}=warn")));
        }
    }
}
