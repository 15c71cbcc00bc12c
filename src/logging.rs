//! Structured logging setup
//!
//! Everything is written to stderr so diagnostics never mix with tool output
//! on stdout. `RUST_LOG` directives are honored on top of the configured level.

use crate::config::LoggingConfig;
use anyhow::{Context, Result};
use std::str::FromStr;
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Output format of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Invalid log format: {}", other),
        }
    }
}

/// Effective level: `verbose` forces DEBUG
pub fn effective_level(config: &LoggingConfig, verbose: bool) -> Result<Level> {
    if verbose {
        return Ok(Level::DEBUG);
    }
    config
        .level
        .to_lowercase()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse log level '{}': {}", config.level, e))
}

/// Build a subscriber writing to `writer`
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    verbose: bool,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level = effective_level(config, verbose)?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match config.format.parse()? {
        LogFormat::Compact => Box::new(builder.compact().finish()),
        LogFormat::Pretty => Box::new(builder.pretty().finish()),
        LogFormat::Json => Box::new(builder.json().finish()),
    };
    Ok(subscriber)
}

/// Install the global subscriber, writing to stderr
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let subscriber = build_subscriber(config, verbose, std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tracing::{debug, info, warn};

    /// Writer that keeps everything in memory
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn config(level: &str, format: &str) -> LoggingConfig {
        LoggingConfig {
            level: level.to_string(),
            format: format.to_string(),
        }
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_verbose_forces_debug() {
        assert_eq!(effective_level(&config("warn", "compact"), true).unwrap(), Level::DEBUG);
        assert_eq!(effective_level(&config("warn", "compact"), false).unwrap(), Level::WARN);
        assert!(effective_level(&config("loud", "compact"), false).is_err());
    }

    #[test]
    fn test_level_filtering() {
        let captured = Captured::default();
        let subscriber = build_subscriber(&config("warn", "compact"), false, captured.clone()).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            info!("resolution step");
            warn!(tool = "forge", "binary evicted");
        });

        let output = captured.contents();
        assert!(output.contains("binary evicted"));
        assert!(!output.contains("resolution step"));
    }

    #[test]
    fn test_json_output_is_parseable() {
        let captured = Captured::default();
        let subscriber = build_subscriber(&config("debug", "json"), false, captured.clone()).unwrap();

        tracing::subscriber::with_default(subscriber, || {
            debug!(tool = "cast", "probing candidate");
        });

        let output = captured.contents();
        let line = output.lines().next().unwrap();
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["fields"]["message"], "probing candidate");
        assert_eq!(value["fields"]["tool"], "cast");
    }

    #[test]
    fn test_invalid_format_rejected() {
        assert!(build_subscriber(&config("info", "xml"), false, Captured::default()).is_err());
    }
}
