// Configuration File Support
//
// TOML configuration for the toolgate binary and library, with environment
// variable overrides. Loaded from the XDG config directory:
// ~/.config/toolgate/config.toml

use crate::tools::ToolId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest accepted execution timeout
const MIN_TIMEOUT_MS: u64 = 100;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Process execution limits
    pub executor: ExecutorSection,

    /// Binary resolution
    pub resolver: ResolverSection,

    /// Child process environment
    pub environment: EnvironmentSection,

    /// Per-tool subcommand lists; a listed tool's defaults are replaced
    pub allowlist: BTreeMap<String, Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorSection {
    /// Default timeout per invocation in milliseconds
    pub timeout_ms: u64,

    /// Output cap per stream in bytes
    pub max_output_bytes: usize,

    /// Per-step trace lines
    pub debug: bool,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_output_bytes: 10 * 1024 * 1024,
            debug: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResolverSection {
    /// Timeout of each `--version` probe in milliseconds
    pub version_check_timeout_ms: u64,

    /// Replaces the built-in install locations when set
    pub candidate_dirs: Option<Vec<PathBuf>>,

    /// Fall back to the bare tool name instead of failing
    pub allow_unresolved_fallback: bool,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            version_check_timeout_ms: 3_000,
            candidate_dirs: None,
            allow_unresolved_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentSection {
    /// Toolchain install directory (default: ~/.foundry/bin)
    pub toolchain_dir: Option<PathBuf>,

    /// Standard binary directories placed after the toolchain directory
    pub system_dirs: Option<Vec<PathBuf>>,
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields defaults. Environment overrides are applied
    /// either way, then the result is validated.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/toolgate/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "toolgate", "Toolgate") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("toolgate")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - TOOLGATE_LOG_LEVEL
    /// - TOOLGATE_LOG_FORMAT
    /// - TOOLGATE_TIMEOUT_MS
    /// - TOOLGATE_DEBUG
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_with(|key| std::env::var(key).ok())
    }

    fn apply_overrides_with<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TOOLGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TOOLGATE_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(timeout) = lookup("TOOLGATE_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.trim().parse::<u64>() {
                if timeout >= MIN_TIMEOUT_MS {
                    self.executor.timeout_ms = timeout;
                }
            }
        }
        if let Some(debug) = lookup(crate::tools::DEBUG_VAR) {
            self.executor.debug = matches!(
                debug.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.executor.timeout_ms < MIN_TIMEOUT_MS {
            anyhow::bail!("Executor timeout must be at least {} ms", MIN_TIMEOUT_MS);
        }
        if self.executor.max_output_bytes == 0 {
            anyhow::bail!("Executor output limit must be > 0");
        }
        if self.resolver.version_check_timeout_ms == 0 {
            anyhow::bail!("Version check timeout must be > 0");
        }

        for (tool, subcommands) in &self.allowlist {
            tool.parse::<ToolId>()
                .map_err(|e| anyhow::anyhow!("Invalid allowlist entry: {}", e))?;
            if subcommands.iter().any(|s| s.trim().is_empty()) {
                anyhow::bail!("Allowlist for '{}' contains an empty subcommand", tool);
            }
        }

        Ok(())
    }

    /// Allowlist overrides keyed by tool
    pub fn allowlist_overrides(&self) -> Result<HashMap<ToolId, Vec<String>>> {
        self.allowlist
            .iter()
            .map(|(tool, subcommands)| {
                let tool = tool
                    .parse::<ToolId>()
                    .map_err(|e| anyhow::anyhow!("Invalid allowlist entry: {}", e))?;
                Ok((tool, subcommands.clone()))
            })
            .collect()
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
