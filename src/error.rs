//! Tool Gate Error Types
//!
//! Every failure surfaced by [`crate::tools::ToolExecutor`] is exactly one
//! [`ToolError`] variant. Diagnostic context gathered along the way travels
//! with the error in [`Diagnostics`].

use crate::tools::ToolId;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of characters of the search path kept in diagnostics
const SEARCH_PATH_EXCERPT: usize = 200;

/// Maximum number of characters of child stderr kept in diagnostics
const STDERR_EXCERPT: usize = 500;

/// Error types for gated tool execution
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Subcommand is absent from the allowlist for this tool
    #[error("Command '{subcommand}' is not allowed for {tool}")]
    CommandNotAllowed { tool: ToolId, subcommand: String },

    /// An argument was empty or too long after sanitization
    #[error("Invalid argument at position {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    /// Every resolution strategy was exhausted
    #[error("{tool} binary not found: {diagnostics}")]
    BinaryNotFound {
        tool: ToolId,
        diagnostics: Diagnostics,
    },

    /// The spawned process exceeded its time bound and was killed
    #[error("{tool} timed out after {}ms", timeout.as_millis())]
    ExecutionTimeout { tool: ToolId, timeout: Duration },

    /// The process failed, or could not be started by any strategy
    #[error("{tool} execution failed: {diagnostics}")]
    ExecutionFailed {
        tool: ToolId,
        diagnostics: Diagnostics,
    },
}

impl ToolError {
    /// Short, stable name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::CommandNotAllowed { .. } => "CommandNotAllowed",
            ToolError::InvalidArgument { .. } => "InvalidArgument",
            ToolError::BinaryNotFound { .. } => "BinaryNotFound",
            ToolError::ExecutionTimeout { .. } => "ExecutionTimeout",
            ToolError::ExecutionFailed { .. } => "ExecutionFailed",
        }
    }

    /// Diagnostics attached to the error, if any
    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            ToolError::BinaryNotFound { diagnostics, .. }
            | ToolError::ExecutionFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    pub(crate) fn invalid_argument(index: usize, reason: impl Into<String>) -> Self {
        ToolError::InvalidArgument {
            index,
            reason: reason.into(),
        }
    }
}

/// One failed strategy attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptFailure {
    /// Name of the strategy that failed
    pub strategy: &'static str,

    /// Human-readable failure reason
    pub reason: String,

    /// Whether the failure was a missing (or non-executable) binary at spawn time
    pub missing_binary: bool,
}

/// Diagnostic context accumulated while resolving and running a tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    /// Binary paths that were tried
    pub attempted_paths: Vec<PathBuf>,

    /// Effective search path (truncated)
    pub search_path: Option<String>,

    /// Underlying OS error code
    pub os_error: Option<i32>,

    /// Exit code of the child, if it ran
    pub exit_code: Option<i32>,

    /// Leading excerpt of the child's stderr
    pub stderr: Option<String>,

    /// Failure reason of every strategy attempt, in order
    pub attempts: Vec<AttemptFailure>,

    /// Free-form notes
    pub notes: Vec<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(mut self, search_path: &str) -> Self {
        self.search_path = Some(truncate_chars(search_path, SEARCH_PATH_EXCERPT));
        self
    }

    pub fn attempted(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.attempted_paths.contains(&path) {
            self.attempted_paths.push(path);
        }
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn record_stderr(&mut self, stderr: &str) {
        let trimmed = stderr.trim();
        if !trimmed.is_empty() {
            self.stderr = Some(truncate_chars(trimmed, STDERR_EXCERPT));
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();

        for attempt in &self.attempts {
            parts.push(format!("[{}] {}", attempt.strategy, attempt.reason));
        }
        if let Some(code) = self.exit_code {
            parts.push(format!("exit code {}", code));
        }
        if let Some(stderr) = &self.stderr {
            parts.push(format!("stderr: {}", stderr));
        }
        if !self.attempted_paths.is_empty() {
            let paths: Vec<String> = self
                .attempted_paths
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            parts.push(format!("attempted paths: {}", paths.join(", ")));
        }
        if let Some(search_path) = &self.search_path {
            parts.push(format!("PATH: {}", search_path));
        }
        if let Some(code) = self.os_error {
            parts.push(format!("os error {}", code));
        }
        parts.extend(self.notes.iter().cloned());

        if parts.is_empty() {
            write!(f, "no further detail")
        } else {
            write!(f, "{}", parts.join("; "))
        }
    }
}

/// Truncate to at most `max` characters, marking the cut with an ellipsis
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(3)).collect();
    out.push_str("...");
    out
}
