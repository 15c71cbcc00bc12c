//! Tool Execution Subsystem
//!
//! This module mediates every invocation of the Foundry toolchain (`forge`,
//! `cast`, `anvil`). It is the only place where caller input crosses a
//! process-execution boundary.
//!
//! # Security Features
//!
//! - **Subcommand Allowlist**: only known (tool, subcommand) pairs ever run
//! - **Argument Sanitization**: shell metacharacters are stripped before spawn
//! - **Verified Binaries**: cached paths are re-checked immediately before use
//! - **Timeout Enforcement**: every execution is bounded (default 30s)
//! - **Output Limits**: stdout/stderr are capped at 10MB each
//!
//! # Architecture
//!
//! - `validator.rs`: allowlist table and argument sanitizer (pure, no I/O)
//! - `environment.rs`: child process environment construction
//! - `resolver.rs`: binary resolution with a shared, re-verified cache
//! - `workdir.rs`: default working directory discovery
//! - `shell.rs`: the single shell-quoting chokepoint
//! - `process.rs`: process spawning with output caps
//! - `strategy.rs`: the direct / shell / evict-and-retry spawn ladder
//! - `timeout.rs`: timeout configuration and enforcement
//! - `executor.rs`: the end-to-end pipeline
//!
//! # Example
//!
//! ```no_run
//! use toolgate::tools::{ExecutionOptions, ToolExecutor, ToolId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = ToolExecutor::new();
//!
//!     let args = vec!["build".to_string(), "--force".to_string()];
//!     let output = executor
//!         .execute(ToolId::Forge, &args, ExecutionOptions::default())
//!         .await?;
//!     println!("Stdout: {}", output.stdout);
//!
//!     Ok(())
//! }
//! ```

mod environment;
mod executor;
mod process;
mod resolver;
pub mod shell;
mod strategy;
#[cfg(test)]
mod test_support;
mod timeout;
mod validator;
mod workdir;

pub use environment::{EnvironmentBuilder, ExecutionEnvironment};
pub use executor::{
    debug_from_env, DetachedProcess, ExecutionOptions, ExecutionResult, ExecutorConfig,
    ToolExecutor, ToolExecutorBuilder, DEBUG_VAR,
};
pub use process::{Invocation, ProcessOutput, ProcessRunner, RunError, TokioRunner};
pub use resolver::{
    verify_executable, BinaryCache, BinaryResolver, ResolutionSource, ResolvedBinary,
    ResolverConfig,
};
pub use strategy::{
    default_strategies, AttemptContext, DirectStrategy, EvictAndRetryStrategy, ExecutionStrategy,
    ShellStrategy,
};
pub use timeout::ExecutionTimeout;
pub use validator::{
    sanitize_args, sanitize_args_with, Allowlist, SanitizePolicy, MAX_ARGUMENT_LENGTH,
};
pub use workdir::{WorkdirResolver, PROJECT_MARKER, ROOT_DIR_VAR};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of executables this layer may invoke
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ToolId {
    /// Build, test and deploy contracts
    Forge,
    /// Chain interaction and encoding utilities
    Cast,
    /// Local development node
    Anvil,
}

impl ToolId {
    /// All tool identifiers, in a stable order
    pub const ALL: [ToolId; 3] = [ToolId::Forge, ToolId::Cast, ToolId::Anvil];

    /// Executable file name of the tool
    pub fn binary_name(&self) -> &'static str {
        match self {
            ToolId::Forge => "forge",
            ToolId::Cast => "cast",
            ToolId::Anvil => "anvil",
        }
    }

    /// Whether the tool must be started through an explicit `cd`
    ///
    /// forge resolves remappings and `foundry.toml` against `PWD`, which is only
    /// kept in sync by a shell changing directory.
    pub fn requires_directory_change(&self) -> bool {
        matches!(self, ToolId::Forge)
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary_name())
    }
}

impl FromStr for ToolId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolId::ALL
            .into_iter()
            .find(|tool| tool.binary_name() == s)
            .ok_or_else(|| format!("unknown tool '{}'", s))
    }
}
