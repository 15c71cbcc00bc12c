//! Tool Executor
//!
//! The end-to-end pipeline for one gated invocation: allowlist check,
//! sanitization, working directory, binary resolution, environment, then the
//! spawn ladder. Any failure along the way is a single [`ToolError`].

use super::environment::EnvironmentBuilder;
use super::process::{ProcessRunner, RunError, TokioRunner};
use super::resolver::{verify_executable, BinaryCache, BinaryResolver, ResolvedBinary, ResolverConfig};
use super::strategy::{default_strategies, AttemptContext, ExecutionStrategy};
use super::timeout::ExecutionTimeout;
use super::validator::{sanitize_args_with, Allowlist, SanitizePolicy};
use super::workdir::WorkdirResolver;
use super::ToolId;
use crate::config::Config;
use crate::error::{AttemptFailure, Diagnostics, ToolError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Maximum output size per stream in bytes (10MB)
const MAX_OUTPUT_SIZE: usize = 10 * 1024 * 1024;

/// Enables verbose trace lines on the `toolgate::trace` target
pub const DEBUG_VAR: &str = "TOOLGATE_DEBUG";

/// Output of a successful invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Standard output
    pub stdout: String,

    /// Standard error
    pub stderr: String,
}

/// A process started by [`ToolExecutor::launch_detached`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetachedProcess {
    pub tool: ToolId,
    pub pid: u32,
    pub binary: PathBuf,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ExecutionOptions {
    /// Working directory (default: the discovered project root)
    pub working_directory: Option<PathBuf>,

    /// Timeout in milliseconds (default: the executor's timeout)
    pub timeout_ms: Option<u64>,

    /// Extra environment; `PATH` is appended, everything else replaces
    pub environment_overrides: HashMap<String, String>,

    /// Positions eligible for signature preservation (default: index >= 2)
    pub structural_args: Option<Vec<usize>>,
}

impl ExecutionOptions {
    pub fn in_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_structural_args(mut self, positions: Vec<usize>) -> Self {
        self.structural_args = Some(positions);
        self
    }

    fn sanitize_policy(&self) -> SanitizePolicy {
        match &self.structural_args {
            Some(positions) => SanitizePolicy::explicit(positions.iter().copied()),
            None => SanitizePolicy::Positional,
        }
    }
}

/// Configuration for tool execution
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Timeout for execution (default: 30 seconds)
    pub timeout: ExecutionTimeout,

    /// Maximum output size per stream in bytes (default: 10MB)
    pub max_output_size: usize,

    /// Emit per-step trace lines (default: false)
    pub debug: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: ExecutionTimeout::default(),
            max_output_size: MAX_OUTPUT_SIZE,
            debug: false,
        }
    }
}

impl ExecutorConfig {
    /// Defaults, with `debug` taken from `TOOLGATE_DEBUG`
    pub fn from_env() -> Self {
        Self {
            debug: debug_from_env(),
            ..Default::default()
        }
    }

    /// Create a new executor config with custom timeout
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        Self {
            timeout: ExecutionTimeout::from_millis(timeout_ms),
            ..Default::default()
        }
    }
}

/// Whether `TOOLGATE_DEBUG` is set to a truthy value
pub fn debug_from_env() -> bool {
    std::env::var(DEBUG_VAR)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

/// Gated executor for forge, cast and anvil
///
/// # Security
///
/// 1. The subcommand must be in the allowlist; nothing is spawned otherwise
/// 2. Arguments are sanitized before they reach any process
/// 3. Direct spawns never involve a shell; the shell fallback quotes every value
/// 4. Every run is bounded by a timeout and a per-stream output cap
#[derive(Clone)]
pub struct ToolExecutor {
    allowlist: Allowlist,
    resolver: BinaryResolver,
    environment: Arc<EnvironmentBuilder>,
    workdir: Arc<WorkdirResolver>,
    runner: Arc<dyn ProcessRunner>,
    strategies: Arc<Vec<Box<dyn ExecutionStrategy>>>,
    config: ExecutorConfig,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("allowlist", &self.allowlist)
            .field("resolver", &self.resolver)
            .field("workdir", &self.workdir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    /// Executor over the host environment with default settings
    pub fn new() -> Self {
        Self::builder().config(ExecutorConfig::from_env()).build()
    }

    pub fn builder() -> ToolExecutorBuilder {
        ToolExecutorBuilder::default()
    }

    /// Executor configured from a loaded [`Config`]
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut environment = EnvironmentBuilder::from_host();
        if let Some(dir) = &config.environment.toolchain_dir {
            environment = environment.toolchain_dir(Some(dir.clone()));
        }
        if let Some(dirs) = &config.environment.system_dirs {
            environment = environment.system_dirs(dirs.clone());
        }

        Ok(Self::builder()
            .config(ExecutorConfig {
                timeout: ExecutionTimeout::from_millis(config.executor.timeout_ms),
                max_output_size: config.executor.max_output_bytes,
                debug: config.executor.debug,
            })
            .with_allowlist(Allowlist::with_overrides(&config.allowlist_overrides()?))
            .with_environment(environment)
            .with_resolver_config(ResolverConfig {
                version_check_timeout: ExecutionTimeout::from_millis(
                    config.resolver.version_check_timeout_ms,
                ),
                candidate_dirs: config.resolver.candidate_dirs.clone(),
                allow_unresolved_fallback: config.resolver.allow_unresolved_fallback,
            })
            .build())
    }

    pub fn allowlist(&self) -> &Allowlist {
        &self.allowlist
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// The shared binary cache
    pub fn cache(&self) -> &Arc<BinaryCache> {
        self.resolver.cache()
    }

    /// Resolve `tool` without running it
    pub async fn resolve(&self, tool: ToolId) -> Result<ResolvedBinary, ToolError> {
        self.resolver.resolve(tool).await
    }

    /// Run `tool` with `raw_args` and wait for it
    ///
    /// # Errors
    ///
    /// - [`ToolError::InvalidArgument`]: empty argument list, or an argument empty
    ///   or too long after sanitization
    /// - [`ToolError::CommandNotAllowed`]: `raw_args[0]` is not allowlisted
    /// - [`ToolError::BinaryNotFound`]: no usable binary
    /// - [`ToolError::ExecutionTimeout`]: the process was killed at the deadline
    /// - [`ToolError::ExecutionFailed`]: non-zero exit, output over the cap, or
    ///   no strategy could start the process
    pub async fn execute(
        &self,
        tool: ToolId,
        raw_args: &[String],
        options: ExecutionOptions,
    ) -> Result<ExecutionResult, ToolError> {
        let (ctx, search_path) = self.prepare(tool, raw_args, &options).await?;
        info!(%tool, subcommand = %ctx.args[0], "Executing tool");
        self.run_ladder(ctx, &search_path).await
    }

    /// Start `tool` in the background and return its PID
    ///
    /// Goes through the same gate as [`execute`](Self::execute), but the child
    /// is not waited for, not timed out and not killed when the call returns.
    pub async fn launch_detached(
        &self,
        tool: ToolId,
        raw_args: &[String],
        options: ExecutionOptions,
    ) -> Result<DetachedProcess, ToolError> {
        let (ctx, search_path) = self.prepare(tool, raw_args, &options).await?;
        let invocation = if ctx.direct_allowed {
            ctx.direct_invocation()
        } else {
            ctx.shell_invocation(&ctx.binary)
        };

        match self.runner.spawn_detached(&invocation).await {
            Ok(pid) => {
                info!(%tool, pid, "Launched detached process");
                Ok(DetachedProcess {
                    tool,
                    pid,
                    binary: ctx.binary,
                })
            }
            Err(e) => {
                let mut diagnostics = Diagnostics::new().with_search_path(&search_path);
                diagnostics.attempted(&ctx.binary);
                diagnostics.os_error = e.os_error();
                diagnostics.note(e.to_string());
                Err(ToolError::ExecutionFailed { tool, diagnostics })
            }
        }
    }

    /// Validate, sanitize and resolve everything a spawn needs
    async fn prepare(
        &self,
        tool: ToolId,
        raw_args: &[String],
        options: &ExecutionOptions,
    ) -> Result<(AttemptContext, String), ToolError> {
        let subcommand = raw_args
            .first()
            .ok_or_else(|| ToolError::invalid_argument(0, "argument list is empty"))?;

        if !self.allowlist.validate_command(tool, subcommand) {
            warn!(%tool, subcommand = %subcommand, "Blocked command not in allowlist");
            return Err(ToolError::CommandNotAllowed {
                tool,
                subcommand: subcommand.clone(),
            });
        }

        let args = sanitize_args_with(raw_args, &options.sanitize_policy())?;
        self.trace(tool, format_args!("sanitized args: {:?}", args));

        let default_dir = self.workdir.default_dir().await;
        let working_dir = options
            .working_directory
            .clone()
            .unwrap_or_else(|| default_dir.clone());
        self.trace(tool, format_args!("working directory: {}", working_dir.display()));

        let env = self.environment.build(&options.environment_overrides);
        let search_path = env.search_path().to_string();
        self.trace(tool, format_args!("search path: {}", search_path));

        if !is_directory(&working_dir).await {
            let mut diagnostics = Diagnostics::new().with_search_path(&search_path);
            diagnostics.note(format!(
                "working directory {} does not exist",
                working_dir.display()
            ));
            return Err(ToolError::ExecutionFailed { tool, diagnostics });
        }

        let binary = self.binary_for_spawn(tool, &search_path).await?;
        self.trace(tool, format_args!("binary: {}", binary.display()));

        let direct_allowed = working_dir == default_dir && !tool.requires_directory_change();
        let timeout = options
            .timeout_ms
            .map(ExecutionTimeout::from_millis)
            .unwrap_or(self.config.timeout);

        let ctx = AttemptContext {
            tool,
            binary,
            args,
            working_dir,
            env: env.vars().clone(),
            timeout,
            max_output: self.config.max_output_size,
            direct_allowed,
        };
        Ok((ctx, search_path))
    }

    /// Resolve, then re-verify immediately before use
    async fn binary_for_spawn(&self, tool: ToolId, search_path: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolver.resolve(tool).await?;
        if !resolved.is_verified() || verify_executable(&resolved.path).await {
            return Ok(resolved.path);
        }

        warn!(%tool, path = %resolved.path.display(), "Resolved binary vanished before spawn");
        self.resolver.cache().evict(tool).await;

        let mut diagnostics = Diagnostics::new().with_search_path(search_path);
        diagnostics.attempted(&resolved.path);
        if let Some(fallback) = self.resolver.fallback_location(tool) {
            diagnostics.attempted(&fallback);
            if verify_executable(&fallback).await {
                debug!(%tool, path = %fallback.display(), "Using toolchain fallback location");
                return Ok(fallback);
            }
        }

        diagnostics.note("binary failed verification immediately before spawn");
        Err(ToolError::BinaryNotFound { tool, diagnostics })
    }

    async fn run_ladder(
        &self,
        ctx: AttemptContext,
        search_path: &str,
    ) -> Result<ExecutionResult, ToolError> {
        let tool = ctx.tool;
        let mut diagnostics = Diagnostics::new().with_search_path(search_path);
        let mut failures: Vec<AttemptFailure> = Vec::new();

        for strategy in self.strategies.iter() {
            if !strategy.applies(&ctx, &failures) {
                continue;
            }
            self.trace(tool, format_args!("attempting {} strategy", strategy.name()));
            diagnostics.attempted(&ctx.binary);

            match strategy.attempt(&ctx, self.runner.as_ref()).await {
                Ok(output) if output.success => {
                    info!(%tool, strategy = strategy.name(), "Tool execution succeeded");
                    return Ok(ExecutionResult {
                        stdout: output.stdout,
                        stderr: output.stderr,
                    });
                }
                Ok(output) => {
                    warn!(%tool, exit_code = ?output.exit_code, "Tool exited with failure");
                    diagnostics.exit_code = output.exit_code;
                    diagnostics.record_stderr(&output.stderr);
                    diagnostics.attempts = failures;
                    return Err(ToolError::ExecutionFailed { tool, diagnostics });
                }
                Err(RunError::TimedOut(timeout)) => {
                    warn!(%tool, timeout_ms = timeout.as_millis() as u64, "Tool execution timed out");
                    return Err(ToolError::ExecutionTimeout { tool, timeout });
                }
                Err(e) => {
                    let missing_binary = e.is_missing_binary();
                    if e.os_error().is_some() {
                        diagnostics.os_error = e.os_error();
                    }
                    if let RunError::MissingBinary { stderr, .. } = &e {
                        diagnostics.record_stderr(stderr);
                    }
                    warn!(%tool, strategy = strategy.name(), error = %e, "Strategy failed");
                    failures.push(AttemptFailure {
                        strategy: strategy.name(),
                        reason: e.to_string(),
                        missing_binary,
                    });
                    if !missing_binary {
                        break;
                    }
                }
            }
        }

        diagnostics.attempts = failures;
        Err(ToolError::ExecutionFailed { tool, diagnostics })
    }

    fn trace(&self, tool: ToolId, message: std::fmt::Arguments<'_>) {
        if self.config.debug {
            info!(target: "toolgate::trace", %tool, "{}", message);
        }
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// Assembles a [`ToolExecutor`]; every part defaults to the host setup
#[derive(Default)]
pub struct ToolExecutorBuilder {
    config: ExecutorConfig,
    allowlist: Option<Allowlist>,
    environment: Option<EnvironmentBuilder>,
    resolver_config: ResolverConfig,
    cache: Option<Arc<BinaryCache>>,
    runner: Option<Arc<dyn ProcessRunner>>,
    workdir: Option<WorkdirResolver>,
}

impl ToolExecutorBuilder {
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_allowlist(mut self, allowlist: Allowlist) -> Self {
        self.allowlist = Some(allowlist);
        self
    }

    pub fn with_environment(mut self, environment: EnvironmentBuilder) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn with_resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver_config = config;
        self
    }

    /// Share a binary cache between executors
    pub fn with_cache(mut self, cache: Arc<BinaryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_workdir(mut self, workdir: WorkdirResolver) -> Self {
        self.workdir = Some(workdir);
        self
    }

    pub fn build(self) -> ToolExecutor {
        let cache = self.cache.unwrap_or_default();
        let environment = Arc::new(self.environment.unwrap_or_else(EnvironmentBuilder::from_host));
        let runner: Arc<dyn ProcessRunner> =
            self.runner.unwrap_or_else(|| Arc::new(TokioRunner::new()));
        let resolver = BinaryResolver::new(
            cache.clone(),
            environment.clone(),
            runner.clone(),
            self.resolver_config,
        );

        ToolExecutor {
            allowlist: self.allowlist.unwrap_or_default(),
            resolver,
            environment,
            workdir: Arc::new(self.workdir.unwrap_or_else(WorkdirResolver::from_host)),
            runner,
            strategies: Arc::new(default_strategies(cache)),
            config: self.config,
        }
    }
}
