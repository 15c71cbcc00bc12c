//! Spawn Strategies
//!
//! The executor tries an ordered list of [`ExecutionStrategy`] objects. The
//! first attempt that produces a [`ProcessOutput`] ends the ladder; only a
//! binary that was missing at spawn time lets the next strategy run.

use super::process::{Invocation, ProcessOutput, ProcessRunner, RunError};
use super::resolver::{verify_executable, BinaryCache};
use super::shell::{cd_and_exec, SHELL_INTERPRETER};
use super::timeout::ExecutionTimeout;
use super::ToolId;
use crate::error::AttemptFailure;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything a strategy needs to start one process
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub tool: ToolId,

    /// Resolved binary (absolute path, or the bare tool name)
    pub binary: PathBuf,

    /// Sanitized argument vector
    pub args: Vec<String>,

    pub working_dir: PathBuf,

    pub env: BTreeMap<String, String>,

    pub timeout: ExecutionTimeout,

    /// Per-stream output cap in bytes
    pub max_output: usize,

    /// Whether the tool may be started without a shell `cd`
    pub direct_allowed: bool,
}

impl AttemptContext {
    pub(crate) fn direct_invocation(&self) -> Invocation {
        Invocation {
            program: self.binary.clone(),
            args: self.args.clone(),
            current_dir: Some(self.working_dir.clone()),
            env: self.env.clone(),
            timeout: self.timeout,
            max_output: self.max_output,
        }
    }

    pub(crate) fn shell_invocation(&self, binary: &std::path::Path) -> Invocation {
        Invocation {
            program: PathBuf::from(SHELL_INTERPRETER),
            args: vec![
                "-c".to_string(),
                cd_and_exec(&self.working_dir, binary, &self.args),
            ],
            current_dir: None,
            env: self.env.clone(),
            timeout: self.timeout,
            max_output: self.max_output,
        }
    }
}

/// One rung of the spawn ladder
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Short name used in diagnostics
    fn name(&self) -> &'static str;

    /// Whether this strategy should run, given the failures so far
    fn applies(&self, ctx: &AttemptContext, previous: &[AttemptFailure]) -> bool;

    /// Start exactly one process
    async fn attempt(
        &self,
        ctx: &AttemptContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ProcessOutput, RunError>;
}

/// Run the binary with the argument vector, no shell involved
#[derive(Debug, Default)]
pub struct DirectStrategy;

#[async_trait]
impl ExecutionStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn applies(&self, ctx: &AttemptContext, _previous: &[AttemptFailure]) -> bool {
        ctx.direct_allowed
    }

    async fn attempt(
        &self,
        ctx: &AttemptContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ProcessOutput, RunError> {
        runner.run(&ctx.direct_invocation()).await
    }
}

/// `/bin/sh -c "cd -- <dir> || exit; <guard>; exec <binary> <args...>"`
#[derive(Debug, Default)]
pub struct ShellStrategy;

/// Run the shell form and translate the launch guard's exits
async fn run_through_shell(
    ctx: &AttemptContext,
    binary: &std::path::Path,
    runner: &dyn ProcessRunner,
) -> Result<ProcessOutput, RunError> {
    let output = runner.run(&ctx.shell_invocation(binary)).await?;
    if !output.success {
        if let Some(missing) = RunError::from_shell_output(&binary.display().to_string(), &output)
        {
            return Err(missing);
        }
    }
    Ok(output)
}

#[async_trait]
impl ExecutionStrategy for ShellStrategy {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn applies(&self, _ctx: &AttemptContext, _previous: &[AttemptFailure]) -> bool {
        true
    }

    async fn attempt(
        &self,
        ctx: &AttemptContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ProcessOutput, RunError> {
        run_through_shell(ctx, &ctx.binary, runner).await
    }
}

/// Drop the cached binary and go through the shell once more
///
/// When the path no longer verifies, the bare tool name is used so the
/// child's `PATH` gets a chance to find a reinstalled binary.
#[derive(Debug)]
pub struct EvictAndRetryStrategy {
    cache: Arc<BinaryCache>,
}

impl EvictAndRetryStrategy {
    pub fn new(cache: Arc<BinaryCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl ExecutionStrategy for EvictAndRetryStrategy {
    fn name(&self) -> &'static str {
        "evict-and-retry"
    }

    fn applies(&self, _ctx: &AttemptContext, previous: &[AttemptFailure]) -> bool {
        previous.last().is_some_and(|failure| failure.missing_binary)
    }

    async fn attempt(
        &self,
        ctx: &AttemptContext,
        runner: &dyn ProcessRunner,
    ) -> Result<ProcessOutput, RunError> {
        let still_valid = ctx.binary.is_absolute() && verify_executable(&ctx.binary).await;
        if let Some(evicted) = self.cache.evict(ctx.tool).await {
            warn!(tool = %ctx.tool, path = %evicted.display(), "Evicted binary after failed spawn");
        }

        let binary = if still_valid {
            ctx.binary.clone()
        } else {
            PathBuf::from(ctx.tool.binary_name())
        };
        debug!(tool = %ctx.tool, binary = %binary.display(), "Retrying through shell");
        run_through_shell(ctx, &binary, runner).await
    }
}

/// The standard ladder: direct, shell, evict-and-retry
pub fn default_strategies(cache: Arc<BinaryCache>) -> Vec<Box<dyn ExecutionStrategy>> {
    vec![
        Box::new(DirectStrategy),
        Box::new(ShellStrategy),
        Box::new(EvictAndRetryStrategy::new(cache)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::shell::LAUNCH_FAILURE_MARKER;
    use crate::tools::test_support::{ok_output, ScriptedRunner};

    fn context(direct_allowed: bool) -> AttemptContext {
        AttemptContext {
            tool: ToolId::Cast,
            binary: PathBuf::from("/opt/foundry/bin/cast"),
            args: vec!["sig".to_string(), "transfer(address,uint256)".to_string()],
            working_dir: PathBuf::from("/work/my project"),
            env: BTreeMap::new(),
            timeout: ExecutionTimeout::from_secs(5),
            max_output: 1024,
            direct_allowed,
        }
    }

    fn missing(strategy: &'static str) -> AttemptFailure {
        AttemptFailure {
            strategy,
            reason: "not found".to_string(),
            missing_binary: true,
        }
    }

    #[tokio::test]
    async fn test_direct_passes_argument_vector() {
        let runner = ScriptedRunner::new(vec![Ok(ok_output("0xa9059cbb\n"))]);
        let ctx = context(true);

        let output = DirectStrategy.attempt(&ctx, &runner).await.unwrap();
        assert_eq!(output.stdout, "0xa9059cbb\n");

        let calls = runner.invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, ctx.binary);
        assert_eq!(calls[0].args, ctx.args);
        assert_eq!(calls[0].current_dir, Some(ctx.working_dir.clone()));
    }

    #[test]
    fn test_direct_applicability() {
        assert!(DirectStrategy.applies(&context(true), &[]));
        assert!(!DirectStrategy.applies(&context(false), &[]));
        assert!(ShellStrategy.applies(&context(false), &[]));
    }

    #[tokio::test]
    async fn test_shell_quotes_every_part() {
        let runner = ScriptedRunner::new(vec![Ok(ok_output(""))]);
        ShellStrategy.attempt(&context(false), &runner).await.unwrap();

        let calls = runner.invocations();
        assert_eq!(calls[0].program, PathBuf::from(SHELL_INTERPRETER));
        assert_eq!(calls[0].args[0], "-c");
        assert!(calls[0].args[1].starts_with("cd -- '/work/my project' || exit; "));
        assert!(calls[0]
            .args[1]
            .ends_with("; exec /opt/foundry/bin/cast sig 'transfer(address,uint256)'"));
        assert_eq!(calls[0].current_dir, None);
    }

    #[tokio::test]
    async fn test_shell_exit_127_is_missing_binary() {
        let mut output = ok_output("");
        output.success = false;
        output.exit_code = Some(127);
        output.stderr = format!("{} /opt/foundry/bin/cast: not found\n", LAUNCH_FAILURE_MARKER);
        let runner = ScriptedRunner::new(vec![Ok(output)]);

        let err = ShellStrategy
            .attempt(&context(false), &runner)
            .await
            .unwrap_err();
        assert!(err.is_missing_binary());
    }

    #[tokio::test]
    async fn test_tool_exit_127_is_output() {
        let mut output = ok_output("");
        output.success = false;
        output.exit_code = Some(127);
        output.stderr = "Error: execution reverted\n".to_string();
        let runner = ScriptedRunner::new(vec![Ok(output)]);

        let output = ShellStrategy.attempt(&context(false), &runner).await.unwrap();
        assert_eq!(output.exit_code, Some(127));
    }

    #[tokio::test]
    async fn test_shell_ordinary_failure_is_output() {
        let mut output = ok_output("");
        output.success = false;
        output.exit_code = Some(1);
        let runner = ScriptedRunner::new(vec![Ok(output)]);

        let output = ShellStrategy.attempt(&context(false), &runner).await.unwrap();
        assert_eq!(output.exit_code, Some(1));
    }

    #[test]
    fn test_evict_applies_only_after_missing_binary() {
        let strategy = EvictAndRetryStrategy::new(Arc::new(BinaryCache::new()));
        let ctx = context(false);
        assert!(!strategy.applies(&ctx, &[]));
        assert!(strategy.applies(&ctx, &[missing("shell")]));

        let other = AttemptFailure {
            strategy: "shell",
            reason: "permission denied on working directory".to_string(),
            missing_binary: false,
        };
        assert!(!strategy.applies(&ctx, &[other]));
    }

    #[tokio::test]
    async fn test_evict_drops_cache_and_uses_bare_name() {
        let cache = Arc::new(BinaryCache::new());
        cache
            .insert(ToolId::Cast, PathBuf::from("/opt/foundry/bin/cast"))
            .await;
        let strategy = EvictAndRetryStrategy::new(cache.clone());
        let runner = ScriptedRunner::new(vec![Ok(ok_output("ok"))]);

        strategy.attempt(&context(false), &runner).await.unwrap();

        assert!(cache.get(ToolId::Cast).await.is_none());
        let calls = runner.invocations();
        assert!(calls[0].args[1].ends_with("; exec cast sig 'transfer(address,uint256)'"));
    }

    #[test]
    fn test_default_ladder_order() {
        let names: Vec<&str> = default_strategies(Arc::new(BinaryCache::new()))
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, vec!["direct", "shell", "evict-and-retry"]);
    }
}
