//! Binary Resolution
//!
//! Maps a [`ToolId`] to an executable path. Resolution is expensive (several
//! filesystem probes and possibly `--version` subprocesses), so results are
//! kept in a shared [`BinaryCache`]. A cached path is never returned without
//! checking it again first.
//!
//! Strategies, first success wins:
//!
//! 1. Cache hit, re-verified (evicted on failure)
//! 2. Search-path probe using the built environment's `PATH`
//! 3. Conventional install locations, each confirmed with `--version`
//! 4. The bare tool name, left to the child's `PATH` at spawn time

use super::environment::{EnvironmentBuilder, ExecutionEnvironment};
use super::process::{Invocation, ProcessRunner};
use super::timeout::ExecutionTimeout;
use super::ToolId;
use crate::error::{Diagnostics, ToolError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Output cap for `--version` probes
const VERSION_OUTPUT_LIMIT: usize = 64 * 1024;

/// Shared cache of verified binary paths
///
/// Access is serialized by a lock; process execution never holds it.
#[derive(Debug, Default)]
pub struct BinaryCache {
    entries: RwLock<HashMap<ToolId, PathBuf>>,
}

impl BinaryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, tool: ToolId) -> Option<PathBuf> {
        self.entries.read().await.get(&tool).cloned()
    }

    pub async fn insert(&self, tool: ToolId, path: PathBuf) {
        self.entries.write().await.insert(tool, path);
    }

    /// Remove and return the entry for `tool`
    pub async fn evict(&self, tool: ToolId) -> Option<PathBuf> {
        self.entries.write().await.remove(&tool)
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Which strategy produced a [`ResolvedBinary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    SearchPath,
    Candidate,
    /// Bare name, not verified and never cached
    Unresolved,
}

/// Outcome of binary resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBinary {
    /// Absolute path, or the bare tool name when unresolved
    pub path: PathBuf,

    /// How the path was found
    pub source: ResolutionSource,
}

impl ResolvedBinary {
    /// Whether the path was checked to be an executable file
    pub fn is_verified(&self) -> bool {
        self.source != ResolutionSource::Unresolved
    }
}

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Bound on each candidate's `--version` probe (default: 3 seconds)
    pub version_check_timeout: ExecutionTimeout,

    /// Replace the conventional install locations
    pub candidate_dirs: Option<Vec<PathBuf>>,

    /// Return the bare tool name when nothing else works (default: true)
    pub allow_unresolved_fallback: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            version_check_timeout: ExecutionTimeout::version_check(),
            candidate_dirs: None,
            allow_unresolved_fallback: true,
        }
    }
}

/// Check that `path` is a regular, executable file (symlinks followed)
pub async fn verify_executable(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.is_file() && has_exec_bit(&metadata),
        Err(_) => false,
    }
}

#[cfg(unix)]
fn has_exec_bit(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_metadata: &std::fs::Metadata) -> bool {
    true
}

/// Resolves tool identifiers to executable paths
#[derive(Clone)]
pub struct BinaryResolver {
    cache: Arc<BinaryCache>,
    environment: Arc<EnvironmentBuilder>,
    runner: Arc<dyn ProcessRunner>,
    config: ResolverConfig,
}

impl std::fmt::Debug for BinaryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryResolver")
            .field("cache", &self.cache)
            .field("environment", &self.environment)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BinaryResolver {
    pub fn new(
        cache: Arc<BinaryCache>,
        environment: Arc<EnvironmentBuilder>,
        runner: Arc<dyn ProcessRunner>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            cache,
            environment,
            runner,
            config,
        }
    }

    /// The shared cache
    pub fn cache(&self) -> &Arc<BinaryCache> {
        &self.cache
    }

    /// The documented last-resort location: `<toolchain dir>/<tool>`
    pub fn fallback_location(&self, tool: ToolId) -> Option<PathBuf> {
        self.environment
            .toolchain_bin()
            .map(|dir| dir.join(tool.binary_name()))
    }

    /// Resolve `tool` to an executable
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::BinaryNotFound`] only when every strategy failed
    /// and the unresolved fallback is disabled.
    pub async fn resolve(&self, tool: ToolId) -> Result<ResolvedBinary, ToolError> {
        let env = self.environment.build(&HashMap::new());
        let mut diagnostics = Diagnostics::new().with_search_path(env.search_path());

        if let Some(cached) = self.cache.get(tool).await {
            diagnostics.attempted(&cached);
            if verify_executable(&cached).await {
                debug!(%tool, path = %cached.display(), "Binary cache hit");
                return Ok(ResolvedBinary {
                    path: cached,
                    source: ResolutionSource::Cache,
                });
            }
            warn!(%tool, path = %cached.display(), "Cached binary failed verification, evicting");
            self.cache.evict(tool).await;
        }

        match self.probe_search_path(tool, &env).await {
            Some(found) => {
                diagnostics.attempted(&found);
                if verify_executable(&found).await {
                    info!(%tool, path = %found.display(), "Resolved binary on search path");
                    self.cache.insert(tool, found.clone()).await;
                    return Ok(ResolvedBinary {
                        path: found,
                        source: ResolutionSource::SearchPath,
                    });
                }
                diagnostics.note(format!("{} on search path is not executable", found.display()));
            }
            None => diagnostics.note(format!("{} not found on search path", tool.binary_name())),
        }

        for dir in self.candidate_dirs() {
            let candidate = dir.join(tool.binary_name());
            diagnostics.attempted(&candidate);
            if !verify_executable(&candidate).await {
                continue;
            }
            if self.version_check(&candidate, &env).await {
                info!(%tool, path = %candidate.display(), "Resolved binary from install location");
                self.cache.insert(tool, candidate.clone()).await;
                return Ok(ResolvedBinary {
                    path: candidate,
                    source: ResolutionSource::Candidate,
                });
            }
            debug!(%tool, path = %candidate.display(), "Candidate failed version check");
        }

        if self.config.allow_unresolved_fallback {
            warn!(%tool, "Binary not resolved, deferring to search path at spawn time");
            return Ok(ResolvedBinary {
                path: PathBuf::from(tool.binary_name()),
                source: ResolutionSource::Unresolved,
            });
        }

        diagnostics.note("all resolution strategies exhausted");
        Err(ToolError::BinaryNotFound { tool, diagnostics })
    }

    async fn probe_search_path(&self, tool: ToolId, env: &ExecutionEnvironment) -> Option<PathBuf> {
        let name = tool.binary_name();
        let search_path = env.search_path().to_string();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));

        tokio::task::spawn_blocking(move || which::which_in(name, Some(search_path), cwd).ok())
            .await
            .ok()
            .flatten()
    }

    async fn version_check(&self, candidate: &Path, env: &ExecutionEnvironment) -> bool {
        let invocation = Invocation {
            program: candidate.to_path_buf(),
            args: vec!["--version".to_string()],
            current_dir: None,
            env: env.vars().clone(),
            timeout: self.config.version_check_timeout,
            max_output: VERSION_OUTPUT_LIMIT,
        };
        match self.runner.run(&invocation).await {
            Ok(output) => output.success,
            Err(e) => {
                debug!(path = %candidate.display(), error = %e, "Version check failed");
                false
            }
        }
    }

    /// Conventional install locations, in probe order
    pub fn candidate_dirs(&self) -> Vec<PathBuf> {
        if let Some(dirs) = &self.config.candidate_dirs {
            return dirs.clone();
        }

        let home = self.environment.home();
        let mut dirs: Vec<PathBuf> = Vec::new();
        if let Some(toolchain) = self.environment.toolchain_bin() {
            dirs.push(toolchain.to_path_buf());
        }
        if let Some(home) = home {
            dirs.push(home.join(".local/bin"));
        }
        if let Some(user) = self.environment.user() {
            dirs.push(PathBuf::from("/home").join(user).join(".foundry/bin"));
            dirs.push(PathBuf::from("/Users").join(user).join(".foundry/bin"));
        }
        dirs.extend(
            ["/root/.foundry/bin", "/usr/local/bin", "/opt/homebrew/bin", "/usr/bin"]
                .iter()
                .map(PathBuf::from),
        );
        if let Some(home) = home {
            dirs.push(home.join(".cargo/bin"));
        }

        let mut unique = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if !unique.contains(&dir) {
                unique.push(dir);
            }
        }
        unique
    }
}
