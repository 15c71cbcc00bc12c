//! Default working directory discovery.

use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tracing::debug;

/// File whose presence marks the project root (contents are never read)
pub const PROJECT_MARKER: &str = "foundry.toml";

/// Explicit project root, skipping discovery
pub const ROOT_DIR_VAR: &str = "TOOLGATE_ROOT_DIR";

/// Finds the project root by walking upward until [`PROJECT_MARKER`] exists.
///
/// The result is computed once and reused for the resolver's lifetime.
#[derive(Debug, Default)]
pub struct WorkdirResolver {
    start: Option<PathBuf>,
    root_override: Option<PathBuf>,
    discovered: OnceCell<PathBuf>,
}

impl WorkdirResolver {
    /// Start from the process working directory, honoring `TOOLGATE_ROOT_DIR`
    pub fn from_host() -> Self {
        Self {
            start: None,
            root_override: std::env::var_os(ROOT_DIR_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            discovered: OnceCell::new(),
        }
    }

    /// Start the upward walk from `dir`
    pub fn starting_at(dir: impl Into<PathBuf>) -> Self {
        Self {
            start: Some(dir.into()),
            ..Default::default()
        }
    }

    /// Use `root` as the default directory without discovery
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root_override: Some(root.into()),
            ..Default::default()
        }
    }

    /// The default working directory
    pub async fn default_dir(&self) -> PathBuf {
        self.discovered
            .get_or_init(|| self.discover())
            .await
            .clone()
    }

    async fn discover(&self) -> PathBuf {
        if let Some(root) = &self.root_override {
            debug!(root = %root.display(), "Using explicit project root");
            return root.clone();
        }

        let start = match &self.start {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        };

        match find_marker(&start).await {
            Some(root) => {
                debug!(root = %root.display(), "Discovered project root");
                root
            }
            None => {
                debug!(start = %start.display(), "No {} found, using start directory", PROJECT_MARKER);
                start
            }
        }
    }
}

async fn find_marker(start: &Path) -> Option<PathBuf> {
    for dir in start.ancestors() {
        if tokio::fs::try_exists(dir.join(PROJECT_MARKER))
            .await
            .unwrap_or(false)
        {
            return Some(dir.to_path_buf());
        }
    }
    None
}
