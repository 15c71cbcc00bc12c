//! Child Process Environment
//!
//! Builds the variable set a tool runs under. The search path is rebuilt on
//! every call so the toolchain directory and standard binary directories are
//! always reachable, even when the host process inherited a stripped `PATH`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Overrides the detected home directory
pub const HOME_OVERRIDE_VAR: &str = "TOOLGATE_HOME";

/// Overrides the detected user name
pub const USER_OVERRIDE_VAR: &str = "TOOLGATE_USER";

/// Toolchain install directory, relative to the home directory
pub const TOOLCHAIN_BIN_DIR: &str = ".foundry/bin";

const PATH_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// Used only when every other source of search-path entries is empty
const FALLBACK_SEARCH_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Standard OS binary directories, in priority order
pub const DEFAULT_SYSTEM_DIRS: &[&str] = &[
    "/usr/local/bin",
    "/opt/homebrew/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
];

/// Environment a child process runs under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    vars: BTreeMap<String, String>,
}

impl ExecutionEnvironment {
    /// The effective search path (never empty)
    pub fn search_path(&self) -> &str {
        self.vars
            .get("PATH")
            .map(String::as_str)
            .unwrap_or(FALLBACK_SEARCH_PATH)
    }

    /// The search path split into directories
    pub fn search_dirs(&self) -> Vec<PathBuf> {
        self.search_path()
            .split(PATH_SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    /// Look up a single variable
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// All variables, sorted by name
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

/// Constructs [`ExecutionEnvironment`]s from a snapshot of the host environment
#[derive(Debug, Clone)]
pub struct EnvironmentBuilder {
    inherited: BTreeMap<String, String>,
    toolchain_dir: Option<PathBuf>,
    system_dirs: Vec<PathBuf>,
    host_home: Option<PathBuf>,
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::from_host()
    }
}

impl EnvironmentBuilder {
    /// Snapshot the current process environment
    pub fn from_host() -> Self {
        let host_home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());
        let mut builder = Self::with_inherited(std::env::vars().collect());
        if builder.host_home.is_none() {
            builder.host_home = host_home;
            builder.toolchain_dir = builder.host_home.as_ref().map(|h| h.join(TOOLCHAIN_BIN_DIR));
        }
        builder
    }

    /// Build from an explicit set of inherited variables
    pub fn with_inherited(inherited: BTreeMap<String, String>) -> Self {
        let host_home = inherited
            .get(HOME_OVERRIDE_VAR)
            .or_else(|| inherited.get("HOME"))
            .filter(|h| !h.is_empty())
            .map(PathBuf::from);
        let toolchain_dir = host_home.as_ref().map(|h| h.join(TOOLCHAIN_BIN_DIR));

        Self {
            inherited,
            toolchain_dir,
            system_dirs: DEFAULT_SYSTEM_DIRS.iter().map(PathBuf::from).collect(),
            host_home,
        }
    }

    /// Replace the toolchain install directory
    pub fn toolchain_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.toolchain_dir = dir;
        self
    }

    /// Replace the standard OS binary directories
    pub fn system_dirs(mut self, dirs: Vec<PathBuf>) -> Self {
        self.system_dirs = dirs;
        self
    }

    /// The toolchain install directory, if a home directory is known
    pub fn toolchain_bin(&self) -> Option<&Path> {
        self.toolchain_dir.as_deref()
    }

    /// Home directory: override, then inherited `HOME`, then the OS lookup
    pub fn home(&self) -> Option<&Path> {
        self.host_home.as_deref()
    }

    /// User name: override, then inherited `USER`, then `LOGNAME`
    pub fn user(&self) -> Option<&str> {
        [USER_OVERRIDE_VAR, "USER", "LOGNAME"]
            .iter()
            .filter_map(|key| self.inherited.get(*key))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    /// Inherited value of a variable
    pub fn inherited(&self, key: &str) -> Option<&str> {
        self.inherited.get(key).map(String::as_str)
    }

    /// Build the environment for one call
    ///
    /// A `PATH` in `overrides` is appended after the constructed search path;
    /// every other override replaces the inherited value verbatim.
    pub fn build(&self, overrides: &HashMap<String, String>) -> ExecutionEnvironment {
        let mut vars = self.inherited.clone();

        let mut segments: Vec<String> = Vec::new();
        if let Some(dir) = &self.toolchain_dir {
            segments.push(dir.display().to_string());
        }
        segments.extend(self.system_dirs.iter().map(|d| d.display().to_string()));
        if let Some(inherited_path) = self.inherited.get("PATH") {
            segments.extend(split_search_path(inherited_path));
        }
        if let Some(extra) = overrides.get("PATH") {
            segments.extend(split_search_path(extra));
        }
        vars.insert("PATH".to_string(), join_search_path(segments));

        if let Some(home) = self.home() {
            vars.insert("HOME".to_string(), home.display().to_string());
        }
        if let Some(user) = self.user() {
            vars.insert("USER".to_string(), user.to_string());
        }

        for (key, value) in overrides {
            if key != "PATH" {
                vars.insert(key.clone(), value.clone());
            }
        }

        ExecutionEnvironment { vars }
    }
}

fn split_search_path(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Join entries, dropping empty segments and repeated directories
fn join_search_path(segments: Vec<String>) -> String {
    let mut seen: Vec<String> = Vec::new();
    for segment in segments {
        if !segment.is_empty() && !seen.contains(&segment) {
            seen.push(segment);
        }
    }
    if seen.is_empty() {
        return FALLBACK_SEARCH_PATH.to_string();
    }
    seen.join(PATH_SEPARATOR.to_string().as_str())
}
