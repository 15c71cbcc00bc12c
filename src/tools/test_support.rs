//! Fixtures shared by the unit tests in this module tree.

use super::environment::EnvironmentBuilder;
use super::process::{Invocation, ProcessOutput, ProcessRunner, RunError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Write an executable script into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    make_executable(&path);
    path
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) {}

/// An environment whose search path is exactly `dirs`, with no toolchain
/// directory and no system directories, so host installs never leak in.
pub fn isolated_environment(dirs: &[&Path]) -> EnvironmentBuilder {
    let path = dirs
        .iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(":");

    let mut inherited = BTreeMap::new();
    inherited.insert("PATH".to_string(), path);
    inherited.insert("HOME".to_string(), "/nonexistent/toolgate-home".to_string());
    inherited.insert("USER".to_string(), "toolgate-test".to_string());

    EnvironmentBuilder::with_inherited(inherited)
        .toolchain_dir(None)
        .system_dirs(vec![])
}

/// A successful, empty-stderr [`ProcessOutput`]
pub fn ok_output(stdout: &str) -> ProcessOutput {
    ProcessOutput {
        exit_code: Some(0),
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// [`ProcessRunner`] double that records every invocation and replays
/// scripted results in order (an empty script yields successful output).
#[derive(Default)]
pub struct ScriptedRunner {
    script: Mutex<VecDeque<Result<ProcessOutput, RunError>>>,
    calls: Mutex<Vec<Invocation>>,
    detached: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    pub fn new(script: Vec<Result<ProcessOutput, RunError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.calls.lock().unwrap().len() + self.detached.lock().unwrap().len()
    }

    pub fn detached(&self) -> Vec<Invocation> {
        self.detached.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, RunError> {
        self.calls.lock().unwrap().push(invocation.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ok_output("")))
    }

    async fn spawn_detached(&self, invocation: &Invocation) -> Result<u32, RunError> {
        self.detached.lock().unwrap().push(invocation.clone());
        Ok(4242)
    }
}
