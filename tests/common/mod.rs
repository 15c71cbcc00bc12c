//! Fixtures shared by the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

/// A stand-in toolchain: fake `forge`, `cast` and `anvil` scripts in a bin
/// directory, plus a project directory containing `foundry.toml`.
pub struct FakeToolchain {
    pub bin: tempfile::TempDir,
    pub project: tempfile::TempDir,
}

impl FakeToolchain {
    pub fn new() -> Self {
        let bin = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        fs::write(project.path().join("foundry.toml"), "[profile.default]\n").unwrap();

        for name in ["forge", "cast", "anvil"] {
            write_script(
                bin.path(),
                name,
                &format!(
                    "#!/bin/sh\nif [ \"$1\" = \"--version\" ]; then echo \"{name} 0.2.0\"; exit 0; fi\necho \"{name} called: $*\"\necho \"cwd: $(pwd)\"\n"
                ),
            );
        }

        Self { bin, project }
    }

    pub fn bin_dir(&self) -> &Path {
        self.bin.path()
    }

    pub fn project_dir(&self) -> &Path {
        self.project.path()
    }

    /// Write a config file pointing every lookup at this toolchain
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let path = self.project.path().join("toolgate.toml");
        let content = format!(
            "[environment]\ntoolchain_dir = {:?}\nsystem_dirs = [\"/usr/bin\", \"/bin\"]\n\n[resolver]\ncandidate_dirs = []\n\n{}",
            self.bin.path().display().to_string(),
            extra
        );
        fs::write(&path, content).unwrap();
        path
    }
}

/// Write an executable script
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path
}
