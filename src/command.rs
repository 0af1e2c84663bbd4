//! Builds the nmap argument vector from validated input.
use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::ValidationError;
use crate::validate::{ScanFlags, Target};

const DEFAULT_BINARY: &str = "/usr/bin/nmap";
const DEFAULT_DATA_DIR: &str = "/usr/share/nmap";

/// Where the scanner lives on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub binary: PathBuf,
    pub data_dir: PathBuf,
}

impl EngineConfig {
    pub fn new(binary: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Probe `NMAP_PATH`, then `PATH`, then fall back to `/usr/bin/nmap`.
    /// The data dir is taken from `NMAP_DATADIR` when set.
    pub fn detect() -> Self {
        let binary = env::var_os("NMAP_PATH")
            .map(PathBuf::from)
            .filter(|p| is_executable(p))
            .or_else(|| env::var_os("PATH").and_then(|path| find_in_path("nmap", &path)))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BINARY));
        let data_dir = env::var_os("NMAP_DATADIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        debug!(binary = %binary.display(), data_dir = %data_dir.display(), "resolved nmap location");
        Self { binary, data_dir }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY, DEFAULT_DATA_DIR)
    }
}

fn find_in_path(name: &str, path: &OsStr) -> Option<PathBuf> {
    env::split_paths(path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// An nmap invocation assembled only from input that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCommand {
    binary: PathBuf,
    data_dir: PathBuf,
    target: Target,
    flags: ScanFlags,
}

impl ValidatedCommand {
    pub fn new(engine: &EngineConfig, target: &str, flags: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            binary: engine.binary.clone(),
            data_dir: engine.data_dir.clone(),
            target: Target::parse(target)?,
            flags: ScanFlags::parse(flags)?,
        })
    }

    pub fn program(&self) -> &Path {
        &self.binary
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn flags(&self) -> &ScanFlags {
        &self.flags
    }

    /// Arguments after the program: data dir, XML to stdout, caller flags, target.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--datadir".to_string(),
            self.data_dir.display().to_string(),
            "-oX".to_string(),
            "-".to_string(),
        ];
        args.extend(self.flags.tokens().iter().cloned());
        args.push(self.target.to_string());
        args
    }

    /// Shell-style rendering for logs only; never executed.
    pub fn display_line(&self) -> String {
        format!("{} {}", self.binary.display(), self.args().join(" "))
    }
}
