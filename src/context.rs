//! Target context: active platform target and install directories.
//!
//! The context is computed once at startup and stays fixed for the run.
//!
//! # Platform-Specific Behavior
//!
//! ## Windows
//! - Plugins go to `%APPDATA%\VapourSynth\plugins32` or `plugins64`
//! - A portable host install (`portable.vs` next to the `vapoursynth` module)
//!   keeps plugins beside the module instead
//!
//! ## Other platforms
//! - Plugins go to `$XDG_DATA_HOME/vapoursynth/plugins32|64`
//!   (falling back to `~/.local/share`)
//!
//! Scripts always go to the Python user site-packages directory, or the
//! working directory in portable mode.

use anyhow::{anyhow, bail, Context, Result};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::catalog::{Package, PackageType};

/// Overrides the discovered script directory.
pub const SCRIPT_DIR_ENV: &str = "VSDEPOT_SCRIPT_DIR";
/// Overrides the discovered plugin directory.
pub const PLUGIN_DIR_ENV: &str = "VSDEPOT_PLUGIN_DIR";
/// Python interpreter used to query site-packages.
pub const PYTHON_ENV: &str = "VSDEPOT_PYTHON";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Win32,
    Win64,
}

impl Target {
    pub fn as_str(self) -> &'static str {
        match self {
            Target::Win32 => "win32",
            Target::Win64 => "win64",
        }
    }

    /// Target matching the pointer width of this build.
    pub fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Target::Win64
        } else {
            Target::Win32
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "win32" => Ok(Target::Win32),
            "win64" => Ok(Target::Win64),
            other => bail!("Unknown target '{other}', expected win32 or win64"),
        }
    }
}

/// Process-wide install configuration consumed by the engine.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub target: Target,
    pub script_dir: PathBuf,
    pub plugin_dir: PathBuf,
}

impl InstallContext {
    pub fn new(
        target: Target,
        script_dir: impl Into<PathBuf>,
        plugin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target,
            script_dir: script_dir.into(),
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Discover install directories for the current platform.
    ///
    /// `VSDEPOT_SCRIPT_DIR` and `VSDEPOT_PLUGIN_DIR` take precedence over
    /// anything discovered.
    pub fn discover(target: Target, portable: bool) -> Result<Self> {
        let script_dir = match std::env::var_os(SCRIPT_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None if portable => PathBuf::from("."),
            None => python_user_site()?,
        };

        let plugin_dir = match std::env::var_os(PLUGIN_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None if portable => portable_plugin_dir(Path::new("."), target),
            None => match host_portable_base() {
                Some(base) => portable_plugin_dir(&base, target),
                None => user_plugin_dir(target)?,
            },
        };

        Ok(Self::new(target, script_dir, plugin_dir))
    }

    /// Create both install directories if they don't exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.script_dir, &self.plugin_dir] {
            fs::create_dir_all(dir)
                .context(format!("Failed to create install directory: {:?}", dir))?;
        }
        Ok(())
    }

    /// Install directory for a package, by its type.
    pub fn install_dir(&self, package: &Package) -> &Path {
        match package.kind {
            PackageType::Script => &self.script_dir,
            PackageType::Plugin => &self.plugin_dir,
        }
    }
}

fn portable_plugin_dir(base: &Path, target: Target) -> PathBuf {
    let arch = match target {
        Target::Win32 => "vapoursynth32",
        Target::Win64 => "vapoursynth64",
    };
    base.join(arch).join("plugins")
}

fn plugin_dir_name(target: Target) -> &'static str {
    match target {
        Target::Win32 => "plugins32",
        Target::Win64 => "plugins64",
    }
}

#[cfg(target_os = "windows")]
fn user_plugin_dir(target: Target) -> Result<PathBuf> {
    let appdata = std::env::var("APPDATA").context("APPDATA environment variable not set")?;
    Ok(PathBuf::from(appdata)
        .join("VapourSynth")
        .join(plugin_dir_name(target)))
}

#[cfg(not(target_os = "windows"))]
fn user_plugin_dir(target: Target) -> Result<PathBuf> {
    let data_home = match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".local").join("share")
        }
    };
    Ok(data_home.join("vapoursynth").join(plugin_dir_name(target)))
}

fn python_command() -> Command {
    let python = std::env::var(PYTHON_ENV).unwrap_or_else(|_| {
        if cfg!(target_os = "windows") {
            "python".to_string()
        } else {
            "python3".to_string()
        }
    });
    Command::new(python)
}

/// Run a one-line Python program and return its trimmed stdout.
fn python_eval(program: &str) -> Result<String> {
    let output = python_command()
        .args(["-c", program])
        .output()
        .context("Failed to run the Python interpreter")?;
    if !output.status.success() {
        return Err(anyhow!(
            "Python exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn python_user_site() -> Result<PathBuf> {
    let site = python_eval("import site; print(site.getusersitepackages())")
        .context("Could not determine the Python user site-packages directory")?;
    Ok(PathBuf::from(site))
}

/// Directory of a portable host install, if the host module is marked portable.
fn host_portable_base() -> Option<PathBuf> {
    let module_dir =
        python_eval("import os, vapoursynth; print(os.path.dirname(vapoursynth.__file__))").ok()?;
    let base = PathBuf::from(module_dir);
    base.join("portable.vs").exists().then_some(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parses_and_prints() {
        assert_eq!("win32".parse::<Target>().unwrap(), Target::Win32);
        assert_eq!("win64".parse::<Target>().unwrap(), Target::Win64);
        assert!("arm64".parse::<Target>().is_err());
        assert_eq!(Target::Win64.to_string(), "win64");
    }

    #[test]
    fn portable_layout() {
        assert_eq!(
            portable_plugin_dir(Path::new("."), Target::Win32),
            Path::new(".").join("vapoursynth32").join("plugins")
        );
    }

    #[test]
    fn ensure_dirs_creates_both() {
        let root = tempfile::tempdir().unwrap();
        let ctx = InstallContext::new(
            Target::Win64,
            root.path().join("scripts"),
            root.path().join("plugins64"),
        );
        ctx.ensure_dirs().unwrap();
        assert!(ctx.script_dir.is_dir());
        assert!(ctx.plugin_dir.is_dir());
    }
}
