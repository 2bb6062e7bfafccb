//! Archive member extraction through an external 7-Zip binary.

use crate::error::{RepoError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

/// Overrides the location of the 7-Zip command line tool.
pub const SEVEN_ZIP_ENV: &str = "VSDEPOT_7Z";

const SEVEN_ZIP_MAGIC: &[u8] = b"7z\xBC\xAF\x27\x1C";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Prepares an in-memory archive for member extraction.
///
/// A release stages its payload once and then pulls every declared member
/// from the staged copy.
pub trait ArchiveExtractor {
    fn stage(&self, archive: &[u8]) -> Result<Box<dyn StagedArchive + '_>>;
}

/// An archive ready to hand out single members.
pub trait StagedArchive {
    fn extract_member(&self, member: &str) -> Result<Vec<u8>>;
}

impl<T: StagedArchive + ?Sized> StagedArchive for &T {
    fn extract_member(&self, member: &str) -> Result<Vec<u8>> {
        (**self).extract_member(member)
    }
}

/// True when a payload should be treated as an archive.
///
/// The URL extension decides first; payload magic bytes are the fallback for
/// URLs without a telling extension.
pub fn is_archive(url: &str, payload: &[u8]) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_ascii_lowercase();
    if path.ends_with(".7z") || path.ends_with(".zip") {
        return true;
    }
    payload.starts_with(SEVEN_ZIP_MAGIC) || payload.starts_with(ZIP_MAGIC)
}

/// Extracts with `7z e -so <archive> <member>`.
#[derive(Debug, Clone)]
pub struct SevenZip {
    program: PathBuf,
}

impl SevenZip {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate the tool: `VSDEPOT_7Z`, then the default install location,
    /// then whatever `7z` resolves to on `PATH`.
    pub fn locate() -> Self {
        if let Some(program) = std::env::var_os(SEVEN_ZIP_ENV) {
            return Self::new(program);
        }
        Self::new(default_program())
    }
}

#[cfg(target_os = "windows")]
fn default_program() -> PathBuf {
    let program_files =
        std::env::var("ProgramFiles").unwrap_or_else(|_| r"C:\Program Files".to_string());
    let installed = PathBuf::from(program_files).join("7-Zip").join("7z.exe");
    if installed.exists() {
        installed
    } else {
        PathBuf::from("7z.exe")
    }
}

#[cfg(not(target_os = "windows"))]
fn default_program() -> PathBuf {
    PathBuf::from("7z")
}

impl ArchiveExtractor for SevenZip {
    fn stage(&self, archive: &[u8]) -> Result<Box<dyn StagedArchive + '_>> {
        let mut file = tempfile::Builder::new().prefix("vsm").tempfile()?;
        file.write_all(archive)?;
        file.flush()?;
        debug!(path = ?file.path(), bytes = archive.len(), "staged archive");
        Ok(Box::new(SevenZipArchive {
            program: &self.program,
            file,
        }))
    }
}

/// Payload written to a temp file, removed on drop.
pub struct SevenZipArchive<'a> {
    program: &'a Path,
    file: NamedTempFile,
}

impl StagedArchive for SevenZipArchive<'_> {
    fn extract_member(&self, member: &str) -> Result<Vec<u8>> {
        debug!(member, program = ?self.program, "extracting");
        let output = Command::new(self.program)
            .arg("e")
            .arg("-so")
            .arg(self.file.path())
            .arg(member)
            .output()
            .map_err(|e| RepoError::Extraction {
                member: member.to_string(),
                status: "not started".to_string(),
                stderr: format!("{}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            return Err(RepoError::Extraction {
                member: member.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}
