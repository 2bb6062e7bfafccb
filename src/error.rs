//! Error types for the reconciliation engine.
//!
//! Conditions that are reported rather than raised (no binary for the active
//! target, ambiguous `Unknown` state) live in [`crate::report::Notice`] instead.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    /// No package matched by identifier, namespace, module name or display name.
    #[error("Package {0} not found")]
    NotFound(String),

    /// Verified content does not match the catalog-declared hash.
    #[error("Hash mismatch for {file}: got {actual} but expected {expected}")]
    HashMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    /// The archive tool could not produce a member.
    #[error("Failed to extract {member} (exit status {status}): {stderr}")]
    Extraction {
        member: String,
        status: String,
        stderr: String,
    },

    /// A release declares multiple files without an archive payload.
    #[error("Unsupported layout for {package} {version}: {files} files declared but payload is not an archive")]
    UnsupportedLayout {
        package: String,
        version: String,
        files: usize,
    },

    /// A declared file has no entry in the release's hash mapping.
    #[error("No hash declared for {file} in {package} {version}")]
    MissingHash {
        package: String,
        version: String,
        file: String,
    },

    /// Installing a package re-entered a package that is still being installed.
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("No valid package definitions found at {}. Run update command first!", .0.display())]
    CatalogMissing(PathBuf),

    #[error("Invalid package definitions in {}: {source}", .path.display())]
    CatalogInvalid {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// True for errors that only concern the catalog data, not the local system.
    pub fn is_catalog_error(&self) -> bool {
        matches!(
            self,
            RepoError::UnsupportedLayout { .. }
                | RepoError::MissingHash { .. }
                | RepoError::DependencyCycle(_)
                | RepoError::CatalogInvalid { .. }
        )
    }
}
