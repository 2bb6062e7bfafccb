//! Installed-state table and the install state detector.
//!
//! There is no install database: what is installed is rederived on every run
//! by hashing files in the install directories and matching them against the
//! catalog. The detector only reads the filesystem.
//!
//! Known limitation: when several releases of a package ship identical files,
//! the release listed first in the catalog is reported.

use crate::catalog::{Catalog, Package};
use crate::context::InstallContext;
use crate::hash::check_hash;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use tracing::{debug, warn};

/// Recorded state of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledState {
    /// All files of this release are present with matching hashes.
    Version(String),
    /// Files exist on disk but match no cataloged release.
    Unknown,
}

impl InstalledState {
    pub fn version(&self) -> Option<&str> {
        match self {
            InstalledState::Version(v) => Some(v),
            InstalledState::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, InstalledState::Unknown)
    }
}

impl fmt::Display for InstalledState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstalledState::Version(v) => f.write_str(v),
            InstalledState::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Package identifier -> installed state. Absent packages have no entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstalledStateTable {
    entries: HashMap<String, InstalledState>,
}

impl InstalledStateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identifier: &str) -> Option<&InstalledState> {
        self.entries.get(identifier)
    }

    pub fn is_installed(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    pub fn set(&mut self, identifier: impl Into<String>, state: InstalledState) {
        self.entries.insert(identifier.into(), state);
    }

    pub fn remove(&mut self, identifier: &str) -> Option<InstalledState> {
        self.entries.remove(identifier)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Installed identifiers in catalog order.
    pub fn installed_in<'c>(&self, catalog: &'c Catalog) -> Vec<&'c Package> {
        catalog
            .packages()
            .iter()
            .filter(|p| self.is_installed(&p.identifier))
            .collect()
    }
}

/// Rebuild the installed-state table from the catalog and the filesystem.
pub fn detect(catalog: &Catalog, ctx: &InstallContext) -> InstalledStateTable {
    let mut table = InstalledStateTable::new();
    for package in catalog.packages() {
        if let Some(state) = detect_package(package, ctx) {
            debug!(package = %package.identifier, state = %state, "detected");
            table.set(package.identifier.clone(), state);
        }
    }
    table
}

/// Classify one package. `None` means nothing of it exists on disk.
pub fn detect_package(package: &Package, ctx: &InstallContext) -> Option<InstalledState> {
    let dir = ctx.install_dir(package);
    let key = package.binary_key(ctx.target);
    let mut any_exists = false;

    for release in &package.releases {
        let Some(binary) = release.binary(key) else {
            continue;
        };
        // A release without hashes cannot be verified, so it never matches.
        if binary.hash.is_empty() {
            continue;
        }

        let mut matched = true;
        for (file, expected) in &binary.hash {
            let path = dir.join(file);
            match fs::read(&path) {
                Ok(data) => {
                    any_exists = true;
                    if !check_hash(&data, expected).matched {
                        matched = false;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => matched = false,
                Err(e) => {
                    warn!("Failed to read {:?}: {}", path, e);
                    any_exists = true;
                    matched = false;
                }
            }
        }

        if matched {
            return Some(InstalledState::Version(release.version.clone()));
        }
    }

    any_exists.then_some(InstalledState::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BinaryDescriptor, PackageType, Release};
    use crate::context::Target;
    use sha2::{Digest, Sha256};
    use std::collections::BTreeMap;
    use std::path::Path;

    fn sha256(data: &[u8]) -> String {
        format!("{:x}", Sha256::digest(data))
    }

    fn release(version: &str, files: &[(&str, &[u8])]) -> Release {
        let hash: BTreeMap<String, String> = files
            .iter()
            .map(|(name, data)| (name.to_string(), sha256(data)))
            .collect();
        Release {
            version: version.to_string(),
            script: None,
            win32: None,
            win64: Some(BinaryDescriptor {
                url: format!("https://example.invalid/{version}.7z"),
                files: files.iter().map(|(n, _)| format!("x64/{n}")).collect(),
                hash,
            }),
        }
    }

    fn plugin(releases: Vec<Release>) -> Package {
        Package {
            name: "Plug".into(),
            identifier: "com.example.plug".into(),
            kind: PackageType::Plugin,
            namespace: Some("plug".into()),
            modulename: None,
            dependencies: vec![],
            releases,
        }
    }

    fn ctx(root: &Path) -> InstallContext {
        InstallContext::new(Target::Win64, root.join("scripts"), root.to_path_buf())
    }

    #[test]
    fn absent_when_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let pkg = plugin(vec![release("r2", &[("a.dll", b"two")])]);
        assert_eq!(detect_package(&pkg, &ctx(dir.path())), None);
    }

    #[test]
    fn matches_older_release() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"one").unwrap();
        let pkg = plugin(vec![
            release("r2", &[("a.dll", b"two")]),
            release("r1", &[("a.dll", b"one")]),
        ]);
        assert_eq!(
            detect_package(&pkg, &ctx(dir.path())),
            Some(InstalledState::Version("r1".into()))
        );
    }

    #[test]
    fn first_listed_release_wins_on_identical_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"same").unwrap();
        let pkg = plugin(vec![
            release("r2", &[("a.dll", b"same")]),
            release("r1", &[("a.dll", b"same")]),
        ]);
        assert_eq!(
            detect_package(&pkg, &ctx(dir.path())),
            Some(InstalledState::Version("r2".into()))
        );
    }

    #[test]
    fn tampered_or_partial_files_are_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"patched").unwrap();
        let pkg = plugin(vec![release("r1", &[("a.dll", b"one")])]);
        assert_eq!(
            detect_package(&pkg, &ctx(dir.path())),
            Some(InstalledState::Unknown)
        );

        // One of two files present with the right content.
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"one").unwrap();
        let pkg = plugin(vec![release("r1", &[("a.dll", b"one"), ("b.dll", b"two")])]);
        assert_eq!(
            detect_package(&pkg, &ctx(dir.path())),
            Some(InstalledState::Unknown)
        );
    }

    #[test]
    fn detection_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"one").unwrap();
        let catalog = Catalog::new(vec![plugin(vec![release("r1", &[("a.dll", b"one")])])]);
        let ctx = ctx(dir.path());
        let first = detect(&catalog, &ctx);
        let second = detect(&catalog, &ctx);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn other_target_binaries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.dll"), b"one").unwrap();
        let pkg = plugin(vec![release("r1", &[("a.dll", b"one")])]);
        let ctx = InstallContext::new(Target::Win32, dir.path().join("s"), dir.path());
        assert_eq!(detect_package(&pkg, &ctx), None);
    }
}
