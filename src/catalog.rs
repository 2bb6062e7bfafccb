//! Catalog model: known packages, their releases and per-target binaries.
//!
//! The catalog is read once from the locally cached definitions file and is
//! immutable for the rest of the run.

use crate::context::Target;
use crate::error::{RepoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Default name of the cached definitions file.
pub const CATALOG_FILE_NAME: &str = "vspackages.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageType {
    #[serde(rename = "PyScript", alias = "Script")]
    Script,
    Plugin,
}

/// Installable payload of one release for one target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinaryDescriptor {
    pub url: String,
    /// Archive member paths, or a single plain filename.
    pub files: Vec<String>,
    /// Stripped filename -> expected content hash.
    pub hash: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<BinaryDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win32: Option<BinaryDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win64: Option<BinaryDescriptor>,
}

impl Release {
    /// Returns the descriptor stored under a binary key (`script`, `win32`, `win64`).
    pub fn binary(&self, key: &str) -> Option<&BinaryDescriptor> {
        match key {
            "script" => self.script.as_ref(),
            "win32" => self.win32.as_ref(),
            "win64" => self.win64.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub identifier: String,
    #[serde(rename = "type")]
    pub kind: PackageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulename: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub releases: Vec<Release>,
}

impl Package {
    /// Binary key used to pick a release's descriptor for this package.
    pub fn binary_key(&self, target: Target) -> &'static str {
        match self.kind {
            PackageType::Script => "script",
            PackageType::Plugin => target.as_str(),
        }
    }

    /// First release in catalog order that ships a binary for the target.
    pub fn latest_installable(&self, target: Target) -> Option<&Release> {
        let key = self.binary_key(target);
        self.releases.iter().find(|r| r.binary(key).is_some())
    }

    pub fn can_install(&self, target: Target) -> bool {
        self.latest_installable(target).is_some()
    }

    pub fn release(&self, version: &str) -> Option<&Release> {
        self.releases.iter().find(|r| r.version == version)
    }

    /// Namespace for plugins, module name for scripts.
    pub fn grouping_key(&self) -> &str {
        let key = match self.kind {
            PackageType::Plugin => self.namespace.as_deref(),
            PackageType::Script => self.modulename.as_deref(),
        };
        key.unwrap_or("")
    }
}

/// Accepts both a bare package list and the wrapped `{"packages": [...]}` form.
#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    List(Vec<Package>),
    Wrapped { packages: Vec<Package> },
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: Vec<Package>,
}

impl Catalog {
    pub fn new(packages: Vec<Package>) -> Self {
        Self { packages }
    }

    /// Load the catalog from a previously fetched definitions file.
    ///
    /// A missing file maps to [`RepoError::CatalogMissing`] so callers can
    /// tell the user to refresh the definitions first.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RepoError::CatalogMissing(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json(&content).map_err(|source| RepoError::CatalogInvalid {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        let packages = match serde_json::from_str::<CatalogFile>(content)? {
            CatalogFile::List(packages) => packages,
            CatalogFile::Wrapped { packages } => packages,
        };
        Ok(Self { packages })
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn by_identifier(&self, identifier: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.identifier == identifier)
    }

    pub fn by_namespace(&self, namespace: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.namespace.as_deref() == Some(namespace))
    }

    pub fn by_modulename(&self, modulename: &str) -> Option<&Package> {
        self.packages
            .iter()
            .find(|p| p.modulename.as_deref() == Some(modulename))
    }

    /// Case-insensitive display name lookup.
    pub fn by_name(&self, name: &str) -> Option<&Package> {
        let wanted = name.to_lowercase();
        self.packages
            .iter()
            .find(|p| p.name.to_lowercase() == wanted)
    }

    /// Resolve a user-supplied reference: identifier, then namespace, then
    /// module name, then display name. First match wins.
    pub fn resolve(&self, reference: &str) -> Result<&Package> {
        self.by_identifier(reference)
            .or_else(|| self.by_namespace(reference))
            .or_else(|| self.by_modulename(reference))
            .or_else(|| self.by_name(reference))
            .ok_or_else(|| RepoError::NotFound(reference.to_string()))
    }
}
