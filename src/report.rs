//! Status reporting for frontends.
//!
//! The engine never prints. It hands [`Notice`] values to a [`ReportSink`]
//! and returns [`Tally`] counts; summaries and listings are rendered here.

use crate::catalog::{Catalog, Package};
use crate::context::Target;
use crate::session::is_upgradable;
use crate::state::InstalledStateTable;
use std::fmt;
use std::ops::{Add, AddAssign};

/// Human-readable status events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Installed { name: String, version: String },
    NoBinaryForTarget { name: String, target: Target },
    AlreadyLatest { name: String },
    RequiresForce { name: String },
    NotInstalled { name: String },
    UpgradeFailed { name: String, reason: String },
    Uninstalled { name: String, version: String },
    UnknownVersionUninstall { name: String },
    NothingToUninstall { name: String },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Installed { name, version } => {
                write!(f, "Successfully installed {name} {version}")
            }
            Notice::NoBinaryForTarget { name, target } => write!(
                f,
                "No binaries available for {target} in package {name}, skipping installation"
            ),
            Notice::AlreadyLatest { name } => {
                write!(f, "Package {name} not upgraded, latest version installed")
            }
            Notice::RequiresForce { name } => write!(
                f,
                "Package {name} not upgraded, unknown version must use -f to force replacement"
            ),
            Notice::NotInstalled { name } => {
                write!(f, "Package {name} not upgraded, it is not installed")
            }
            Notice::UpgradeFailed { name, reason } => {
                write!(f, "Failed to upgrade {name}: {reason}")
            }
            Notice::Uninstalled { name, version } => {
                write!(f, "Uninstalled package: {name} {version}")
            }
            Notice::UnknownVersionUninstall { name } => {
                write!(f, "Can't uninstall unknown version package: {name}")
            }
            Notice::NothingToUninstall { name } => {
                write!(f, "No files installed for {name}, skipping uninstall")
            }
        }
    }
}

/// Receives status events from the engine.
pub trait ReportSink {
    fn notice(&mut self, notice: Notice);
}

impl ReportSink for Vec<Notice> {
    fn notice(&mut self, notice: Notice) {
        self.push(notice);
    }
}

/// Discards everything.
pub struct NullSink;

impl ReportSink for NullSink {
    fn notice(&mut self, _notice: Notice) {}
}

/// Counts returned by install, upgrade and uninstall.
///
/// `primary` counts the requested packages acted on, `dependencies` the
/// dependencies installed along the way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub primary: usize,
    pub dependencies: usize,
}

impl Tally {
    pub const NONE: Tally = Tally {
        primary: 0,
        dependencies: 0,
    };

    pub fn new(primary: usize, dependencies: usize) -> Self {
        Self {
            primary,
            dependencies,
        }
    }

    /// Everything installed, regardless of role.
    pub fn total(&self) -> usize {
        self.primary + self.dependencies
    }
}

impl Add for Tally {
    type Output = Tally;

    fn add(self, rhs: Tally) -> Tally {
        Tally::new(
            self.primary + rhs.primary,
            self.dependencies + rhs.dependencies,
        )
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Tally) {
        *self = *self + rhs;
    }
}

fn packages(n: usize) -> &'static str {
    if n == 1 {
        "package"
    } else {
        "packages"
    }
}

fn dependencies(n: usize) -> &'static str {
    if n == 1 {
        "dependency"
    } else {
        "dependencies"
    }
}

pub fn install_summary(t: Tally) -> String {
    match (t.primary, t.dependencies) {
        (0, 0) => "All packages and dependencies are already installed".to_string(),
        (p, 0) => format!("{p} {} installed", packages(p)),
        (0, d) => format!("{d} missing {} installed", dependencies(d)),
        (p, d) => format!(
            "{p} {} and {d} additional {} installed",
            packages(p),
            dependencies(d)
        ),
    }
}

pub fn upgrade_summary(t: Tally) -> String {
    match (t.primary, t.dependencies) {
        (0, 0) => "All packages are already up to date".to_string(),
        (p, 0) => format!("{p} {} upgraded", packages(p)),
        (0, d) => format!("{d} missing {} installed", dependencies(d)),
        (p, d) => format!(
            "{p} {} upgraded and {d} additional {} installed",
            packages(p),
            dependencies(d)
        ),
    }
}

pub fn uninstall_summary(t: Tally) -> String {
    match t.primary {
        0 => "No packages uninstalled".to_string(),
        p => format!("{p} {} uninstalled", packages(p)),
    }
}

/// One line of the `installed` / `available` listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    /// `*` upgradable, `+` upgradable only with force.
    pub marker: Option<char>,
    pub name: String,
    pub grouping: String,
    pub installed: String,
    pub latest: String,
    pub identifier: String,
}

impl StatusRow {
    pub fn header() -> String {
        format_columns("Name", "Namespace", "Installed", "Latest", "Identifier")
    }

    pub fn for_package(package: &Package, table: &InstalledStateTable, target: Target) -> Self {
        let marker = if is_upgradable(package, table, target, false) {
            Some('*')
        } else if is_upgradable(package, table, target, true) {
            Some('+')
        } else {
            None
        };
        Self {
            marker,
            name: package.name.clone(),
            grouping: package.grouping_key().to_string(),
            installed: table
                .get(&package.identifier)
                .map(ToString::to_string)
                .unwrap_or_default(),
            latest: package
                .latest_installable(target)
                .map(|r| r.version.clone())
                .unwrap_or_default(),
            identifier: package.identifier.clone(),
        }
    }
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.marker {
            Some(m) => format!("{m}{}", self.name),
            None => self.name.clone(),
        };
        f.write_str(&format_columns(
            &name,
            &self.grouping,
            &self.installed,
            &self.latest,
            &self.identifier,
        ))
    }
}

fn format_columns(name: &str, grouping: &str, installed: &str, latest: &str, id: &str) -> String {
    format!("{name:25} {grouping:15} {installed:11} {latest:11} {id}")
}

/// Rows for every installed package, in catalog order.
pub fn installed_rows(
    catalog: &Catalog,
    table: &InstalledStateTable,
    target: Target,
) -> Vec<StatusRow> {
    table
        .installed_in(catalog)
        .into_iter()
        .map(|p| StatusRow::for_package(p, table, target))
        .collect()
}

/// Rows for every cataloged package.
pub fn available_rows(
    catalog: &Catalog,
    table: &InstalledStateTable,
    target: Target,
) -> Vec<StatusRow> {
    catalog
        .packages()
        .iter()
        .map(|p| StatusRow::for_package(p, table, target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{BinaryDescriptor, PackageType, Release};
    use crate::state::InstalledState;

    #[test]
    fn summaries_pluralize() {
        assert_eq!(
            install_summary(Tally::NONE),
            "All packages and dependencies are already installed"
        );
        assert_eq!(install_summary(Tally::new(1, 0)), "1 package installed");
        assert_eq!(install_summary(Tally::new(0, 2)), "2 missing dependencies installed");
        assert_eq!(
            install_summary(Tally::new(2, 1)),
            "2 packages and 1 additional dependency installed"
        );
        assert_eq!(upgrade_summary(Tally::NONE), "All packages are already up to date");
        assert_eq!(
            upgrade_summary(Tally::new(1, 1)),
            "1 package upgraded and 1 additional dependency installed"
        );
        assert_eq!(uninstall_summary(Tally::NONE), "No packages uninstalled");
        assert_eq!(uninstall_summary(Tally::new(3, 0)), "3 packages uninstalled");
    }

    #[test]
    fn tally_accumulates() {
        let mut t = Tally::NONE;
        t += Tally::new(1, 2);
        t += Tally::new(0, 1);
        assert_eq!(t, Tally::new(1, 3));
        assert_eq!(t.total(), 4);
    }

    fn package(versions: &[&str]) -> Package {
        Package {
            name: "Plug".into(),
            identifier: "com.example.plug".into(),
            kind: PackageType::Plugin,
            namespace: Some("plug".into()),
            modulename: None,
            dependencies: vec![],
            releases: versions
                .iter()
                .map(|v| Release {
                    version: v.to_string(),
                    script: None,
                    win32: None,
                    win64: Some(BinaryDescriptor::default()),
                })
                .collect(),
        }
    }

    #[test]
    fn row_markers() {
        let pkg = package(&["r2", "r1"]);
        let mut table = InstalledStateTable::new();

        table.set("com.example.plug", InstalledState::Version("r1".into()));
        let row = StatusRow::for_package(&pkg, &table, Target::Win64);
        assert_eq!(row.marker, Some('*'));
        assert_eq!(row.latest, "r2");

        table.set("com.example.plug", InstalledState::Unknown);
        let row = StatusRow::for_package(&pkg, &table, Target::Win64);
        assert_eq!(row.marker, Some('+'));
        assert_eq!(row.installed, "Unknown");

        table.set("com.example.plug", InstalledState::Version("r2".into()));
        assert_eq!(StatusRow::for_package(&pkg, &table, Target::Win64).marker, None);
    }

    #[test]
    fn row_layout() {
        let pkg = package(&["r2"]);
        let table = InstalledStateTable::new();
        let line = StatusRow::for_package(&pkg, &table, Target::Win64).to_string();
        assert!(line.starts_with("Plug                      plug            "));
        assert!(line.ends_with("r2          com.example.plug"));
        assert!(StatusRow::header().starts_with("Name "));
    }

    #[test]
    fn notices_render() {
        let n = Notice::NoBinaryForTarget {
            name: "Plug".into(),
            target: Target::Win32,
        };
        assert_eq!(
            n.to_string(),
            "No binaries available for win32 in package Plug, skipping installation"
        );
    }
}
