//! Reconciliation session: install, upgrade and uninstall.
//!
//! A session owns everything that is mutable for one run: the installed-state
//! table, the URL cache and the bookkeeping for dependency recursion. Nothing
//! here is global, so independent sessions can run side by side in tests.

use crate::archive::{ArchiveExtractor, SevenZip};
use crate::catalog::{Catalog, Package};
use crate::context::{InstallContext, Target};
use crate::error::{RepoError, Result};
use crate::fetch::{CachingFetcher, ContentFetcher, HttpFetcher};
use crate::materialize::materialize;
use crate::report::{Notice, ReportSink, Tally};
use crate::state::{detect, InstalledState, InstalledStateTable};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Pseudo-reference that upgrades every installed package.
pub const UPGRADE_ALL: &str = "all";

/// A package is upgradable when it is installed, the target has a release,
/// and the installed version differs from the latest installable one.
/// `Unknown` installs only qualify with `force`.
pub fn is_upgradable(
    package: &Package,
    table: &InstalledStateTable,
    target: Target,
    force: bool,
) -> bool {
    let Some(latest) = package.latest_installable(target) else {
        return false;
    };
    match table.get(&package.identifier) {
        None => false,
        Some(InstalledState::Unknown) => force,
        Some(InstalledState::Version(v)) => *v != latest.version,
    }
}

pub struct Session {
    catalog: Arc<Catalog>,
    ctx: InstallContext,
    state: InstalledStateTable,
    fetcher: CachingFetcher<Box<dyn ContentFetcher>>,
    extractor: Box<dyn ArchiveExtractor>,
    /// Packages whose dependency walk finished during the current top-level
    /// install or upgrade.
    visited: HashSet<String>,
    /// Chain of packages currently being installed, outermost first.
    in_progress: Vec<String>,
}

impl Session {
    /// Build a session and detect the installed state from disk.
    pub fn new(
        catalog: Catalog,
        ctx: InstallContext,
        fetcher: impl ContentFetcher + 'static,
        extractor: impl ArchiveExtractor + 'static,
    ) -> Self {
        let state = detect(&catalog, &ctx);
        let fetcher: Box<dyn ContentFetcher> = Box::new(fetcher);
        Self {
            catalog: Arc::new(catalog),
            ctx,
            state,
            fetcher: CachingFetcher::new(fetcher),
            extractor: Box::new(extractor),
            visited: HashSet::new(),
            in_progress: Vec::new(),
        }
    }

    /// Load the cached catalog and wire up the HTTP fetcher and 7-Zip.
    pub fn open(catalog_path: &Path, ctx: InstallContext) -> anyhow::Result<Self> {
        let catalog = Catalog::load(catalog_path)?;
        ctx.ensure_dirs()?;
        Ok(Self::new(catalog, ctx, HttpFetcher::new()?, SevenZip::locate()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    pub fn state(&self) -> &InstalledStateTable {
        &self.state
    }

    /// Throw away the table and rederive it from disk.
    pub fn redetect(&mut self) {
        self.state = detect(&self.catalog, &self.ctx);
    }

    /// Install a package and, first, its dependencies.
    ///
    /// Returns the package itself (0 or 1) and the dependencies installed.
    pub fn install(&mut self, reference: &str, sink: &mut dyn ReportSink) -> Result<Tally> {
        let catalog = Arc::clone(&self.catalog);
        let package = catalog.resolve(reference)?;
        self.visited.clear();
        self.install_package(package, sink)
    }

    fn install_package(&mut self, package: &Package, sink: &mut dyn ReportSink) -> Result<Tally> {
        if !package.can_install(self.ctx.target) {
            sink.notice(Notice::NoBinaryForTarget {
                name: package.name.clone(),
                target: self.ctx.target,
            });
            return Ok(Tally::NONE);
        }
        if self.visited.contains(&package.identifier) {
            return Ok(Tally::NONE);
        }

        self.enter(package)?;
        let result = self.install_with_dependencies(package, sink);
        self.in_progress.pop();
        if result.is_ok() {
            self.visited.insert(package.identifier.clone());
        }
        result
    }

    fn install_with_dependencies(
        &mut self,
        package: &Package,
        sink: &mut dyn ReportSink,
    ) -> Result<Tally> {
        let catalog = Arc::clone(&self.catalog);
        let mut dependencies = 0;
        // Walk dependencies even when this package is present
        for dep in &package.dependencies {
            let dep = catalog.resolve(dep)?;
            dependencies += self.install_package(dep, sink)?.total();
        }

        // Unknown counts as installed; only upgrade --force replaces it.
        if self.state.is_installed(&package.identifier) {
            return Ok(Tally::new(0, dependencies));
        }
        let installed = self.install_files(package, sink)?;
        Ok(Tally::new(usize::from(installed), dependencies))
    }

    /// Push onto the in-progress chain, failing if the package is already on it.
    fn enter(&mut self, package: &Package) -> Result<()> {
        if self.in_progress.contains(&package.identifier) {
            let mut chain = self.in_progress.clone();
            chain.push(package.identifier.clone());
            return Err(RepoError::DependencyCycle(chain));
        }
        self.in_progress.push(package.identifier.clone());
        Ok(())
    }

    /// Materialize the latest installable release and record it.
    ///
    /// Returns false when the target has no release to install.
    fn install_files(&mut self, package: &Package, sink: &mut dyn ReportSink) -> Result<bool> {
        let key = package.binary_key(self.ctx.target);
        let Some((release, binary)) = package
            .latest_installable(self.ctx.target)
            .and_then(|r| r.binary(key).map(|b| (r, b)))
        else {
            return Ok(false);
        };

        // Scripts and plugins land in different directories
        let dest = self.ctx.install_dir(package).to_path_buf();
        materialize(
            package,
            release,
            binary,
            &dest,
            &mut self.fetcher,
            self.extractor.as_ref(),
        )?;

        self.state.set(
            package.identifier.clone(),
            InstalledState::Version(release.version.clone()),
        );
        info!(package = %package.identifier, version = %release.version, "installed");
        sink.notice(Notice::Installed {
            name: package.name.clone(),
            version: release.version.clone(),
        });
        Ok(true)
    }

    /// Upgrade one package, or every installed package for [`UPGRADE_ALL`].
    ///
    /// Returns upgraded packages and dependencies installed on the way.
    pub fn upgrade(
        &mut self,
        reference: &str,
        force: bool,
        sink: &mut dyn ReportSink,
    ) -> Result<Tally> {
        let catalog = Arc::clone(&self.catalog);
        self.visited.clear();
        if reference == UPGRADE_ALL {
            return Ok(self.upgrade_all(&catalog, force, sink));
        }

        let package = catalog.resolve(reference)?;
        if is_upgradable(package, &self.state, self.ctx.target, force) {
            return self.upgrade_files(package, sink);
        }

        // Explain why nothing happened
        let name = package.name.clone();
        let notice = if !self.state.is_installed(&package.identifier) {
            Notice::NotInstalled { name }
        } else if !package.can_install(self.ctx.target) {
            Notice::NoBinaryForTarget {
                name,
                target: self.ctx.target,
            }
        } else if is_upgradable(package, &self.state, self.ctx.target, true) {
            Notice::RequiresForce { name }
        } else {
            Notice::AlreadyLatest { name }
        };
        sink.notice(notice);
        Ok(Tally::NONE)
    }

    /// Each installed package is upgraded independently; a failure is reported
    /// and the batch moves on.
    fn upgrade_all(&mut self, catalog: &Catalog, force: bool, sink: &mut dyn ReportSink) -> Tally {
        let mut total = Tally::NONE;
        // Snapshot in catalog order
        for package in self.state.installed_in(catalog) {
            if !is_upgradable(package, &self.state, self.ctx.target, force) {
                continue;
            }
            match self.upgrade_files(package, sink) {
                Ok(tally) => total += tally,
                Err(e) => {
                    warn!(package = %package.identifier, error = %e, "upgrade failed");
                    sink.notice(Notice::UpgradeFailed {
                        name: package.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        total
    }

    /// Install missing dependencies, then overwrite with the latest release.
    fn upgrade_files(&mut self, package: &Package, sink: &mut dyn ReportSink) -> Result<Tally> {
        self.enter(package)?;
        let result = self.upgrade_with_dependencies(package, sink);
        self.in_progress.pop();
        result
    }

    fn upgrade_with_dependencies(
        &mut self,
        package: &Package,
        sink: &mut dyn ReportSink,
    ) -> Result<Tally> {
        let catalog = Arc::clone(&self.catalog);
        let mut dependencies = 0;
        // Present dependencies are left at their current version
        for dep in &package.dependencies {
            let dep = catalog.resolve(dep)?;
            if !self.state.is_installed(&dep.identifier) {
                dependencies += self.install_package(dep, sink)?.total();
            }
        }
        let upgraded = self.install_files(package, sink)?;
        Ok(Tally::new(usize::from(upgraded), dependencies))
    }

    /// Remove the files of the recorded version.
    ///
    /// `Unknown` installs are refused since there is no telling which files
    /// belong to the package.
    pub fn uninstall(&mut self, reference: &str, sink: &mut dyn ReportSink) -> Result<Tally> {
        let catalog = Arc::clone(&self.catalog);
        let package = catalog.resolve(reference)?;
        let name = package.name.clone();

        let version = match self.state.get(&package.identifier) {
            None => {
                sink.notice(Notice::NothingToUninstall { name });
                return Ok(Tally::NONE);
            }
            Some(InstalledState::Unknown) => {
                sink.notice(Notice::UnknownVersionUninstall { name });
                return Ok(Tally::NONE);
            }
            Some(InstalledState::Version(v)) => v.clone(),
        };

        // Only the files declared by the recorded release are removed
        let key = package.binary_key(self.ctx.target);
        let binary = package
            .release(&version)
            .and_then(|r| r.binary(key))
            .ok_or_else(|| RepoError::NotFound(format!("{name} {version}")))?;

        let dir = self.ctx.install_dir(package);
        for file in binary.hash.keys() {
            fs::remove_file(dir.join(file))?;
        }

        self.state.remove(&package.identifier);
        info!(package = %package.identifier, %version, "uninstalled");
        sink.notice(Notice::Uninstalled { name, version });
        Ok(Tally::new(1, 0))
    }
}
