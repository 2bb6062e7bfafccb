//! VSDepot Core Library
//!
//! Package state reconciliation for third-party VapourSynth plugins and scripts.
//!
//! # Architecture
//!
//! This library is consumed by the `vsdepot` command line tool and, via FFI,
//! by native frontends:
//! - **Rust / CLI**: `Session` directly
//! - **Native UIs**: C ABI in the `ffi` module (cdylib / staticlib)
//!
//! # Core Features Implemented
//!
//! ## Catalog (`catalog` module)
//! - `Catalog::load()` - Read the cached `vspackages.json` definitions
//! - `Catalog::resolve()` - Find a package by identifier, namespace, module or name
//!
//! ## State Detection (`state` module)
//! - `detect()` - Rederive what is installed by hashing files on disk
//! - `InstalledStateTable` - Package -> installed version or `Unknown`
//!
//! ## Package Management (`session` module)
//! - `Session::install()` - Install a package after its dependencies
//! - `Session::upgrade()` - Replace outdated installs, or `all` of them
//! - `Session::uninstall()` - Remove the files of the detected version
//!
//! ## Payload Handling (`materialize`, `fetch`, `archive` modules)
//! - Hash-verified writes of direct downloads and 7-Zip archive members
//! - Per-session URL cache so shared dependencies download once
//!
//! ## Reporting (`report` module)
//! - `Notice` status lines, `Tally` counts, summaries and status listings
//!
//! ## Catalog Refresh (`refresh` module)
//! - `refresh_catalog()` - Conditional download of the definitions file

pub mod archive;
pub mod catalog;
pub mod context;
pub mod error;
pub mod ffi;
pub mod fetch;
pub mod hash;
pub mod materialize;
pub mod refresh;
pub mod report;
pub mod session;
pub mod state;

pub use catalog::{BinaryDescriptor, Catalog, Package, PackageType, Release};
pub use context::{InstallContext, Target};
pub use error::{RepoError, Result};
pub use report::{Notice, ReportSink, Tally};
pub use session::Session;
pub use state::{InstalledState, InstalledStateTable};
