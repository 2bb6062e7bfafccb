//! FFI (Foreign Function Interface) bindings for cross-language interop.
//!
//! This module exposes the reconciliation session through C-compatible
//! functions so native frontends can drive installs without the CLI.
//!
//! # Memory Management
//!
//! - Rust allocates memory and returns pointers to the caller
//! - The calling code MUST call the corresponding `_free` functions to prevent leaks
//! - Strings are null-terminated UTF-8
//!
//! # Usage from C#
//!
//! ```csharp
//! [DllImport("vsdepot_core.dll")]
//! private static extern IntPtr vsdepot_session_open(string catalog, int target, string scripts, string plugins);
//!
//! [DllImport("vsdepot_core.dll")]
//! private static extern int vsdepot_install(IntPtr session, string name, out CCounts counts);
//! ```
//!
//! Status lines produced by an operation are queued on the session and read
//! back with `vsdepot_message_count()` / `vsdepot_message_get()`.

use crate::context::{InstallContext, Target};
use crate::report::{Notice, ReportSink, Tally};
use crate::session::Session;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::error;

// ============================================================================
// C-Compatible Types
// ============================================================================

/// Opaque handle to a session and its queued status lines
pub struct CSession {
    session: Session,
    messages: Vec<String>,
}

/// Counts returned by install, upgrade and uninstall
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct CCounts {
    pub primary: c_int,
    pub dependencies: c_int,
}

impl From<Tally> for CCounts {
    fn from(t: Tally) -> Self {
        Self {
            primary: t.primary as c_int,
            dependencies: t.dependencies as c_int,
        }
    }
}

/// Result code for operations
#[repr(C)]
#[derive(Debug, PartialEq, Eq)]
pub enum CResultCode {
    Success = 0,
    Error = 1,
}

struct MessageQueue<'a>(&'a mut Vec<String>);

impl ReportSink for MessageQueue<'_> {
    fn notice(&mut self, notice: Notice) {
        self.0.push(notice.to_string());
    }
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Open a session over a cached catalog.
/// `target` is 0 for win32 and 1 for win64. Null directories are discovered.
/// Returns null on error. Caller MUST call vsdepot_session_free() when done.
#[no_mangle]
pub extern "C" fn vsdepot_session_open(
    catalog_path: *const c_char,
    target: c_int,
    script_dir: *const c_char,
    plugin_dir: *const c_char,
) -> *mut CSession {
    let Some(catalog_path) = c_str(catalog_path) else {
        return ptr::null_mut();
    };
    let target = match target {
        0 => Target::Win32,
        1 => Target::Win64,
        _ => return ptr::null_mut(),
    };

    let ctx = match (c_str(script_dir), c_str(plugin_dir)) {
        (Some(scripts), Some(plugins)) => InstallContext::new(target, scripts, plugins),
        (scripts, plugins) => match InstallContext::discover(target, false) {
            Ok(mut ctx) => {
                if let Some(dir) = scripts {
                    ctx.script_dir = PathBuf::from(dir);
                }
                if let Some(dir) = plugins {
                    ctx.plugin_dir = PathBuf::from(dir);
                }
                ctx
            }
            Err(e) => {
                error!("Error discovering install directories: {:#}", e);
                return ptr::null_mut();
            }
        },
    };

    match Session::open(Path::new(catalog_path), ctx) {
        Ok(session) => Box::into_raw(Box::new(CSession {
            session,
            messages: Vec::new(),
        })),
        Err(e) => {
            error!("Error opening session: {:#}", e);
            ptr::null_mut()
        }
    }
}

/// Free a session returned by vsdepot_session_open().
#[no_mangle]
pub extern "C" fn vsdepot_session_free(session: *mut CSession) {
    if !session.is_null() {
        unsafe {
            let _ = Box::from_raw(session);
        }
    }
}

// ============================================================================
// Package Operations
// ============================================================================

/// Install a package and its missing dependencies.
#[no_mangle]
pub extern "C" fn vsdepot_install(
    session: *mut CSession,
    name: *const c_char,
    counts: *mut CCounts,
) -> CResultCode {
    run_operation(session, name, counts, |s, name, sink| s.install(name, sink))
}

/// Upgrade a package, or every installed package when `name` is "all".
/// Non-zero `force` replaces files of unknown versions.
#[no_mangle]
pub extern "C" fn vsdepot_upgrade(
    session: *mut CSession,
    name: *const c_char,
    force: c_int,
    counts: *mut CCounts,
) -> CResultCode {
    run_operation(session, name, counts, |s, name, sink| {
        s.upgrade(name, force != 0, sink)
    })
}

/// Uninstall a package.
#[no_mangle]
pub extern "C" fn vsdepot_uninstall(
    session: *mut CSession,
    name: *const c_char,
    counts: *mut CCounts,
) -> CResultCode {
    run_operation(session, name, counts, |s, name, sink| s.uninstall(name, sink))
}

/// Installed version of a package ("Unknown" for unrecognised files).
/// Returns null when the package is absent or unknown to the catalog.
/// Caller MUST call vsdepot_free_string() when done.
#[no_mangle]
pub extern "C" fn vsdepot_installed_version(
    session: *const CSession,
    name: *const c_char,
) -> *mut c_char {
    if session.is_null() {
        return ptr::null_mut();
    }
    let Some(name) = c_str(name) else {
        return ptr::null_mut();
    };

    let session = unsafe { &(*session).session };
    match session.catalog().resolve(name) {
        Ok(package) => match session.state().get(&package.identifier) {
            Some(state) => string_to_c_char(&state.to_string()),
            None => ptr::null_mut(),
        },
        Err(_) => ptr::null_mut(),
    }
}

// ============================================================================
// Status Messages
// ============================================================================

/// Get the number of queued status lines.
#[no_mangle]
pub extern "C" fn vsdepot_message_count(session: *const CSession) -> c_int {
    if session.is_null() {
        return 0;
    }
    let session = unsafe { &*session };
    session.messages.len() as c_int
}

/// Get a queued status line.
/// Caller MUST call vsdepot_free_string() when done.
#[no_mangle]
pub extern "C" fn vsdepot_message_get(session: *const CSession, index: c_int) -> *mut c_char {
    if session.is_null() || index < 0 {
        return ptr::null_mut();
    }
    let session = unsafe { &*session };
    match session.messages.get(index as usize) {
        Some(message) => string_to_c_char(message),
        None => ptr::null_mut(),
    }
}

/// Drop all queued status lines.
#[no_mangle]
pub extern "C" fn vsdepot_clear_messages(session: *mut CSession) {
    if !session.is_null() {
        let session = unsafe { &mut *session };
        session.messages.clear();
    }
}

// ============================================================================
// String Management
// ============================================================================

/// Free a string returned by FFI functions.
#[no_mangle]
pub extern "C" fn vsdepot_free_string(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            let _ = CString::from_raw(s);
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn run_operation(
    session: *mut CSession,
    name: *const c_char,
    counts: *mut CCounts,
    op: impl FnOnce(&mut Session, &str, &mut dyn ReportSink) -> crate::Result<Tally>,
) -> CResultCode {
    if session.is_null() {
        return CResultCode::Error;
    }
    let Some(name) = c_str(name) else {
        return CResultCode::Error;
    };

    let handle = unsafe { &mut *session };
    let mut sink = MessageQueue(&mut handle.messages);
    match op(&mut handle.session, name, &mut sink) {
        Ok(tally) => {
            if !counts.is_null() {
                unsafe {
                    *counts = tally.into();
                }
            }
            CResultCode::Success
        }
        Err(e) => {
            error!("Error running operation for {}: {}", name, e);
            handle.messages.push(e.to_string());
            CResultCode::Error
        }
    }
}

fn c_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s).to_str().ok() }
}

fn string_to_c_char(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(c_str) => c_str.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}
