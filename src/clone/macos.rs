//! Native cloning on macOS via `clonefileat(2)`.
//!
//! APFS volumes clone whole files in a single call. The call refuses to
//! overwrite, so an existing destination is removed first; rerunning a
//! clone therefore replaces the destination instead of failing.

use std::ffi::CString;
use std::io;
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::capability::{self, CapabilityState};
use super::{CloneBackend, CloneError, CloneOutcome};

/// Do not follow a symlink in the source position; clone the link itself.
const CLONE_NOFOLLOW: u32 = 0x0001;

extern "C" {
    // https://www.manpagez.com/man/2/clonefileat/
    fn clonefileat(
        src_dirfd: c_int,
        src: *const c_char,
        dst_dirfd: c_int,
        dst: *const c_char,
        flags: u32,
    ) -> c_int;
}

/// Clone backend for macOS.
///
/// Consults the process-wide [`capability::current`] state on first use
/// unless a state was injected with [`NativeCloneBackend::with_capability`].
#[derive(Debug, Default)]
pub struct NativeCloneBackend {
    capability: Option<CapabilityState>,
}

impl NativeCloneBackend {
    /// Backend gated on the process-wide capability.
    #[must_use]
    pub fn new() -> Self {
        Self { capability: None }
    }

    /// Backend gated on an explicit capability state.
    #[must_use]
    pub fn with_capability(capability: CapabilityState) -> Self {
        Self {
            capability: Some(capability),
        }
    }

    fn capability(&self) -> &CapabilityState {
        self.capability
            .as_ref()
            .unwrap_or_else(|| capability::current())
    }
}

impl CloneBackend for NativeCloneBackend {
    fn name(&self) -> &'static str {
        "clonefile"
    }

    fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome {
        self.capability().ensure()?;

        remove_existing_file(dest)?;

        let src = cstr(source)?;
        let dst = cstr(dest)?;

        // SAFETY: both pointers come from live CStrings; AT_FDCWD resolves
        // relative paths against the working directory.
        let ret = unsafe {
            clonefileat(
                libc::AT_FDCWD,
                src.as_ptr(),
                libc::AT_FDCWD,
                dst.as_ptr(),
                CLONE_NOFOLLOW,
            )
        };

        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOTSUP) {
            Err(CloneError::unsupported(format!(
                "{} does not support clonefile",
                dest.display()
            )))
        } else {
            Err(CloneError::Os {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
                source: err,
            })
        }
    }
}

/// Remove `dest` when it is an existing regular file.
fn remove_existing_file(dest: &Path) -> Result<(), CloneError> {
    match std::fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_file() => {
            log::trace!("Removing existing destination {}", dest.display());
            std::fs::remove_file(dest).map_err(|e| CloneError::from_io(dest, e))
        }
        _ => Ok(()),
    }
}

fn cstr(path: &Path) -> Result<CString, CloneError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| CloneError::PathEncoding(path.to_path_buf()))
}
