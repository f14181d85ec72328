//! Copy-on-write clone backends.
//!
//! # Overview
//!
//! A [`CloneBackend`] makes a destination file share physical storage with a
//! source file. Exactly one backend is compiled in for each target:
//!
//! | Platform | Backend | Mechanism |
//! |----------|---------|-----------|
//! | macOS | [`NativeCloneBackend`] | `clonefileat(2)`, gated on the Darwin release |
//! | Windows | [`BlockCloneBackend`] | `FSCTL_DUPLICATE_EXTENTS_TO_FILE`, adaptive region size |
//! | Other | [`UnsupportedBackend`] | always fails with [`CloneError::Unsupported`] |
//!
//! Callers depend only on the trait; [`platform_backend`] picks the
//! implementation for the current build.
//!
//! # Example
//!
//! ```no_run
//! use cowdupe::clone::{platform_backend, CloneError};
//! use std::path::Path;
//!
//! let backend = platform_backend();
//! match backend.clone_path(Path::new("a.bin"), Path::new("b.bin")) {
//!     Ok(()) => println!("b.bin now shares storage with a.bin"),
//!     Err(e) if e.is_unsupported() => println!("no COW clones here: {}", e),
//!     Err(e) => eprintln!("clone failed: {}", e),
//! }
//! ```

pub mod capability;
pub mod regions;

#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;

#[cfg(target_os = "macos")]
pub use macos::NativeCloneBackend;
#[cfg(windows)]
pub use windows::BlockCloneBackend;

pub use capability::{check_supported, check_supported_with, is_supported, CapabilityState};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Errors produced by clone backends and the capability probe.
#[derive(thiserror::Error, Debug)]
pub enum CloneError {
    /// Cloning is not available on this OS, kernel, or volume.
    #[error("Copy-on-write clone not supported: {reason}")]
    Unsupported {
        /// Why the clone could not be attempted
        reason: String,
    },

    /// A path involved in the clone does not exist.
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Access to a path involved in the clone was denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// Block cloning could not finish even at the minimum region size.
    #[error("Block clone of {path} stopped at offset {offset} of {size} bytes: {source}")]
    AlignmentFailure {
        /// Destination being cloned into
        path: PathBuf,
        /// First byte that could not be cloned
        offset: u64,
        /// Source length in bytes
        size: u64,
        /// Last error returned for the smallest region
        #[source]
        source: io::Error,
    },

    /// Generic open, read, remove or resize failure.
    #[error("I/O error for {path}: {source}")]
    Io {
        /// Path where the error occurred
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The path cannot be represented in the form the OS call requires.
    #[error("Path cannot be passed to the OS: {0}")]
    PathEncoding(PathBuf),

    /// The clone primitive itself failed.
    #[error("{source}. from {from} to {to}")]
    Os {
        /// Clone source
        from: PathBuf,
        /// Clone destination
        to: PathBuf,
        /// Raw OS error
        #[source]
        source: io::Error,
    },
}

impl CloneError {
    /// Build an `Unsupported` error from any displayable reason.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Map an I/O error on `path` to the matching variant.
    ///
    /// `NotFound` and `PermissionDenied` are surfaced as their own kinds,
    /// everything else is kept as [`CloneError::Io`].
    pub fn from_io(path: &Path, error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                source: error,
            },
        }
    }

    /// Whether this error means cloning is unavailable, as opposed to a
    /// failure of one particular clone.
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Result of one clone call: `Ok(())` on success, the error kind otherwise.
pub type CloneOutcome = Result<(), CloneError>;

/// A platform mechanism that turns `dest` into a copy-on-write clone of
/// `source`.
///
/// Implementations must not leave `source` modified. After `Ok(())`,
/// reading `dest` yields exactly the bytes of `source` at the time of the
/// call.
pub trait CloneBackend: Send + Sync {
    /// Short name used in log messages.
    fn name(&self) -> &'static str;

    /// Clone `source` onto `dest`, replacing any existing content of `dest`.
    fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome;
}

/// Backend for platforms without a clone mechanism.
///
/// Every call fails with [`CloneError::Unsupported`] and touches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl CloneBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn clone_path(&self, _source: &Path, _dest: &Path) -> CloneOutcome {
        Err(CloneError::unsupported(format!(
            "no clone mechanism on {}-{}",
            std::env::consts::ARCH,
            std::env::consts::OS
        )))
    }
}

/// The backend compiled in for the current target.
#[must_use]
pub fn platform_backend() -> Arc<dyn CloneBackend> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(NativeCloneBackend::new())
    }

    #[cfg(windows)]
    {
        Arc::new(BlockCloneBackend::new())
    }

    #[cfg(not(any(target_os = "macos", windows)))]
    {
        Arc::new(UnsupportedBackend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_unsupported_backend_fails_without_touching_files() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        fs::write(&src, b"source").unwrap();
        fs::write(&dst, b"destination").unwrap();

        let err = UnsupportedBackend.clone_path(&src, &dst).unwrap_err();

        assert!(err.is_unsupported());
        assert_eq!(fs::read(&src).unwrap(), b"source");
        assert_eq!(fs::read(&dst).unwrap(), b"destination");
    }

    #[test]
    fn test_unsupported_backend_missing_paths() {
        let err = UnsupportedBackend
            .clone_path(Path::new("/no/such/src"), Path::new("/no/such/dst"))
            .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let path = Path::new("/x");
        let err = CloneError::from_io(path, io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, CloneError::NotFound(p) if p == path));

        let err = CloneError::from_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, CloneError::PermissionDenied(_)));

        let err = CloneError::from_io(path, io::Error::other("disk on fire"));
        assert!(matches!(err, CloneError::Io { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = CloneError::Os {
            from: PathBuf::from("/a"),
            to: PathBuf::from("/b"),
            source: io::Error::other("EXDEV"),
        };
        assert_eq!(err.to_string(), "EXDEV. from /a to /b");

        let err = CloneError::unsupported("kernel too old");
        assert_eq!(
            err.to_string(),
            "Copy-on-write clone not supported: kernel too old"
        );
        assert!(!CloneError::PathEncoding(PathBuf::from("/a")).is_unsupported());
    }

    #[test]
    fn test_backend_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn CloneBackend>();
    }
}
