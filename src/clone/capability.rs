//! Clone capability detection.
//!
//! # Overview
//!
//! Whether the clone mechanism is usable is decided once per process and
//! cached in a [`OnceLock`]. The decision differs per platform:
//!
//! - **macOS**: `clonefile` appeared in macOS 10.12 Sierra (Darwin 16). The
//!   `kern.osrelease` sysctl is read and its major component compared
//!   against [`MIN_DARWIN_MAJOR`].
//! - **Windows**: block cloning is assumed present; the ioctl itself reports
//!   volumes that cannot clone.
//! - **Other**: never supported.
//!
//! [`check_supported`] goes one step further and clones a throwaway file
//! pair inside a real directory, which is the only way to learn whether a
//! particular volume can clone.
//!
//! # Example
//!
//! ```no_run
//! use cowdupe::clone::capability;
//! use std::path::Path;
//!
//! if !capability::is_supported() {
//!     eprintln!("cloning unavailable: {:?}", capability::current().reason);
//! }
//!
//! // Probe the volume holding ~/Downloads.
//! let supported = capability::check_supported(Path::new("/Users/me/Downloads")).unwrap_or(false);
//! ```

use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;

use super::{platform_backend, CloneBackend, CloneError};

/// First Darwin major release that ships `clonefile` (macOS 10.12 Sierra).
///
/// | `kern.osrelease` | Release |
/// |------------------|---------|
/// | 17.x.x | macOS 10.13 High Sierra |
/// | 16.x.x | macOS 10.12 Sierra |
/// | 15.x.x | OS X 10.11 El Capitan |
pub const MIN_DARWIN_MAJOR: u32 = 16;

/// Bytes written into the probe source so the probe clones a real extent.
const PROBE_PAYLOAD_SIZE: usize = 4 * 1024;

static CAPABILITY: OnceLock<CapabilityState> = OnceLock::new();

/// Whether cloning is usable in this process, and why not when it isn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityState {
    /// True when clone calls may be attempted
    pub supported: bool,
    /// Explanation when `supported` is false
    pub reason: Option<String>,
}

impl CapabilityState {
    /// A state that allows clone attempts.
    #[must_use]
    pub fn supported() -> Self {
        Self {
            supported: true,
            reason: None,
        }
    }

    /// A state that refuses clone attempts for the given reason.
    #[must_use]
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self {
            supported: false,
            reason: Some(reason.into()),
        }
    }

    /// Evaluate the capability for the running OS, bypassing the cache.
    #[must_use]
    pub fn detect() -> Self {
        detect_platform()
    }

    /// Fail with [`CloneError::Unsupported`] unless cloning is allowed.
    ///
    /// # Errors
    ///
    /// Returns `CloneError::Unsupported` carrying the recorded reason.
    pub fn ensure(&self) -> Result<(), CloneError> {
        if self.supported {
            Ok(())
        } else {
            Err(CloneError::unsupported(
                self.reason
                    .clone()
                    .unwrap_or_else(|| "clone is not supported".to_string()),
            ))
        }
    }
}

/// The process-wide capability, computed on first call.
///
/// Call this before entering any parallel section so the single
/// initialization happens on one thread.
pub fn current() -> &'static CapabilityState {
    CAPABILITY.get_or_init(|| {
        let state = CapabilityState::detect();
        match &state.reason {
            None => log::debug!("Copy-on-write cloning available"),
            Some(reason) => log::debug!("Copy-on-write cloning unavailable: {}", reason),
        }
        state
    })
}

/// Whether the cached capability allows clone attempts.
#[must_use]
pub fn is_supported() -> bool {
    current().supported
}

/// Decide from a Darwin `kern.osrelease` string (`major.minor.patch`)
/// whether `clonefile` exists.
///
/// A string with fewer than two components or a non-numeric major is
/// treated as unsupported.
///
/// ```
/// use cowdupe::clone::capability::release_supports_clone;
///
/// assert!(!release_supports_clone("15.6.0"));
/// assert!(release_supports_clone("16.0.0"));
/// assert!(release_supports_clone("21.4.0"));
/// ```
#[must_use]
pub fn release_supports_clone(release: &str) -> bool {
    let release = release.trim_end_matches('\0').trim();
    let parts: Vec<&str> = release.split('.').collect();
    if parts.len() < 2 {
        return false;
    }

    parts[0]
        .parse::<u32>()
        .is_ok_and(|major| major >= MIN_DARWIN_MAJOR)
}

/// Probe cloning on the volume holding `dir` with the platform backend.
///
/// See [`check_supported_with`].
///
/// # Errors
///
/// Returns an error when the probe files cannot be created or the clone
/// fails for a reason other than missing support. Callers that cannot
/// probe should treat the volume as unsupported.
pub fn check_supported(dir: &Path) -> Result<bool, CloneError> {
    let backend = platform_backend();
    check_supported_with(backend.as_ref(), dir)
}

/// Probe cloning on the volume holding `dir` through `backend`.
///
/// Two temporary files (`src*`, `dst*`) are created in `dir`, the first is
/// cloned onto the second, and both are removed on every exit path,
/// including a panic inside the backend.
///
/// Returns `Ok(true)` when the clone succeeded and `Ok(false)` when the
/// backend reported [`CloneError::Unsupported`].
///
/// # Errors
///
/// Returns an error when `dir` is not writable or the clone failed for any
/// other reason.
pub fn check_supported_with(backend: &dyn CloneBackend, dir: &Path) -> Result<bool, CloneError> {
    let mut src = tempfile::Builder::new()
        .prefix("src")
        .tempfile_in(dir)
        .map_err(|e| CloneError::from_io(dir, e))?;
    if let Err(e) = write_payload(src.as_file_mut()) {
        return Err(CloneError::from_io(src.path(), e));
    }
    let src = src.into_temp_path();

    let dst = tempfile::Builder::new()
        .prefix("dst")
        .tempfile_in(dir)
        .map_err(|e| CloneError::from_io(dir, e))?
        .into_temp_path();

    log::debug!(
        "Probing {} clone support in {}",
        backend.name(),
        dir.display()
    );

    match backend.clone_path(&src, &dst) {
        Ok(()) => Ok(true),
        Err(e) if e.is_unsupported() => {
            log::debug!("Clone probe in {}: {}", dir.display(), e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

fn write_payload(file: &mut std::fs::File) -> std::io::Result<()> {
    file.write_all(&[0x5a; PROBE_PAYLOAD_SIZE])?;
    file.sync_all()
}

#[cfg(target_os = "macos")]
fn detect_platform() -> CapabilityState {
    match darwin_release() {
        Ok(release) if release_supports_clone(&release) => CapabilityState::supported(),
        Ok(release) => CapabilityState::unsupported(format!(
            "Darwin {release} predates clonefile, macOS 10.12 Sierra or newer required"
        )),
        Err(e) => CapabilityState::unsupported(format!("cannot read kern.osrelease: {e}")),
    }
}

#[cfg(windows)]
fn detect_platform() -> CapabilityState {
    CapabilityState::supported()
}

#[cfg(not(any(target_os = "macos", windows)))]
fn detect_platform() -> CapabilityState {
    CapabilityState::unsupported(format!(
        "no clone mechanism on {}",
        std::env::consts::OS
    ))
}

/// Read `kern.osrelease`, e.g. `"21.4.0"`.
#[cfg(target_os = "macos")]
fn darwin_release() -> std::io::Result<String> {
    let name = c"kern.osrelease";
    let mut len: libc::size_t = 0;

    // SAFETY: a null output buffer asks sysctlbyname for the required length.
    let ret = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            std::ptr::null_mut(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut buf = vec![0u8; len];
    // SAFETY: `buf` holds `len` writable bytes and `len` reports its size.
    let ret = unsafe {
        libc::sysctlbyname(
            name.as_ptr(),
            buf.as_mut_ptr().cast(),
            &mut len,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }

    buf.truncate(len);
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::path::Path;
    use tempfile::TempDir;

    use crate::clone::{CloneOutcome, UnsupportedBackend};

    struct CopyBackend;

    impl CloneBackend for CopyBackend {
        fn name(&self) -> &'static str {
            "copy"
        }

        fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome {
            std::fs::copy(source, dest)
                .map(|_| ())
                .map_err(|e| CloneError::from_io(dest, e))
        }
    }

    struct FailingBackend;

    impl CloneBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome {
            Err(CloneError::Os {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
                source: std::io::Error::other("EXDEV"),
            })
        }
    }

    struct PanickingBackend;

    impl CloneBackend for PanickingBackend {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn clone_path(&self, _source: &Path, _dest: &Path) -> CloneOutcome {
            panic!("backend blew up");
        }
    }

    fn entries(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[test]
    fn test_release_scenarios() {
        assert!(!release_supports_clone("15.6.0"));
        assert!(release_supports_clone("16.0.0"));
        assert!(release_supports_clone("21.4.0"));
    }

    #[test]
    fn test_release_with_trailing_nul() {
        assert!(release_supports_clone("22.1.0\0"));
        assert!(!release_supports_clone("10.8.0\0"));
    }

    #[test]
    fn test_release_parse_failures() {
        assert!(!release_supports_clone(""));
        assert!(!release_supports_clone("16"));
        assert!(!release_supports_clone("sixteen.0.0"));
        assert!(!release_supports_clone("-16.0.0"));
    }

    #[test]
    fn test_state_ensure() {
        assert!(CapabilityState::supported().ensure().is_ok());

        let err = CapabilityState::unsupported("too old").ensure().unwrap_err();
        assert!(err.is_unsupported());
        assert!(err.to_string().contains("too old"));
    }

    #[test]
    fn test_current_is_memoized() {
        let first = current() as *const CapabilityState;
        let second = current() as *const CapabilityState;
        assert_eq!(first, second);
        assert_eq!(is_supported(), current().supported);
    }

    #[test]
    fn test_detect_matches_platform() {
        let state = CapabilityState::detect();
        if cfg!(windows) {
            assert!(state.supported);
        } else if !cfg!(target_os = "macos") {
            assert!(!state.supported);
            assert!(state.reason.is_some());
        }
    }

    #[test]
    fn test_probe_success_leaves_no_residue() {
        let dir = TempDir::new().unwrap();
        assert!(check_supported_with(&CopyBackend, dir.path()).unwrap());
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_probe_unsupported_is_false() {
        let dir = TempDir::new().unwrap();
        assert!(!check_supported_with(&UnsupportedBackend, dir.path()).unwrap());
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_probe_failure_is_error_without_residue() {
        let dir = TempDir::new().unwrap();
        let err = check_supported_with(&FailingBackend, dir.path()).unwrap_err();
        assert!(matches!(err, CloneError::Os { .. }));
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_probe_panic_leaves_no_residue() {
        let dir = TempDir::new().unwrap();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            check_supported_with(&PanickingBackend, dir.path())
        }));
        assert!(result.is_err());
        assert_eq!(entries(&dir), 0);
    }

    #[test]
    fn test_probe_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does-not-exist");
        let err = check_supported_with(&CopyBackend, &missing).unwrap_err();
        assert!(matches!(err, CloneError::NotFound(_)));
    }
}
