//! Block cloning on Windows via `FSCTL_DUPLICATE_EXTENTS_TO_FILE`.
//!
//! ReFS and Dev Drive volumes share byte ranges between files with one
//! device-control request per range. Ranges must begin and end on a cluster
//! boundary, so the file is walked with [`clone_in_regions`].
//!
//! See <https://learn.microsoft.com/windows/win32/fileio/block-cloning>.

use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};
use std::ptr;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::IO::DeviceIoControl;

use super::capability::{self, CapabilityState};
use super::regions::{clone_in_regions, RegionFailure};
use super::{CloneBackend, CloneError, CloneOutcome};

/// Control code of the block-clone request.
///
/// <https://learn.microsoft.com/windows/win32/api/winioctl/ni-winioctl-fsctl_duplicate_extents_to_file>
const FSCTL_DUPLICATE_EXTENTS_TO_FILE: u32 = 623_428;

const ERROR_INVALID_FUNCTION: i32 = 1;
const ERROR_NOT_SUPPORTED: i32 = 50;

/// Input record of `FSCTL_DUPLICATE_EXTENTS_TO_FILE`.
///
/// Field order and widths match `DUPLICATE_EXTENTS_DATA` from `winioctl.h`.
/// <https://learn.microsoft.com/windows/win32/api/winioctl/ns-winioctl-duplicate_extents_data>
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct DuplicateExtentsData {
    file_handle: HANDLE,
    source_file_offset: i64,
    target_file_offset: i64,
    byte_count: i64,
}

/// Clone backend for Windows.
#[derive(Debug, Default)]
pub struct BlockCloneBackend {
    capability: Option<CapabilityState>,
}

impl BlockCloneBackend {
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

    /// Clone the content of `source` into `dest`, both already open.
    ///
    /// `source` needs read access and `dest` write access. The destination
    /// is resized to the source length first.
    ///
    /// # Errors
    ///
    /// Returns `AlignmentFailure` when the smallest region still fails, or
    /// `Unsupported` when the volume has no block cloning.
    pub fn clone_handles(&self, source: &File, dest: &File) -> CloneOutcome {
        self.clone_files(source, dest, Path::new("<destination handle>"))
    }

    fn clone_files(&self, source: &File, dest: &File, dest_path: &Path) -> CloneOutcome {
        self.capability().ensure()?;

        let size = source
            .metadata()
            .map_err(|e| CloneError::from_io(dest_path, e))?
            .len();
        dest.set_len(size)
            .map_err(|e| CloneError::from_io(dest_path, e))?;

        let report = clone_in_regions(size, |offset, len| {
            duplicate_extents(source, dest, offset, len)
        })
        .map_err(|failure| region_error(dest_path, size, failure))?;

        log::trace!(
            "Block-cloned {} bytes into {} with {} requests ({} halvings)",
            size,
            dest_path.display(),
            report.requests,
            report.failed_requests
        );
        Ok(())
    }
}

impl CloneBackend for BlockCloneBackend {
    fn name(&self) -> &'static str {
        "block-clone"
    }

    fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome {
        self.capability().ensure()?;

        let src = File::open(source).map_err(|e| CloneError::from_io(source, e))?;
        let dst = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(dest)
            .map_err(|e| CloneError::from_io(dest, e))?;

        self.clone_files(&src, &dst, dest)
    }
}

/// Issue one block-clone request for `[offset, offset + len)`.
///
/// A range that runs past end-of-file is accepted by the filesystem.
fn duplicate_extents(source: &File, dest: &File, offset: u64, len: u64) -> io::Result<()> {
    let offset = i64::try_from(offset).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
    let len = i64::try_from(len).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

    let request = DuplicateExtentsData {
        file_handle: source.as_raw_handle() as HANDLE,
        source_file_offset: offset,
        target_file_offset: offset,
        byte_count: len,
    };
    let mut bytes_returned = 0u32;

    // SAFETY: `request` outlives the call and its size is passed alongside;
    // no output buffer or overlapped structure is used on a synchronous handle.
    let ok = unsafe {
        DeviceIoControl(
            dest.as_raw_handle() as HANDLE,
            FSCTL_DUPLICATE_EXTENTS_TO_FILE,
            ptr::addr_of!(request).cast::<c_void>(),
            size_of::<DuplicateExtentsData>() as u32,
            ptr::null_mut(),
            0,
            &mut bytes_returned,
            ptr::null_mut(),
        )
    };

    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn region_error(dest: &Path, size: u64, failure: RegionFailure) -> CloneError {
    match failure.source.raw_os_error() {
        Some(ERROR_INVALID_FUNCTION) | Some(ERROR_NOT_SUPPORTED) => CloneError::unsupported(
            format!("volume holding {} has no block cloning", dest.display()),
        ),
        _ => CloneError::AlignmentFailure {
            path: PathBuf::from(dest),
            offset: failure.offset,
            size,
            source: failure.source,
        },
    }
}
