//! Adaptive region sizing for block cloning.
//!
//! # Overview
//!
//! Block-cloning requests must begin and end on storage-cluster boundaries,
//! and a single request is limited in size. [`clone_in_regions`] walks a
//! file of known length in steps of a region size that starts at
//! [`INITIAL_REGION_SIZE`] and halves whenever a request fails, down to
//! [`MIN_REGION_SIZE`], the smallest cluster size any supported filesystem
//! uses.
//!
//! The offset only advances on success, so a failed step is retried with the
//! next smaller region from the same offset. The walk ends as soon as the
//! offset reaches the file length, whatever region size is in use.
//!
//! A trailing request may extend past end-of-file. The filesystem ignores
//! the overrun, so it is issued as-is and never trimmed.
//!
//! The region logic is platform independent; the Windows backend supplies a
//! closure that issues one `FSCTL_DUPLICATE_EXTENTS_TO_FILE` per step.

use std::io;

/// Region size of the first attempt (1 MiB).
pub const INITIAL_REGION_SIZE: u64 = 1024 * 1024;

/// Smallest region ever attempted (4 KiB, the minimum ReFS cluster).
pub const MIN_REGION_SIZE: u64 = 4 * 1024;

/// Summary of a completed region walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionReport {
    /// Requests that succeeded
    pub requests: usize,
    /// Requests that failed and caused a halving
    pub failed_requests: usize,
    /// Region size in use when the walk finished
    pub final_region_size: u64,
}

/// The walk could not finish even at [`MIN_REGION_SIZE`].
#[derive(Debug)]
pub struct RegionFailure {
    /// First byte that was not cloned
    pub offset: u64,
    /// Error returned by the last request at the smallest region size
    pub source: io::Error,
}

/// Clone `[0, size)` by calling `clone_region(offset, len)` for each step.
///
/// The same offset is used in the source and the destination.
///
/// # Errors
///
/// Returns [`RegionFailure`] when a request at [`MIN_REGION_SIZE`] fails.
///
/// # Example
///
/// ```
/// use cowdupe::clone::regions::{clone_in_regions, INITIAL_REGION_SIZE};
///
/// let mut steps = Vec::new();
/// let report = clone_in_regions(3 * INITIAL_REGION_SIZE / 2, |offset, len| {
///     steps.push((offset, len));
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(report.requests, 2);
/// assert_eq!(steps, vec![(0, INITIAL_REGION_SIZE), (INITIAL_REGION_SIZE, INITIAL_REGION_SIZE)]);
/// ```
pub fn clone_in_regions<F>(size: u64, mut clone_region: F) -> Result<RegionReport, RegionFailure>
where
    F: FnMut(u64, u64) -> io::Result<()>,
{
    let mut report = RegionReport::default();
    let mut region = INITIAL_REGION_SIZE;
    let mut offset = 0u64;

    while offset < size {
        match clone_region(offset, region) {
            Ok(()) => {
                report.requests += 1;
                offset = offset.saturating_add(region);
            }
            Err(source) => {
                report.failed_requests += 1;
                let next = region / 2;
                if next < MIN_REGION_SIZE {
                    return Err(RegionFailure { offset, source });
                }
                log::trace!(
                    "Clone of {} bytes at offset {} failed ({}), retrying with {} bytes",
                    region,
                    offset,
                    source,
                    next
                );
                region = next;
            }
        }
    }

    report.final_region_size = region;
    Ok(report)
}


#[cfg(test)]
mod tests {
    use super::simulated::{pattern, SimulatedVolume};
    use super::*;

    #[test]
    fn test_empty_file_issues_no_requests() {
        let report = clone_in_regions(0, |_, _| panic!("no request expected")).unwrap();
        assert_eq!(report.requests, 0);
        assert_eq!(report.final_region_size, INITIAL_REGION_SIZE);
    }

    #[test]
    fn test_trailing_overrun_is_tolerated() {
        let mut volume = SimulatedVolume::new(pattern(1_048_577), 4096);
        let report = clone_in_regions(1_048_577, |o, l| volume.clone_region(o, l)).unwrap();

        assert_eq!(report.requests, 2);
        assert_eq!(report.failed_requests, 0);
        assert_eq!(volume.calls[1], (1_048_576, INITIAL_REGION_SIZE));
        assert_eq!(volume.dst, volume.src);
    }

    #[test]
    fn test_unaligned_tail_degrades_to_minimum_region() {
        let mut volume = SimulatedVolume::new(pattern(1_048_577), 4096);
        volume.strict_tail = true;

        let report = clone_in_regions(1_048_577, |o, l| volume.clone_region(o, l)).unwrap();

        // 1 MiB succeeds, then 1 MiB .. 8 KiB fail at the tail, 4 KiB succeeds.
        assert_eq!(report.requests, 2);
        assert_eq!(report.failed_requests, 8);
        assert_eq!(report.final_region_size, MIN_REGION_SIZE);
        assert_eq!(volume.calls.last(), Some(&(1_048_576, MIN_REGION_SIZE)));
        assert_eq!(volume.dst, volume.src);
    }

    #[test]
    fn test_request_limit_halves_once_and_keeps_offset() {
        let size = 3 * INITIAL_REGION_SIZE;
        let mut volume = SimulatedVolume::new(pattern(size as usize), 4096);
        volume.max_request = Some(256 * 1024);

        let report = clone_in_regions(size, |o, l| volume.clone_region(o, l)).unwrap();

        assert_eq!(report.failed_requests, 2);
        assert_eq!(report.final_region_size, 256 * 1024);
        assert_eq!(report.requests, 12);
        assert!(volume.calls[..3].iter().all(|&(offset, _)| offset == 0));
        assert_eq!(volume.dst, volume.src);
    }

    #[test]
    fn test_progress_is_kept_across_halving() {
        // Requests are only accepted up to 64 KiB once past the first MiB.
        let size = INITIAL_REGION_SIZE + 100 * 1024;
        let mut volume = SimulatedVolume::new(pattern(size as usize), 4096);
        let mut calls = Vec::new();

        let report = clone_in_regions(size, |offset, len| {
            calls.push((offset, len));
            if offset >= INITIAL_REGION_SIZE && len > 64 * 1024 {
                return Err(io::Error::other("too large here"));
            }
            volume.clone_region(offset, len)
        })
        .unwrap();

        assert_eq!(calls[0], (0, INITIAL_REGION_SIZE));
        assert_eq!(report.final_region_size, 64 * 1024);
        assert_eq!(volume.dst, volume.src);
    }

    #[test]
    fn test_unresolved_failure_reports_offset() {
        let mut attempts = Vec::new();
        let failure = clone_in_regions(10 * 4096, |offset, len| {
            attempts.push((offset, len));
            Err(io::Error::other("not a ReFS volume"))
        })
        .unwrap_err();

        assert_eq!(failure.offset, 0);
        assert_eq!(failure.source.to_string(), "not a ReFS volume");
        let sizes: Vec<u64> = attempts.iter().map(|&(_, len)| len).collect();
        assert_eq!(
            sizes,
            vec![1 << 20, 1 << 19, 1 << 18, 1 << 17, 1 << 16, 1 << 15, 1 << 14, 1 << 13, 1 << 12]
        );
    }

    #[test]
    fn test_failure_after_partial_progress() {
        let size = 2 * INITIAL_REGION_SIZE;
        let failure = clone_in_regions(size, |offset, _| {
            if offset == 0 {
                Ok(())
            } else {
                Err(io::Error::other("volume full"))
            }
        })
        .unwrap_err();

        assert_eq!(failure.offset, INITIAL_REGION_SIZE);
    }
}
