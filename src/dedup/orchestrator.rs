//! The deduplication pipeline.
//!
//! # Phases
//!
//! 1. **Size partition**: candidates grouped by exact size, singletons and
//!    empty files dropped. Metadata only.
//! 2. **Hashing**: every member of a surviving size group is fingerprinted on
//!    a bounded rayon pool; results are consumed in input order, so grouping
//!    does not depend on thread scheduling. A file that cannot be read is
//!    logged and dropped; its group continues without it.
//! 3. **Cloning**: within each hash group the first member is the canonical
//!    source and every other member is replaced by a clone of it. Clone
//!    calls are strictly sequential. The first failure aborts the run.
//!
//! The shutdown flag is checked before each clone call, never during one.
//!
//! # Example
//!
//! ```no_run
//! use cowdupe::clone::platform_backend;
//! use cowdupe::dedup::{DedupConfig, Deduplicator};
//! use cowdupe::scanner::{Walker, WalkerConfig};
//! use std::path::Path;
//!
//! let candidates: Vec<_> = Walker::new(Path::new("."), WalkerConfig::default())
//!     .walk()
//!     .filter_map(Result::ok)
//!     .collect();
//!
//! let dedup = Deduplicator::new(DedupConfig::default(), platform_backend());
//! let summary = dedup.run(candidates).unwrap();
//! println!("{} clones, {} reclaimed", summary.clones, summary.reclaimed_display());
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::groups::{group_by_fingerprint, group_by_size, HashGroup, SizeGroup};
use crate::clone::{CloneBackend, CloneError};
use crate::progress::{ProgressCallback, PHASE_CLONING, PHASE_HASHING};
use crate::scanner::{ContentHasher, FileCandidate, Fingerprint, HashAlgorithm, HashError};

/// Default number of hashing threads.
pub const DEFAULT_IO_THREADS: usize = 4;

type HashResult = (usize, FileCandidate, Result<Fingerprint, HashError>);

/// Configuration for a deduplication run.
#[derive(Clone)]
pub struct DedupConfig {
    /// Number of threads used for hashing.
    pub io_threads: usize,
    /// Digest used for fingerprints.
    pub hash_algorithm: HashAlgorithm,
    /// Plan clones without invoking the backend.
    pub dry_run: bool,
    /// Set to stop the run between clone calls.
    pub shutdown_flag: Option<Arc<AtomicBool>>,
    /// Receives phase and item notifications.
    pub progress_callback: Option<Arc<dyn ProgressCallback>>,
}

impl std::fmt::Debug for DedupConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupConfig")
            .field("io_threads", &self.io_threads)
            .field("hash_algorithm", &self.hash_algorithm)
            .field("dry_run", &self.dry_run)
            .field("shutdown_flag", &self.shutdown_flag)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            io_threads: DEFAULT_IO_THREADS,
            hash_algorithm: HashAlgorithm::default(),
            dry_run: false,
            shutdown_flag: None,
            progress_callback: None,
        }
    }
}

impl DedupConfig {
    /// Set the number of hashing threads (minimum 1).
    #[must_use]
    pub fn with_io_threads(mut self, threads: usize) -> Self {
        self.io_threads = threads.max(1);
        self
    }

    /// Select the fingerprint digest.
    #[must_use]
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Enable or disable dry-run mode.
    #[must_use]
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Set the shutdown flag for graceful termination.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    /// Set the progress callback.
    #[must_use]
    pub fn with_progress_callback(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupSummary {
    /// Candidates handed to the run
    pub candidates: usize,
    /// Size groups with 2+ members
    pub size_groups: usize,
    /// Files successfully fingerprinted
    pub files_hashed: usize,
    /// Files dropped because they could not be hashed
    pub hash_failures: usize,
    /// Hash groups with 2+ members
    pub hash_groups: usize,
    /// Successful clone calls, or planned ones in a dry run
    pub clones: usize,
    /// Bytes shared by the clones
    pub bytes_reclaimed: u64,
    /// Whether this was a dry run
    pub dry_run: bool,
}

impl DedupSummary {
    /// Some files could not be hashed.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.hash_failures > 0
    }

    /// Reclaimed bytes in human-readable form.
    #[must_use]
    pub fn reclaimed_display(&self) -> String {
        bytesize::ByteSize::b(self.bytes_reclaimed).to_string()
    }
}

/// Errors that end a run.
#[derive(thiserror::Error, Debug)]
pub enum DedupError {
    /// A clone call failed; no further clones were attempted.
    #[error("Failed to clone {source_path} to {dest}: {error}")]
    Clone {
        /// Canonical source of the group
        source_path: PathBuf,
        /// Destination that could not be replaced
        dest: PathBuf,
        /// Backend error
        #[source]
        error: CloneError,
    },

    /// The shutdown flag was set.
    #[error("Deduplication interrupted")]
    Interrupted,
}

/// Runs the size → hash → clone pipeline against one backend.
pub struct Deduplicator {
    config: DedupConfig,
    backend: Arc<dyn CloneBackend>,
    hasher: ContentHasher,
}

impl Deduplicator {
    /// Create a deduplicator cloning through `backend`.
    #[must_use]
    pub fn new(config: DedupConfig, backend: Arc<dyn CloneBackend>) -> Self {
        let hasher = ContentHasher::new().with_algorithm(config.hash_algorithm);
        Self {
            config,
            backend,
            hasher,
        }
    }

    /// Deduplicate `candidates`.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::Clone`] on the first failed clone call, and
    /// [`DedupError::Interrupted`] when the shutdown flag is set.
    pub fn run(&self, candidates: Vec<FileCandidate>) -> Result<DedupSummary, DedupError> {
        let mut summary = DedupSummary {
            candidates: candidates.len(),
            dry_run: self.config.dry_run,
            ..Default::default()
        };

        let (size_groups, _) = group_by_size(candidates);
        summary.size_groups = size_groups.len();

        let hash_groups = self.hash_groups(size_groups, &mut summary)?;
        summary.hash_groups = hash_groups.len();

        self.clone_groups(&hash_groups, &mut summary)?;

        log::debug!(
            "{} {} file(s) in {} group(s), {} reclaimed",
            if summary.dry_run { "Would clone" } else { "Cloned" },
            summary.clones,
            summary.hash_groups,
            summary.reclaimed_display()
        );

        Ok(summary)
    }

    /// Fingerprint every member of every size group and regroup by content.
    fn hash_groups(
        &self,
        size_groups: Vec<SizeGroup>,
        summary: &mut DedupSummary,
    ) -> Result<Vec<HashGroup>, DedupError> {
        let jobs: Vec<(usize, FileCandidate)> = size_groups
            .iter()
            .enumerate()
            .flat_map(|(slot, group)| group.files.iter().map(move |f| (slot, f.clone())))
            .collect();

        if jobs.is_empty() {
            log::debug!("Hashing: no candidates share a size");
            return Ok(Vec::new());
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(PHASE_HASHING, jobs.len());
        }
        log::info!("Hashing {} files", jobs.len());

        let results = self.fingerprint_all(jobs);

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(PHASE_HASHING);
        }

        if self.config.is_shutdown_requested() {
            return Err(DedupError::Interrupted);
        }

        let mut per_group: Vec<Vec<(FileCandidate, Fingerprint)>> =
            size_groups.iter().map(|_| Vec::new()).collect();
        for (slot, file, result) in results {
            match result {
                Ok(fingerprint) => {
                    summary.files_hashed += 1;
                    per_group[slot].push((file, fingerprint));
                }
                Err(e) => {
                    summary.hash_failures += 1;
                    log::warn!("Skipping {}: {}", file.path.display(), e);
                }
            }
        }

        Ok(size_groups
            .iter()
            .zip(per_group)
            .flat_map(|(group, hashed)| group_by_fingerprint(group.size, hashed))
            .collect())
    }

    /// Hash `jobs` on the bounded pool, returning results in input order.
    fn fingerprint_all(&self, jobs: Vec<(usize, FileCandidate)>) -> Vec<HashResult> {
        let done = AtomicUsize::new(0);
        let work = || -> Vec<HashResult> {
            jobs.into_par_iter()
                .map(|(slot, file)| {
                    if self.config.is_shutdown_requested() {
                        let interrupted = std::io::Error::from(std::io::ErrorKind::Interrupted);
                        let result = Err(HashError::from_io(&file.path, interrupted));
                        return (slot, file, result);
                    }
                    let result = self.hasher.fingerprint(&file.path);
                    if let Some(ref callback) = self.config.progress_callback {
                        let current = done.fetch_add(1, Ordering::Relaxed) + 1;
                        callback.on_progress(current, file.path.to_string_lossy().as_ref());
                        if result.is_ok() {
                            callback.on_item_completed(file.size);
                        }
                    }
                    (slot, file, result)
                })
                .collect()
        };

        match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.io_threads)
            .build()
        {
            Ok(pool) => pool.install(work),
            Err(e) => {
                log::warn!(
                    "Failed to create hashing pool, using global pool with {} threads: {}",
                    rayon::current_num_threads(),
                    e
                );
                work()
            }
        }
    }

    fn clone_groups(
        &self,
        groups: &[HashGroup],
        summary: &mut DedupSummary,
    ) -> Result<(), DedupError> {
        let total: usize = groups.iter().map(|g| g.destinations().len()).sum();
        if total == 0 {
            return Ok(());
        }

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_start(PHASE_CLONING, total);
            callback.on_message(&format!("{} file(s) in {} group(s)", total, groups.len()));
        }

        let result = self.clone_each(groups, summary);

        if let Some(ref callback) = self.config.progress_callback {
            callback.on_phase_end(PHASE_CLONING);
        }
        result
    }

    fn clone_each(&self, groups: &[HashGroup], summary: &mut DedupSummary) -> Result<(), DedupError> {
        let mut current = 0;

        for group in groups {
            let Some(source) = group.canonical() else {
                continue;
            };

            for dest in group.destinations() {
                if self.config.is_shutdown_requested() {
                    log::info!("Shutdown requested, stopping before {}", dest.path.display());
                    return Err(DedupError::Interrupted);
                }

                current += 1;
                if let Some(ref callback) = self.config.progress_callback {
                    callback.on_progress(current, dest.path.to_string_lossy().as_ref());
                }

                if self.config.dry_run {
                    log::info!(
                        "[dry-run] {} {} > {}",
                        self.backend.name(),
                        source.path.display(),
                        dest.path.display()
                    );
                } else {
                    log::info!(
                        "{} {} > {}",
                        self.backend.name(),
                        source.path.display(),
                        dest.path.display()
                    );
                    self.backend
                        .clone_path(&source.path, &dest.path)
                        .map_err(|error| DedupError::Clone {
                            source_path: source.path.clone(),
                            dest: dest.path.clone(),
                            error,
                        })?;
                }

                summary.clones += 1;
                summary.bytes_reclaimed += group.size;
                if let Some(ref callback) = self.config.progress_callback {
                    callback.on_item_completed(group.size);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clone::{CloneOutcome, UnsupportedBackend};
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every call and copies content so results are observable.
    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl CloneBackend for RecordingBackend {
        fn name(&self) -> &'static str {
            "record"
        }

        fn clone_path(&self, source: &Path, dest: &Path) -> CloneOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((source.to_path_buf(), dest.to_path_buf()));
            fs::copy(source, dest).map_err(|e| CloneError::from_io(dest, e))?;
            Ok(())
        }
    }

    fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> FileCandidate {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        FileCandidate::new(path, content.len() as u64)
    }

    #[test]
    fn test_config_builder() {
        let config = DedupConfig::default()
            .with_io_threads(0)
            .with_dry_run(true)
            .with_hash_algorithm(HashAlgorithm::Blake3);

        assert_eq!(config.io_threads, 1);
        assert!(config.dry_run);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        assert!(!config.is_shutdown_requested());
    }

    #[test]
    fn test_run_empty() {
        let backend = Arc::new(RecordingBackend::default());
        let summary = Deduplicator::new(DedupConfig::default(), backend.clone())
            .run(Vec::new())
            .unwrap();

        assert_eq!(summary, DedupSummary::default());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_empty_files_are_never_cloned() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            create_test_file(dir.path(), "a.txt", b""),
            create_test_file(dir.path(), "b.txt", b""),
        ];

        let backend = Arc::new(RecordingBackend::default());
        let summary = Deduplicator::new(DedupConfig::default(), backend.clone())
            .run(files)
            .unwrap();

        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.size_groups, 0);
        assert_eq!(summary.clones, 0);
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_first_member_is_canonical() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            create_test_file(dir.path(), "c.txt", b"same content"),
            create_test_file(dir.path(), "a.txt", b"same content"),
            create_test_file(dir.path(), "b.txt", b"same content"),
        ];
        let backend = Arc::new(RecordingBackend::default());

        let summary = Deduplicator::new(DedupConfig::default(), backend.clone())
            .run(files)
            .unwrap();

        let calls = backend.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(src, _)| src.ends_with("c.txt")));
        assert!(calls[0].1.ends_with("a.txt"));
        assert!(calls[1].1.ends_with("b.txt"));
        assert_eq!(summary.bytes_reclaimed, 24);
    }

    #[test]
    fn test_unsupported_backend_aborts_with_clone_error() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            create_test_file(dir.path(), "a.txt", b"dup"),
            create_test_file(dir.path(), "b.txt", b"dup"),
        ];

        let err = Deduplicator::new(DedupConfig::default(), Arc::new(UnsupportedBackend))
            .run(files)
            .unwrap_err();

        match err {
            DedupError::Clone {
                source_path,
                dest,
                error,
            } => {
                assert!(source_path.ends_with("a.txt"));
                assert!(dest.ends_with("b.txt"));
                assert!(error.is_unsupported());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_summary_display() {
        let summary = DedupSummary {
            bytes_reclaimed: 2048,
            hash_failures: 1,
            ..Default::default()
        };
        assert!(summary.is_partial());
        assert!(!summary.reclaimed_display().is_empty());
    }
}
