//! Size and fingerprint partitions of the candidate list.
//!
//! # Overview
//!
//! Files of different sizes cannot share content, so candidates are first
//! partitioned by exact size ([`group_by_size`]). Only the members of size
//! groups with two or more files are hashed, and each such group is then
//! partitioned by fingerprint ([`group_by_fingerprint`]).
//!
//! Both partitions keep traversal order: members appear in the order they
//! were given, and groups appear in the order their first member was seen.
//! Singleton groups are pruned, and empty files are never grouped since
//! cloning them reclaims nothing.
//!
//! # Example
//!
//! ```
//! use cowdupe::dedup::group_by_size;
//! use cowdupe::scanner::FileCandidate;
//!
//! let files = vec![
//!     FileCandidate::new("/file1.txt", 1024),
//!     FileCandidate::new("/file2.txt", 1024),
//!     FileCandidate::new("/file3.txt", 2048),
//! ];
//!
//! let (groups, stats) = group_by_size(files);
//!
//! assert_eq!(stats.total_files, 3);
//! assert_eq!(stats.potential_duplicates, 2);
//! assert_eq!(groups.len(), 1);
//! assert_eq!(groups[0].size, 1024);
//! ```

use std::collections::HashMap;

use crate::scanner::{FileCandidate, Fingerprint};

/// Files sharing one exact size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeGroup {
    /// File size in bytes (shared by all files in this group)
    pub size: u64,
    /// Files with this exact size, in traversal order
    pub files: Vec<FileCandidate>,
}

impl SizeGroup {
    /// Create an empty size group.
    #[must_use]
    pub fn new(size: u64) -> Self {
        Self {
            size,
            files: Vec::new(),
        }
    }

    /// Add a file to this group.
    ///
    /// # Panics
    ///
    /// Debug assertion fails if file size doesn't match group size.
    pub fn add(&mut self, file: FileCandidate) {
        debug_assert_eq!(
            file.size, self.size,
            "File size {} doesn't match group size {}",
            file.size, self.size
        );
        self.files.push(file);
    }

    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Check if this group has potential duplicates (2+ files).
    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        self.files.len() > 1
    }
}

/// Files sharing one size and one content fingerprint.
///
/// The first member is the canonical source; every other member is a clone
/// destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashGroup {
    /// Content fingerprint shared by all members
    pub fingerprint: Fingerprint,
    /// File size in bytes shared by all members
    pub size: u64,
    /// Members in traversal order
    pub files: Vec<FileCandidate>,
}

impl HashGroup {
    /// Number of files in this group.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Check if this group is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// The clone source of this group.
    #[must_use]
    pub fn canonical(&self) -> Option<&FileCandidate> {
        self.files.first()
    }

    /// Members that will be replaced by clones of [`canonical`](Self::canonical).
    #[must_use]
    pub fn destinations(&self) -> &[FileCandidate] {
        self.files.get(1..).unwrap_or_default()
    }

    /// Bytes that stop being stored separately once every destination is cloned.
    #[must_use]
    pub fn reclaimable(&self) -> u64 {
        self.size * self.destinations().len() as u64
    }
}

/// Statistics from the size partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupingStats {
    /// Total number of files processed
    pub total_files: usize,
    /// Total size of all files in bytes
    pub total_size: u64,
    /// Number of distinct non-zero sizes
    pub unique_sizes: usize,
    /// Number of files in groups of 2+
    pub potential_duplicates: usize,
    /// Number of files eliminated as unique (singleton groups)
    pub eliminated_unique: usize,
    /// Number of empty files skipped
    pub empty_files: usize,
    /// Number of size groups with 2+ files
    pub duplicate_groups: usize,
}

impl GroupingStats {
    /// Percentage of files eliminated by size grouping.
    #[must_use]
    pub fn elimination_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.eliminated_unique as f64 / self.total_files as f64) * 100.0
        }
    }
}

/// Partition files by exact size, pruning singletons and empty files.
///
/// No file I/O is performed.
#[must_use]
pub fn group_by_size(
    files: impl IntoIterator<Item = FileCandidate>,
) -> (Vec<SizeGroup>, GroupingStats) {
    let mut groups: Vec<SizeGroup> = Vec::new();
    let mut index: HashMap<u64, usize> = HashMap::new();
    let mut stats = GroupingStats::default();

    for file in files {
        stats.total_files += 1;
        stats.total_size += file.size;

        if file.size == 0 {
            stats.empty_files += 1;
            log::debug!("Empty file encountered: {}", file.path.display());
            continue;
        }

        let slot = *index.entry(file.size).or_insert_with(|| {
            groups.push(SizeGroup::new(file.size));
            groups.len() - 1
        });
        groups[slot].add(file);
    }

    if stats.empty_files > 0 {
        log::debug!("Skipped {} empty file(s)", stats.empty_files);
    }

    stats.unique_sizes = groups.len();

    groups.retain(|group| {
        if group.has_duplicates() {
            stats.potential_duplicates += group.len();
            stats.duplicate_groups += 1;
            log::debug!(
                "Size group {} bytes: {} potential duplicates",
                group.size,
                group.len()
            );
            true
        } else {
            stats.eliminated_unique += 1;
            log::trace!(
                "Eliminated unique size {}: {}",
                group.size,
                group.files[0].path.display()
            );
            false
        }
    });

    log::info!(
        "Size grouping: {} files → {} potential duplicates ({:.1}% eliminated)",
        stats.total_files,
        stats.potential_duplicates,
        stats.elimination_rate()
    );

    (groups, stats)
}

/// Partition the hashed members of one size group by fingerprint, pruning
/// singletons.
#[must_use]
pub fn group_by_fingerprint(
    size: u64,
    hashed: impl IntoIterator<Item = (FileCandidate, Fingerprint)>,
) -> Vec<HashGroup> {
    let mut groups: Vec<HashGroup> = Vec::new();
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();

    for (file, fingerprint) in hashed {
        match index.get(&fingerprint) {
            Some(&slot) => groups[slot].files.push(file),
            None => {
                index.insert(fingerprint.clone(), groups.len());
                groups.push(HashGroup {
                    fingerprint,
                    size,
                    files: vec![file],
                });
            }
        }
    }

    groups.retain(|group| group.len() > 1);
    for group in &groups {
        log::debug!(
            "Hash group {}: {} files, {} bytes each",
            group.fingerprint.short(),
            group.len(),
            group.size
        );
    }
    groups
}
