//! Content-addressed deduplication.
//!
//! - [`groups`]: size and fingerprint partitions
//! - [`orchestrator`]: the [`Deduplicator`] pipeline that hashes groups and
//!   replaces duplicates with clones

pub mod groups;
pub mod orchestrator;

pub use groups::{group_by_fingerprint, group_by_size, GroupingStats, HashGroup, SizeGroup};
pub use orchestrator::{DedupConfig, DedupError, DedupSummary, Deduplicator, DEFAULT_IO_THREADS};
