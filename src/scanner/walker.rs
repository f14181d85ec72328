//! Directory walker using jwalk for parallel traversal.
//!
//! # Overview
//!
//! [`Walker`] traverses one or more root directories and yields every regular
//! file that passes the configured filters as a [`FileCandidate`]. Children
//! are sorted by name, so output order is deterministic for a given tree.
//!
//! Filters, in order:
//!
//! - gitignore-style patterns (a root `.gitignore` plus configured patterns)
//! - symlinks, unless `follow_symlinks` is set
//! - the min/max size bounds
//! - repeats: a file whose inode was already yielded (hardlinks, or the same
//!   file reached through overlapping roots) is yielded only once
//!
//! Errors are yielded as [`ScanError`] values instead of ending the walk.

use std::collections::HashSet;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use jwalk::WalkDir;

use super::{FileCandidate, ScanError, WalkerConfig};

/// Directory walker for parallel file discovery.
#[derive(Debug)]
pub struct Walker {
    roots: Vec<PathBuf>,
    config: WalkerConfig,
    shutdown_flag: Option<Arc<AtomicBool>>,
}

impl Walker {
    /// Create a walker for a single root directory.
    #[must_use]
    pub fn new(path: &Path, config: WalkerConfig) -> Self {
        Self::with_roots([path.to_path_buf()], config)
    }

    /// Create a walker over several roots, walked in the given order.
    #[must_use]
    pub fn with_roots(roots: impl IntoIterator<Item = PathBuf>, config: WalkerConfig) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            config,
            shutdown_flag: None,
        }
    }

    /// Stop yielding entries once `flag` is set.
    #[must_use]
    pub fn with_shutdown_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown_flag = Some(flag);
        self
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag
            .as_ref()
            .is_some_and(|f| f.load(Ordering::SeqCst))
    }

    /// Build gitignore matcher from config patterns and the root's .gitignore.
    fn build_gitignore(&self, root: &Path) -> Option<Gitignore> {
        let mut builder = GitignoreBuilder::new(root);

        let gitignore_path = root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(e) = builder.add(&gitignore_path) {
                log::warn!(
                    "Failed to load .gitignore from {}: {}",
                    gitignore_path.display(),
                    e
                );
            } else {
                log::debug!("Loaded .gitignore from {}", gitignore_path.display());
            }
        }

        for pattern in &self.config.ignore_patterns {
            if let Err(e) = builder.add_line(None, pattern) {
                log::warn!("Invalid ignore pattern '{}': {}", pattern, e);
            }
        }

        match builder.build() {
            Ok(gitignore) if gitignore.is_empty() => None,
            Ok(gitignore) => Some(gitignore),
            Err(e) => {
                log::warn!("Failed to build ignore patterns: {}", e);
                None
            }
        }
    }

    fn should_ignore(
        root: &Path,
        path: &Path,
        is_dir: bool,
        gitignore: Option<&Gitignore>,
    ) -> bool {
        let Some(gi) = gitignore else {
            return false;
        };

        let relative_path = path.strip_prefix(root).unwrap_or(path);
        let path_str = relative_path.to_string_lossy();
        let normalized_path = if cfg!(windows) {
            path_str.replace('\\', "/")
        } else {
            path_str.into_owned()
        };

        gi.matched_path_or_any_parents(normalized_path, is_dir)
            .is_ignore()
    }

    fn passes_size_filter(&self, size: u64) -> bool {
        if self.config.min_size.is_some_and(|min| size < min) {
            return false;
        }
        if self.config.max_size.is_some_and(|max| size > max) {
            return false;
        }
        true
    }

    /// Walk all roots, yielding file candidates.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use cowdupe::scanner::{Walker, WalkerConfig};
    /// use std::path::Path;
    ///
    /// let walker = Walker::new(Path::new("."), WalkerConfig::default());
    /// let files: Vec<_> = walker.walk().filter_map(Result::ok).collect();
    /// println!("Found {} files", files.len());
    /// ```
    pub fn walk(&self) -> impl Iterator<Item = Result<FileCandidate, ScanError>> + '_ {
        let mut seen = SeenFiles::default();

        self.roots
            .iter()
            .flat_map(move |root| self.walk_root(root))
            .filter_map(move |result| match result {
                Ok((candidate, metadata)) => {
                    if seen.is_repeat(&candidate.path, &metadata) {
                        log::debug!("Skipping already seen file: {}", candidate.path.display());
                        None
                    } else {
                        Some(Ok(candidate))
                    }
                }
                Err(e) => Some(Err(e)),
            })
    }

    fn walk_root<'a>(
        &'a self,
        root: &'a Path,
    ) -> impl Iterator<Item = Result<(FileCandidate, Metadata), ScanError>> + 'a {
        let gitignore = self.build_gitignore(root);

        let walk_dir = WalkDir::new(root)
            .follow_links(self.config.follow_symlinks)
            .skip_hidden(self.config.skip_hidden)
            .process_read_dir(|_depth, _path, _read_dir_state, children| {
                children.sort_by(|a, b| match (a, b) {
                    (Ok(a), Ok(b)) => a.file_name().cmp(b.file_name()),
                    (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                    (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                    (Err(_), Err(_)) => std::cmp::Ordering::Equal,
                });
            });

        walk_dir.into_iter().filter_map(move |entry_result| {
            if self.is_shutdown_requested() {
                log::debug!("Walker: Shutdown requested, stopping iteration");
                return None;
            }

            let entry = match entry_result {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map_or_else(|| root.to_path_buf(), std::borrow::ToOwned::to_owned);
                    return Some(Err(handle_jwalk_error(path, e)));
                }
            };

            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                return None;
            }

            if Self::should_ignore(root, &path, false, gitignore.as_ref()) {
                log::trace!("Ignoring file: {}", path.display());
                return None;
            }

            if file_type.is_symlink() && !self.config.follow_symlinks {
                log::trace!("Skipping symlink: {}", path.display());
                return None;
            }

            let metadata = if self.config.follow_symlinks {
                std::fs::metadata(&path)
            } else {
                std::fs::symlink_metadata(&path)
            };
            let metadata = match metadata {
                Ok(m) => m,
                Err(e) => return Some(Err(handle_io_error(&path, e))),
            };

            if !metadata.is_file() {
                return None;
            }

            let size = metadata.len();
            if !self.passes_size_filter(size) {
                log::trace!("Skipping file due to size ({}): {}", size, path.display());
                return None;
            }

            Some(Ok((FileCandidate { path, size }, metadata)))
        })
    }
}

/// Remembers yielded files by inode where the platform exposes one, and by
/// path everywhere.
#[derive(Debug, Default)]
struct SeenFiles {
    inodes: HashSet<(u64, u64)>,
    paths: HashSet<PathBuf>,
}

impl SeenFiles {
    fn is_repeat(&mut self, path: &Path, metadata: &Metadata) -> bool {
        if let Some(key) = inode_key(metadata) {
            if !self.inodes.insert(key) {
                return true;
            }
        }
        !self.paths.insert(path.to_path_buf())
    }
}

#[cfg(unix)]
fn inode_key(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn inode_key(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}

fn handle_io_error(path: &Path, error: std::io::Error) -> ScanError {
    use std::io::ErrorKind;

    match error.kind() {
        ErrorKind::PermissionDenied => {
            log::warn!("Permission denied: {}", path.display());
            ScanError::PermissionDenied(path.to_path_buf())
        }
        ErrorKind::NotFound => {
            log::debug!("File not found (may have been deleted): {}", path.display());
            ScanError::NotFound(path.to_path_buf())
        }
        _ => {
            log::warn!("I/O error for {}: {}", path.display(), error);
            ScanError::Io {
                path: path.to_path_buf(),
                source: error,
            }
        }
    }
}

fn handle_jwalk_error(path: PathBuf, error: jwalk::Error) -> ScanError {
    log::warn!("Walker error for {}: {}", path.display(), error);
    match error.io_error().map(std::io::Error::kind) {
        Some(std::io::ErrorKind::PermissionDenied) => ScanError::PermissionDenied(path),
        Some(std::io::ErrorKind::NotFound) => ScanError::NotFound(path),
        _ => ScanError::Io {
            path,
            source: std::io::Error::other(error.to_string()),
        },
    }
}
