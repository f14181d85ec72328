//! Progress reporting using indicatif.
//!
//! The deduplication pipeline reports through the [`ProgressCallback`] trait;
//! [`Progress`] renders those events as terminal progress bars. Phases are
//! named by the constants in this module.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Directory traversal.
pub const PHASE_WALKING: &str = "walking";
/// Content fingerprinting.
pub const PHASE_HASHING: &str = "hashing";
/// Clone calls.
pub const PHASE_CLONING: &str = "cloning";

/// Progress callback for the deduplication phases.
pub trait ProgressCallback: Send + Sync {
    /// Called when a phase starts with the number of items it will process.
    fn on_phase_start(&self, phase: &str, total: usize);

    /// Called for each item processed.
    ///
    /// `current` is 1-based. Hashing runs in parallel, so `current` is not
    /// guaranteed to increase monotonically across calls.
    fn on_progress(&self, current: usize, path: &str);

    /// Called when an item has been processed, providing its size.
    fn on_item_completed(&self, _bytes: u64) {}

    /// Called when a phase completes.
    fn on_phase_end(&self, phase: &str);

    /// Called to update the progress message.
    fn on_message(&self, _message: &str) {}
}

/// Progress reporter using indicatif.
pub struct Progress {
    multi: MultiProgress,
    walking: Mutex<Option<ProgressBar>>,
    hashing: Mutex<Option<ProgressBar>>,
    cloning: Mutex<Option<ProgressBar>>,
    quiet: bool,
}

impl Progress {
    /// Create a new progress reporter; `quiet` hides every bar.
    ///
    /// ```
    /// use cowdupe::progress::Progress;
    ///
    /// let progress = Progress::new(false);
    /// ```
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            walking: Mutex::new(None),
            hashing: Mutex::new(None),
            cloning: Mutex::new(None),
            quiet,
        }
    }

    fn walking_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed_precise}] {pos} files")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
    }

    fn hashing_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg} (ETA: {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn cloning_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█>-")
    }

    fn slot(&self, phase: &str) -> Option<&Mutex<Option<ProgressBar>>> {
        match phase {
            PHASE_WALKING => Some(&self.walking),
            PHASE_HASHING => Some(&self.hashing),
            PHASE_CLONING => Some(&self.cloning),
            _ => None,
        }
    }

    /// The most recently started bar that is still running.
    fn active(&self) -> Option<ProgressBar> {
        [&self.cloning, &self.hashing, &self.walking]
            .into_iter()
            .find_map(|slot| lock(slot).clone())
    }
}

impl ProgressCallback for Progress {
    fn on_phase_start(&self, phase: &str, total: usize) {
        if self.quiet {
            return;
        }

        let pb = match phase {
            PHASE_WALKING => {
                let pb = self.multi.add(ProgressBar::new_spinner());
                pb.set_style(Self::walking_style());
                pb.set_message("Walking directories");
                pb.enable_steady_tick(Duration::from_millis(100));
                pb
            }
            PHASE_HASHING => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::hashing_style());
                pb.set_message("Hashing");
                pb
            }
            _ => {
                let pb = self.multi.add(ProgressBar::new(total as u64));
                pb.set_style(Self::cloning_style());
                pb.set_message(phase.to_string());
                pb
            }
        };

        if let Some(slot) = self.slot(phase) {
            *lock(slot) = Some(pb);
        }
    }

    fn on_progress(&self, current: usize, path: &str) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.active() {
            pb.set_position(current as u64);
            pb.set_message(truncate_path(path, 30));
        }
    }

    fn on_phase_end(&self, phase: &str) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.slot(phase).and_then(|slot| lock(slot).take()) {
            pb.finish_with_message(format!("{phase} complete"));
        }
    }

    fn on_message(&self, message: &str) {
        if self.quiet {
            return;
        }

        if let Some(pb) = self.active() {
            pb.set_message(message.to_string());
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Truncate a path for display in the progress bar.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len >= max_len {
        let tail: String = file_name.chars().skip(name_len + 3 - max_len).collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
