//! cowdupe - content-addressed deduplication with copy-on-write clones.
//!
//! Files with identical content are found by size and then by content hash.
//! Within each group of identical files, every copy except the first is
//! replaced by a clone of the first, so all copies share physical storage
//! while remaining independent files.
//!
//! Cloning uses `clonefileat(2)` on APFS (macOS) and
//! `FSCTL_DUPLICATE_EXTENTS_TO_FILE` on ReFS / Dev Drive (Windows). Other
//! platforms report cloning as unsupported.

pub mod cli;
pub mod clone;
pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::cli::Cli;
use crate::clone::capability;
use crate::config::Config;
use crate::dedup::Deduplicator;
use crate::error::ExitCode;
use crate::progress::{Progress, ProgressCallback, PHASE_WALKING};
use crate::scanner::{FileCandidate, Walker};

/// Run the command line described by `cli`.
///
/// # Errors
///
/// Returns an error for invalid roots or configuration, a failed clone, or
/// an interrupt. Files that could not be hashed are reported through
/// [`ExitCode::PartialSuccess`] instead.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet);

    let roots = resolve_roots(&cli.paths)?;

    if cli.check {
        return check_roots(&roots);
    }

    let config = Config::load(cli.config.as_deref())
        .context("Failed to load configuration")?
        .with_cli_overrides(&cli);
    log::debug!("Effective configuration: {:?}", config);

    // Resolve the capability before any parallel section touches it.
    let state = capability::current();
    if !state.supported && !cli.dry_run {
        log::warn!(
            "Cloning is not supported here ({}); the run fails if a duplicate is found",
            state.reason.as_deref().unwrap_or("unknown reason")
        );
    }

    let handler = signal::install_handler().context("Failed to install Ctrl+C handler")?;
    let progress: Arc<dyn ProgressCallback> = Arc::new(Progress::new(cli.quiet));

    let candidates = collect_candidates(&roots, &config, &handler, progress.as_ref());
    if handler.is_shutdown_requested() {
        return Ok(ExitCode::Interrupted);
    }

    let dedup_config = config
        .dedup_config()
        .with_dry_run(cli.dry_run)
        .with_shutdown_flag(handler.get_flag())
        .with_progress_callback(progress);
    let summary = Deduplicator::new(dedup_config, clone::platform_backend()).run(candidates)?;

    if !cli.quiet {
        println!(
            "{} {} file(s) in {} group(s), {} reclaimed",
            if summary.dry_run { "Would clone" } else { "Cloned" },
            summary.clones,
            summary.hash_groups,
            summary.reclaimed_display()
        );
    }

    if summary.is_partial() {
        log::warn!("{} file(s) could not be hashed", summary.hash_failures);
        Ok(ExitCode::PartialSuccess)
    } else {
        Ok(ExitCode::Success)
    }
}

/// Check every root exists and is a directory, and canonicalize it.
fn resolve_roots(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|path| {
            if !path.exists() {
                bail!(scanner::ScanError::NotFound(path.clone()));
            }
            if !path.is_dir() {
                bail!(scanner::ScanError::NotADirectory(path.clone()));
            }
            std::fs::canonicalize(path)
                .with_context(|| format!("Failed to resolve {}", path.display()))
        })
        .collect()
}

fn check_roots(roots: &[PathBuf]) -> Result<ExitCode> {
    let mut all_supported = true;
    for root in roots {
        let supported = probe(root);
        all_supported &= supported;
        println!(
            "{}: {}",
            root.display(),
            if supported { "clones supported" } else { "clones not supported" }
        );
    }

    Ok(if all_supported {
        ExitCode::Success
    } else {
        ExitCode::GeneralError
    })
}

/// A probe that fails for any reason counts as unsupported.
fn probe(root: &Path) -> bool {
    match capability::check_supported(root) {
        Ok(supported) => supported,
        Err(e) => {
            log::warn!("Could not probe {}: {}", root.display(), e);
            false
        }
    }
}

fn collect_candidates(
    roots: &[PathBuf],
    config: &Config,
    handler: &signal::ShutdownHandler,
    progress: &dyn ProgressCallback,
) -> Vec<FileCandidate> {
    let walker = Walker::with_roots(roots.iter().cloned(), config.walker_config())
        .with_shutdown_flag(handler.get_flag());

    progress.on_phase_start(PHASE_WALKING, 0);
    progress.on_message(&format!("Walking {} root(s)", roots.len()));
    let mut candidates = Vec::new();
    let mut errors = 0usize;
    for entry in walker.walk() {
        match entry {
            Ok(candidate) => {
                progress.on_progress(
                    candidates.len() + 1,
                    candidate.path.to_string_lossy().as_ref(),
                );
                candidates.push(candidate);
            }
            Err(e) => {
                errors += 1;
                log::debug!("Scan error: {}", e);
            }
        }
    }
    progress.on_phase_end(PHASE_WALKING);

    log::info!(
        "Found {} candidate file(s) under {} root(s)",
        candidates.len(),
        roots.len()
    );
    if errors > 0 {
        log::warn!("{} path(s) could not be read during the walk", errors);
    }
    candidates
}
