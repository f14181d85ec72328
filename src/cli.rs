//! Command-line interface.
//!
//! ```bash
//! # Replace duplicates under two trees with clones
//! cowdupe ~/Pictures /Volumes/Archive/Pictures
//!
//! # Show what would be cloned, skipping files under 1 MiB
//! cowdupe --dry-run --min-size 1MiB ~/Downloads
//!
//! # Only report whether the volume can clone
//! cowdupe --check ~/Downloads
//! ```

use clap::Parser;
use std::path::PathBuf;

use crate::scanner::HashAlgorithm;

/// Reclaim disk space by replacing duplicate files with copy-on-write clones.
///
/// Files are grouped by size, then by content hash. Within each group the
/// first file found is kept and every other file is replaced by a clone of
/// it, so the copies share storage until one of them is modified.
#[derive(Debug, Parser)]
#[command(name = "cowdupe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Directories to deduplicate
    #[arg(value_name = "DIR", required = true)]
    pub paths: Vec<PathBuf>,

    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Report fatal errors as JSON on stderr
    #[arg(long)]
    pub json_errors: bool,

    /// Log the clones that would be made without making them
    #[arg(long)]
    pub dry_run: bool,

    /// Probe each directory for clone support and exit
    #[arg(long)]
    pub check: bool,

    /// Minimum file size to consider (e.g., 4KiB, 1MB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Maximum file size to consider (e.g., 1GiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Gitignore-style pattern to exclude (repeatable)
    #[arg(short = 'i', long = "ignore", value_name = "PATTERN")]
    pub ignore_patterns: Vec<String>,

    /// Skip hidden files and directories
    #[arg(long)]
    pub skip_hidden: bool,

    /// Follow symbolic links
    #[arg(long)]
    pub follow_symlinks: bool,

    /// Number of threads used for hashing
    #[arg(long, value_name = "N", value_parser = parse_threads)]
    pub io_threads: Option<usize>,

    /// Content hash algorithm
    #[arg(long = "hash", value_name = "ALGORITHM", value_enum)]
    pub hash_algorithm: Option<HashAlgorithm>,

    /// Configuration file (default: platform config dir, cowdupe/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Parse a human-readable size such as `512`, `10KB`, `4KiB` or `1.5GB`.
///
/// Decimal suffixes (KB, MB, ...) are powers of 1000, binary ones (KiB,
/// MiB, ...) powers of 1024. Suffixes are case-insensitive.
///
/// # Errors
///
/// Returns a message for empty input, a malformed number or an unknown
/// suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}

fn parse_threads(s: &str) -> Result<usize, String> {
    match s.trim().parse::<usize>() {
        Ok(0) => Err("Thread count must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("Invalid thread count: '{s}'")),
    }
}
