//! Integration tests for the layered configuration.

use clap::Parser;
use cowdupe::cli::Cli;
use cowdupe::config::{Config, ConfigError};
use cowdupe::scanner::HashAlgorithm;
use std::fs;
use std::sync::Mutex;
use tempfile::tempdir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("COWDUPE_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_toml_file_layer() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
min_size = 4096
skip_hidden = true
ignore_patterns = ["*.tmp", "node_modules/"]
io_threads = 8
"#,
    )
    .unwrap();

    let config: Config = Config::figment(Some(&path)).extract().unwrap();

    assert_eq!(config.min_size, Some(4096));
    assert_eq!(config.max_size, None);
    assert!(config.skip_hidden);
    assert!(!config.follow_symlinks);
    assert_eq!(config.ignore_patterns, vec!["*.tmp", "node_modules/"]);
    assert_eq!(config.io_threads, 8);
}

#[test]
fn test_explicit_file_is_loaded() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("cowdupe.toml");
    fs::write(&path, "follow_symlinks = true\nmax_size = 1000\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();

    assert!(config.follow_symlinks);
    assert_eq!(config.max_size, Some(1000));
    assert_eq!(config.io_threads, 4);
}

#[test]
fn test_explicit_missing_file_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::load(Some(&path)).unwrap_err();

    assert!(matches!(err, ConfigError::NotFound(p) if p == path));
}

#[test]
fn test_explicit_malformed_file_errors() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "io_threads = \"many\"\n").unwrap();

    let err = Config::load(Some(&path)).unwrap_err();

    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn test_env_overrides_file_and_cli_overrides_env() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "hash_algorithm = \"sha256\"\nio_threads = 2\n").unwrap();

    std::env::set_var("COWDUPE_HASH_ALGORITHM", "blake3");
    std::env::set_var("COWDUPE_IO_THREADS", "6");
    let loaded = Config::load(Some(&path));
    clear_env();
    let config = loaded.unwrap();

    assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
    assert_eq!(config.io_threads, 6);

    let cli = Cli::try_parse_from(["cowdupe", "--io-threads", "1", "--hash", "sha256", "."])
        .unwrap();
    let config = config.with_cli_overrides(&cli);

    assert_eq!(config.io_threads, 1);
    assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
    assert_eq!(config.dedup_config().io_threads, 1);
}

#[test]
fn test_cli_ignore_patterns_extend_file_patterns() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "ignore_patterns = [\"*.tmp\"]\n").unwrap();

    let cli = Cli::try_parse_from(["cowdupe", "-i", "*.bak", "--min-size", "1KB", "."]).unwrap();
    let config = Config::load(Some(&path)).unwrap().with_cli_overrides(&cli);
    let walker = config.walker_config();

    assert_eq!(walker.ignore_patterns, vec!["*.tmp", "*.bak"]);
    assert_eq!(walker.min_size, Some(1000));
}
