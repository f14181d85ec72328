//! Streaming content fingerprints.
//!
//! # Overview
//!
//! [`ContentHasher`] streams a file through a 256-bit digest and returns the
//! hex-encoded result as a [`Fingerprint`]. Files are read through a fixed
//! [`READ_BUFFER_SIZE`] buffer, so memory use does not grow with file size.
//!
//! SHA-256 is the default digest. BLAKE3 is faster on large trees and can be
//! selected with [`HashAlgorithm::Blake3`]; fingerprints from different
//! algorithms are never compared with each other within a run.
//!
//! # Example
//!
//! ```no_run
//! use cowdupe::scanner::{ContentHasher, HashAlgorithm};
//! use std::path::Path;
//!
//! let hasher = ContentHasher::new().with_algorithm(HashAlgorithm::Blake3);
//! let fp = hasher.fingerprint(Path::new("photo.jpg")).unwrap();
//! println!("{}", fp);
//! ```

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::HashError;

/// Size of the read buffer used while streaming (64 KiB).
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest used for content fingerprints.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// BLAKE3
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

/// Hex-encoded 256-bit content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

enum DigestState {
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl DigestState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Blake3 => Self::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize(self) -> Fingerprint {
        match self {
            Self::Sha256(h) => Fingerprint(format!("{:x}", h.finalize())),
            Self::Blake3(h) => Fingerprint(h.finalize().to_hex().to_string()),
        }
    }
}

/// Computes content fingerprints of files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher {
    algorithm: HashAlgorithm,
}

impl ContentHasher {
    /// SHA-256 hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// The configured algorithm.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Fingerprint the entire content of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HashError`] if the file cannot be opened or a read fails
    /// part way through.
    pub fn fingerprint(&self, path: &Path) -> Result<Fingerprint, HashError> {
        let file = File::open(path).map_err(|e| HashError::from_io(path, e))?;
        self.fingerprint_reader(file)
            .map_err(|e| HashError::from_io(path, e))
    }

    /// Fingerprint everything `reader` yields until end-of-stream.
    ///
    /// # Errors
    ///
    /// Propagates read errors other than `Interrupted`.
    pub fn fingerprint_reader<R: Read>(&self, mut reader: R) -> io::Result<Fingerprint> {
        let mut state = DigestState::new(self.algorithm);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => state.update(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(state.finalize())
    }
}
