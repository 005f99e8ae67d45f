//! Canonical digests and the `.digest` sidecar convention.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::{OciError, Result};
use vzpod_error::CommonError;

/// Suffix for the sidecar file caching a payload's verified digest.
const DIGEST_FILE_SUFFIX: &str = ".digest";

/// A canonical content digest in `sha256:<hex>` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Computes the digest of an in-memory byte slice.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("sha256:{}", hex::encode(hasher.finalize())))
    }

    /// Parses and validates a canonical digest string.
    ///
    /// # Errors
    ///
    /// Returns an error unless the string has the form `sha256:<64 hex>`.
    pub fn parse(s: &str) -> Result<Self> {
        let Some(encoded) = s.strip_prefix("sha256:") else {
            return Err(OciError::MalformedDigest(s.to_string()));
        };
        if encoded.len() != 64 || !encoded.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OciError::MalformedDigest(s.to_string()));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Digest {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Incremental digest accumulator.
#[derive(Default)]
pub struct Digester {
    hasher: Sha256,
}

impl Digester {
    /// Creates a new accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds bytes into the accumulator.
    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Finalizes the accumulator into a canonical digest.
    #[must_use]
    pub fn finalize(self) -> Digest {
        Digest(format!("sha256:{}", hex::encode(self.hasher.finalize())))
    }
}

impl std::io::Write for Digester {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Returns the sidecar path for a payload path.
#[must_use]
pub fn digest_file_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(DIGEST_FILE_SUFFIX);
    PathBuf::from(name)
}

/// Writes a payload's digest to its sidecar file.
pub(crate) fn write_digest_file(path: &Path, digest: &Digest) -> Result<()> {
    fs::write(digest_file_path(path), digest.as_str())?;
    Ok(())
}

/// Validates a payload against the expected digest.
///
/// When the sidecar exists and is newer than the payload, the cached digest
/// string is compared directly. Otherwise the payload is rehashed and the
/// sidecar rewritten.
///
/// # Errors
///
/// Returns `DigestMismatch` when the payload does not match, or an I/O
/// error when the payload cannot be read.
pub fn validate_file_with_digest(path: &Path, expected: &Digest) -> Result<()> {
    let file_meta = fs::metadata(path)?;

    let sidecar = digest_file_path(path);
    let sidecar_fresh = match fs::metadata(&sidecar) {
        Ok(meta) => match (meta.modified(), file_meta.modified()) {
            (Ok(sidecar_mtime), Ok(file_mtime)) => sidecar_mtime > file_mtime,
            _ => false,
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
        Err(err) => return Err(err.into()),
    };

    if !sidecar_fresh {
        tracing::warn!(
            path = %path.display(),
            "Digest sidecar missing or outdated, computing digest"
        );
        return compute_and_verify_file_digest(path, expected);
    }

    let stored = fs::read_to_string(&sidecar)?;
    if stored != expected.as_str() {
        return Err(CommonError::digest_mismatch(expected.as_str(), stored).into());
    }

    Ok(())
}

/// Hashes the payload at `path`, verifies it against `expected`, and
/// refreshes the sidecar on success.
///
/// # Errors
///
/// Returns `DigestMismatch` when the computed digest differs.
pub fn compute_and_verify_file_digest(path: &Path, expected: &Digest) -> Result<()> {
    let mut file = fs::File::open(path)?;
    let mut digester = Digester::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        digester.update(&buf[..n]);
    }

    let actual = digester.finalize();
    if actual != *expected {
        return Err(CommonError::digest_mismatch(expected.as_str(), actual.as_str()).into());
    }

    write_digest_file(path, expected)?;
    Ok(())
}
