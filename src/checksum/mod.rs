//! SHA-256 content digests for backup artifacts
//!
//! - Every backup artifact carries a SHA-256 digest of its final bytes
//! - The digest is computed exactly once, when the artifact is completed
//! - A later mismatch is corruption, never a reason to recompute

mod errors;

pub use errors::{ChecksumError, ChecksumResult};

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

/// Canonical digest string prefix.
const DIGEST_PREFIX: &str = "sha256:";

/// Computes a SHA-256 digest over in-memory data.
///
/// Deterministic: the same input always produces the same digest string.
pub fn compute_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format_digest(&hasher.finalize())
}

/// Computes the SHA-256 digest of an entire file.
///
/// Reads in 8 KiB chunks so large artifacts never have to fit in memory.
pub fn compute_file_digest(path: &Path) -> ChecksumResult<String> {
    let file = File::open(path).map_err(|e| ChecksumError::io_at(path, e))?;

    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| ChecksumError::io_at(path, e))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format_digest(&hasher.finalize()))
}

/// Recomputes the digest of a file and compares it to a stored value.
///
/// Returns `Ok(false)` on mismatch; a mismatch is a reportable integrity
/// fault for the caller, not an error of this function.
pub fn verify_file(path: &Path, expected: &str) -> ChecksumResult<bool> {
    if parse_digest(expected).is_none() {
        return Err(ChecksumError::malformed(expected));
    }
    let actual = compute_file_digest(path)?;
    Ok(actual == expected)
}

/// Formats raw digest bytes as the canonical string.
///
/// Format: `sha256:` followed by 64 lowercase hex characters.
pub fn format_digest(raw: &[u8]) -> String {
    let mut out = String::with_capacity(DIGEST_PREFIX.len() + raw.len() * 2);
    out.push_str(DIGEST_PREFIX);
    for byte in raw {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Parses a canonical digest string back to raw bytes.
///
/// Returns `None` if the prefix or length is wrong, or any character is not
/// hex.
pub fn parse_digest(formatted: &str) -> Option<Vec<u8>> {
    let hex = formatted.strip_prefix(DIGEST_PREFIX)?;
    if hex.len() != 64 {
        return None;
    }
    let mut raw = Vec::with_capacity(32);
    let bytes = hex.as_bytes();
    for pair in bytes.chunks(2) {
        let s = std::str::from_utf8(pair).ok()?;
        raw.push(u8::from_str_radix(s, 16).ok()?);
    }
    Some(raw)
}
