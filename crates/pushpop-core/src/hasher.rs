//! Content hashing.
//!
//! Files are identified by the BLAKE3 hash of their bytes, rendered as a
//! 64 character lowercase hex string. Both sides stream the file through
//! [`ContentHasher`] in fixed-size chunks, never loading it whole.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Number of hex characters in a digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Read buffer size used when hashing files (128 KiB).
pub const HASH_BUFFER_SIZE: usize = 128 * 1024;

/// A validated content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest(String);

impl Digest {
    /// Parse a digest received from the network.
    ///
    /// Surrounding whitespace is ignored. The remainder must be exactly
    /// [`DIGEST_HEX_LEN`] lowercase hex characters; nothing is truncated,
    /// padded or case-folded.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let lower_hex = trimmed
            .bytes()
            .all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if trimmed.len() != DIGEST_HEX_LEN || !lower_hex {
            return Err(Error::MalformedDigest {
                length: trimmed.chars().count(),
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The hex string.
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

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Incremental hasher producing a [`Digest`].
#[derive(Debug, Clone, Default)]
pub struct ContentHasher(blake3::Hasher);

impl ContentHasher {
    /// Create an empty hasher.
    #[must_use]
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Feed a chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    /// Finish and return the digest.
    #[must_use]
    pub fn finalize(&self) -> Digest {
        Digest(self.0.finalize().to_hex().to_string())
    }
}

/// Hash a file by streaming it through [`ContentHasher`].
///
/// Blocking; call from a blocking context.
pub fn hash_file(path: &Path) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];

    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize())
}

/// Hash an in-memory buffer.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hash_file_deterministic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..(HASH_BUFFER_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let first = hash_file(&path).unwrap();
        let second = hash_file(&path).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, hash_bytes(&data));
        assert_eq!(first.as_str().len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_known_empty_digest() {
        assert_eq!(
            hash_bytes(b"").as_str(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_chunking_does_not_change_digest() {
        let mut hasher = ContentHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), hash_bytes(b"hello world"));
    }

    #[test]
    fn test_parse_accepts_trimmed_hex() {
        let hex = "0123456789abcdef".repeat(4);
        let parsed = Digest::parse(&format!("{hex}\n")).unwrap();
        assert_eq!(parsed.as_str(), hex);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let short = "ab".repeat(31);
        match Digest::parse(&short) {
            Err(Error::MalformedDigest { length }) => assert_eq!(length, 62),
            other => panic!("expected malformed digest, got {other:?}"),
        }
        assert!(Digest::parse(&"a".repeat(65)).is_err());
        assert!(Digest::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let bad = format!("{}zz", "a".repeat(62));
        assert!(matches!(
            Digest::parse(&bad),
            Err(Error::MalformedDigest { length: 64 })
        ));
    }

    #[test]
    fn test_parse_rejects_uppercase_hex() {
        let upper = "0123456789ABCDEF".repeat(4);
        assert!(matches!(
            Digest::parse(&upper),
            Err(Error::MalformedDigest { length: 64 })
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(hash_file(&dir.path().join("missing")).is_err());
    }
}
