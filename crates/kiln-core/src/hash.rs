//! Content hashing for materialized artifacts

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

const PREFIX: &str = "sha256:";

/// SHA-256 of an artifact's bytes.
///
/// Stored next to every localized artifact so a later reader can tell
/// whether the file on disk is still the one that was downloaded.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash a file without loading it into memory
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Self(hasher.finalize().into()))
    }

    /// Whether the file at `path` still has this content
    pub fn matches_file<P: AsRef<Path>>(&self, path: P) -> io::Result<bool> {
        Ok(Self::from_file(path)? == *self)
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// `sha256:`-prefixed form used in library records
    pub fn to_prefixed_hex(&self) -> String {
        format!("{}{}", PREFIX, self.to_hex())
    }

    pub fn from_prefixed_hex(s: &str) -> Option<Self> {
        let hex = s.strip_prefix(PREFIX)?;
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (byte, pair) in bytes.iter_mut().zip(hex.as_bytes().chunks_exact(2)) {
            let pair = std::str::from_utf8(pair).ok()?;
            *byte = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First 12 hex digits, for terminal output
    pub fn short(&self) -> String {
        self.to_hex()[..12].to_string()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinguishes_content() {
        assert_eq!(ContentHash::from_bytes(b"glTF"), ContentHash::from_bytes(b"glTF"));
        assert_ne!(ContentHash::from_bytes(b"glTF"), ContentHash::from_bytes(b"glTf"));
    }

    #[test]
    fn test_prefixed_hex() {
        let h = ContentHash::from_bytes(b"model bytes");
        let prefixed = h.to_prefixed_hex();
        assert_eq!(prefixed.len(), PREFIX.len() + 64);
        assert_eq!(h.to_string(), prefixed);
        assert_eq!(ContentHash::from_prefixed_hex(&prefixed), Some(h));
        assert_eq!(h.short().len(), 12);
    }

    #[test]
    fn test_from_prefixed_hex_invalid() {
        assert!(ContentHash::from_prefixed_hex("md5:abc").is_none());
        assert!(ContentHash::from_prefixed_hex("sha256:tooshort").is_none());
        let bad = format!("sha256:{}", "zz".repeat(32));
        assert!(ContentHash::from_prefixed_hex(&bad).is_none());
    }

    #[test]
    fn test_file_hash_and_match() {
        let path = std::env::temp_dir().join(format!(
            "kiln_hash_test_{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, b"payload").unwrap();
        let hash = ContentHash::from_bytes(b"payload");
        assert_eq!(ContentHash::from_file(&path).unwrap(), hash);
        assert!(hash.matches_file(&path).unwrap());

        std::fs::write(&path, b"edited").unwrap();
        assert!(!hash.matches_file(&path).unwrap());
        std::fs::remove_file(&path).ok();
    }
}
