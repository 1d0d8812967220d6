//! Artifact checksums
//!
//! The catalog carries SHA-256 digests in an obfuscated form: the lowercase
//! hex digest written back to front.

use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Decode the obfuscated catalog form
    pub fn from_catalog(obfuscated: &str) -> Option<Self> {
        let digest: String = obfuscated.trim().chars().rev().collect();
        let bytes = hex::decode(digest).ok()?;
        let bytes: [u8; 32] = bytes.try_into().ok()?;
        Some(Checksum(bytes))
    }

    /// Encode in the obfuscated catalog form
    pub fn to_catalog(&self) -> String {
        hex::encode(self.0).chars().rev().collect()
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        Checksum(finish(Sha256::new_with_prefix(bytes)))
    }

    /// Stream a file through SHA-256
    pub fn of_file(path: &Path) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        Ok(Checksum(finish(hasher)))
    }
}

fn finish(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}
