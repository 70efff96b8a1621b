//! One-way password hashing.

use sha2::{Digest, Sha256};

pub trait PasswordHasher: Send + Sync {
    fn hash(&self, plaintext: &str) -> String;

    fn matches(&self, plaintext: &str, stored_hash: &str) -> bool {
        self.hash(plaintext) == stored_hash
    }
}

/// Unsalted SHA-256 rendered as lowercase hex, compatible with existing stored hashes.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256PasswordHasher;

impl PasswordHasher for Sha256PasswordHasher {
    fn hash(&self, plaintext: &str) -> String {
        hex::encode(Sha256::digest(plaintext.as_bytes()))
    }
}
