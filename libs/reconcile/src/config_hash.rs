//! Fingerprints of entity configuration.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// SHA-256 digest of an entity's configuration object.
///
/// Lets a loop notice that a desired configuration changed between passes
/// without keeping the configuration itself around. Key order never
/// matters: `serde_json::Map` iterates in sorted order unless the
/// `preserve_order` feature is enabled, which this workspace does not do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigHash([u8; 32]);

impl ConfigHash {
    /// Hash a configuration object.
    pub fn of(config: &Map<String, Value>) -> Self {
        let mut hasher = Sha256::new();
        for (key, value) in config {
            // Length-prefix each part so ("ab", "c") and ("a", "bc") differ.
            let value = value.to_string();
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", hex::encode(self.0))
    }
}
