use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Cache key for a tool invocation (hex SHA-256)
///
/// Derived from the tool name and the arguments after defaults and coercion
/// have been applied. Arguments are hashed in key order, so two calls that
/// differ only in argument insertion order collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub String);

impl Fingerprint {
    pub fn compute(tool: &str, arguments: &BTreeMap<String, serde_json::Value>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tool.as_bytes());
        hasher.update([0u8]);
        for (key, value) in arguments {
            hasher.update(key.as_bytes());
            hasher.update([b'=']);
            // serde_json::Value keeps object keys sorted, so nested values are canonical too
            hasher.update(value.to_string().as_bytes());
            hasher.update([0u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
