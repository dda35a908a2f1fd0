use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Value stored on an output socket, together with its content hash.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SocketData {
    pub value: Value,
    pub hash: String,
}

impl SocketData {
    pub fn new(value: Value) -> Self {
        let hash = canonical_hash(&value);
        SocketData { value, hash }
    }
}

/// SHA-256 (hex) of the JSON encoding of `value`. Object keys are kept sorted by `serde_json`'s
/// default map, so equal values always hash equally.
pub fn canonical_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
