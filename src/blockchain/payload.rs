use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;

use super::crypto::Digest;

/// An opaque unit of application data stored in a block
///
/// The ledger never looks inside a payload. It holds the canonical encoding
/// produced by the collaborator (for instance a base64 signed custody record)
/// and compares, hashes and deduplicates on those bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "abcd")]
pub struct Payload(pub String);

impl Payload {
    pub fn new(encoded: impl Into<String>) -> Self {
        Payload(encoded.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Leaf hash used by the Merkle accumulator
    pub fn digest(&self) -> Digest {
        Digest::of(self.as_bytes())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload(value.to_string())
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload(value)
    }
}
