use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

use std::fmt;
use std::str::FromStr;

/// Errors that can occur while decoding digests
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Invalid digest length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// A SHA-256 digest
///
/// Digests are written as lower-case hex everywhere they leave the process
/// (JSON and storage), so a block hash reads the same in logs, in the API and
/// on disk.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    /// Sentinel used as the previous hash of the genesis block
    pub const ZERO: Digest = Digest([0u8; 32]);

    /// Hashes arbitrary bytes
    pub fn of(data: &[u8]) -> Self {
        Digest(Sha256::digest(data).into())
    }

    /// Hashes the concatenation `left ‖ right`
    pub fn of_pair(left: &Digest, right: &Digest) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(left.0);
        hasher.update(right.0);
        Digest(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Number of leading zero hex digits (4-bit units)
    pub fn leading_zero_digits(&self) -> u32 {
        let mut zeros = 0;
        for byte in self.0 {
            if byte == 0 {
                zeros += 2;
                continue;
            }
            if byte >> 4 == 0 {
                zeros += 1;
            }
            break;
        }
        zeros
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        let len = bytes.len();
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength(len))?;

        Ok(Digest(array))
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_sha256() {
        let digest = Digest::of(b"abc");
        assert_eq!(
            digest.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pair_is_concatenation() {
        let left = Digest::of(b"left");
        let right = Digest::of(b"right");

        let mut joined = left.0.to_vec();
        joined.extend_from_slice(&right.0);

        assert_eq!(Digest::of_pair(&left, &right), Digest::of(&joined));
        assert_ne!(Digest::of_pair(&left, &right), Digest::of_pair(&right, &left));
    }

    #[test]
    fn test_leading_zero_digits() {
        let mut bytes = [0xffu8; 32];
        assert_eq!(Digest(bytes).leading_zero_digits(), 0);

        bytes[0] = 0x0f;
        assert_eq!(Digest(bytes).leading_zero_digits(), 1);

        bytes[0] = 0x00;
        bytes[1] = 0x0a;
        assert_eq!(Digest(bytes).leading_zero_digits(), 3);

        assert_eq!(Digest::ZERO.leading_zero_digits(), 64);
    }

    #[test]
    fn test_hex_parse() {
        let digest = Digest::of(b"supply");
        let parsed: Digest = digest.to_hex().parse().unwrap();
        assert_eq!(parsed, digest);

        assert!(matches!("zz".parse::<Digest>(), Err(CryptoError::DecodingError(_))));
        assert_eq!("abcd".parse::<Digest>(), Err(CryptoError::InvalidLength(2)));
    }

    #[test]
    fn test_json_is_hex_string() {
        let digest = Digest::of(b"json");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(json, format!("\"{}\"", digest.to_hex()));
    }
}
