// traits.rs - Core traits and types for the digest system

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display};

/// Content digest of an upper-cased sequence.
///
/// Two sequences are the same allele if and only if their digests are equal,
/// so the digest is used directly as the identity key everywhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceDigest {
    Sha256([u8; 32]),
    Md5([u8; 16]),
}

impl SequenceDigest {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SequenceDigest::Sha256(bytes) => bytes,
            SequenceDigest::Md5(bytes) => bytes,
        }
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Parse a hex digest; the length selects the algorithm
    pub fn from_hex(hex: &str) -> Result<Self, String> {
        let hex = hex.trim();
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("Invalid digest '{}': not hexadecimal", hex));
        }

        let bytes: Vec<u8> = (0..hex.len())
            .step_by(2)
            .filter_map(|i| hex.get(i..i + 2))
            .map(|pair| u8::from_str_radix(pair, 16))
            .collect::<Result<_, _>>()
            .map_err(|e| format!("Invalid digest '{}': {}", hex, e))?;

        match hex.len() {
            64 => {
                let mut out = [0u8; 32];
                out.copy_from_slice(&bytes);
                Ok(SequenceDigest::Sha256(out))
            }
            32 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(&bytes);
                Ok(SequenceDigest::Md5(out))
            }
            n => Err(format!(
                "Invalid digest '{}': expected 32 or 64 hex characters, got {}",
                hex, n
            )),
        }
    }
}

impl Display for SequenceDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Debug for SequenceDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hex = self.to_hex();
        let kind = match self {
            SequenceDigest::Sha256(_) => "sha256",
            SequenceDigest::Md5(_) => "md5",
        };
        write!(f, "{}:{}", kind, &hex[..12])
    }
}

// Digests travel as hex strings so they can key JSON maps.
impl Serialize for SequenceDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SequenceDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        SequenceDigest::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Trait for sequence digest strategies
///
/// Implementors only see upper-cased input; case folding happens once in
/// [`SequenceHasher::hash_sequence`].
pub trait SequenceHasher: Send + Sync + Debug {
    /// Digest of an already upper-cased sequence
    fn digest_normalized(&self, normalized: &[u8]) -> SequenceDigest;

    /// Get a human-readable name for this hasher
    fn name(&self) -> &'static str;

    /// Get a description of this hasher
    fn description(&self) -> &'static str;

    /// Digest a sequence regardless of letter case
    fn hash_sequence(&self, sequence: &[u8]) -> SequenceDigest {
        if sequence.iter().any(|b| b.is_ascii_lowercase()) {
            self.digest_normalized(&sequence.to_ascii_uppercase())
        } else {
            self.digest_normalized(sequence)
        }
    }
}
