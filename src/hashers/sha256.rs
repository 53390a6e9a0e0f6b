// sha256.rs - SHA256 digest implementation

use super::traits::{SequenceDigest, SequenceHasher};

/// SHA256 hasher - default allele identity
#[derive(Debug, Clone, Default)]
pub struct Sha256Hasher;

impl SequenceHasher for Sha256Hasher {
    fn digest_normalized(&self, normalized: &[u8]) -> SequenceDigest {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(normalized);
        SequenceDigest::Sha256(hasher.finalize().into())
    }

    fn name(&self) -> &'static str {
        "SHA256"
    }

    fn description(&self) -> &'static str {
        "SHA256 digest for cryptographically secure allele identity"
    }
}
