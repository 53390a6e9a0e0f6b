// md5.rs - MD5 digest implementation

use super::traits::{SequenceDigest, SequenceHasher};

/// MD5 hasher - smaller digests for memory-constrained runs
#[derive(Debug, Clone, Default)]
pub struct Md5Hasher;

impl SequenceHasher for Md5Hasher {
    fn digest_normalized(&self, normalized: &[u8]) -> SequenceDigest {
        SequenceDigest::Md5(md5::compute(normalized).0)
    }

    fn name(&self) -> &'static str {
        "MD5"
    }

    fn description(&self) -> &'static str {
        "MD5 digest, half the footprint of SHA256"
    }
}
