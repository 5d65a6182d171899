use crate::{Hash, HashWriter};

/// Derives the proof-of-work hash for one candidate nonce.
///
/// Implementations are handed to every search thread, so they must be cheap to
/// clone and free of shared mutable state.
pub trait PowHasher: Clone + Send + Sync + 'static {
    fn hash(&self, current_hash: &Hash, signer: &[u8; 32], nonce: u64) -> Hash;
}

/// Keccak-256 over `current_hash || signer || nonce_le`, the layout checked by
/// the reward contract.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeccakPowHasher;

impl KeccakPowHasher {
    pub fn new() -> Self {
        Self
    }
}

impl PowHasher for KeccakPowHasher {
    fn hash(&self, current_hash: &Hash, signer: &[u8; 32], nonce: u64) -> Hash {
        let mut inner = HashWriter::new();
        inner.update(current_hash.as_bytes());
        inner.update(signer);
        inner.update(&nonce.to_le_bytes());
        Hash::from_bytes(inner.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keccak256;
    use hex_literal::hex;

    #[test]
    fn test_keccak_pow_layout() {
        let current = Hash::from_bytes(hex!(
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
        ));
        let signer = [7u8; 32];
        let nonce = 42u64;

        let mut preimage = Vec::with_capacity(72);
        preimage.extend_from_slice(current.as_bytes());
        preimage.extend_from_slice(&signer);
        preimage.extend_from_slice(&nonce.to_le_bytes());

        let hash = KeccakPowHasher.hash(&current, &signer, nonce);
        assert_eq!(hash, Hash::from_bytes(keccak256(&preimage)));
    }

    #[test]
    fn test_keccak_pow_nonce_sensitivity() {
        let current = Hash::zeroed();
        let signer = [1u8; 32];
        let a = KeccakPowHasher.hash(&current, &signer, 1);
        let b = KeccakPowHasher.hash(&current, &signer, 2);
        assert_ne!(a, b);
        assert_eq!(a, KeccakPowHasher.hash(&current, &signer, 1));
    }
}
