use sha3::{Digest, Keccak256};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashError {
    InvalidLength(usize),
    InvalidHex(String),
}

impl std::fmt::Display for HashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashError::InvalidLength(len) => write!(f, "Hash must be 32 bytes, got {}", len),
            HashError::InvalidHex(msg) => write!(f, "Hash decoding error: {}", msg),
        }
    }
}

impl std::error::Error for HashError {}

/// Compute Keccak-256(data)
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// HashWriter wraps a Keccak-256 hasher to implement Write trait
#[derive(Clone, Default)]
pub struct HashWriter(Keccak256);

impl HashWriter {
    pub fn new() -> Self {
        Self(Keccak256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> [u8; 32] {
        self.0.finalize().into()
    }
}

impl Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
