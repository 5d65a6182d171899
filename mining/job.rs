//! Mining session, search unit configuration and proof definitions
//!
//! A [`SearchUnitConfig`] is the single message a search unit receives; a
//! [`Proof`] is the single message the winning unit sends back.

use miner_hashes::{Hash, HashError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte account address of the transaction signer
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SignerId([u8; 32]);

impl SignerId {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for SignerId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::from_hex(s).map(|h| SignerId(h.into()))
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerId({})", self)
    }
}

impl Serialize for SignerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SignerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// On-chain id of the caller's mining account record
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountRef(pub String);

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of a mining session in the progress store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(signer: &SignerId, current_hash: &Hash) -> Self {
        Self(format!("{}:{}", hex::encode(signer.as_bytes()), current_hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Inclusive nonce interval searched by one unit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NonceRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl NonceRange {
    pub fn new(start: u64, end_inclusive: u64) -> Self {
        Self { start, end_inclusive }
    }

    pub fn contains(&self, nonce: u64) -> bool {
        nonce >= self.start && nonce <= self.end_inclusive
    }

    /// Number of nonces in the range
    pub fn len(&self) -> u128 {
        if self.end_inclusive < self.start {
            return 0;
        }
        (self.end_inclusive - self.start) as u128 + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable configuration handed once to a search unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchUnitConfig {
    pub unit_id: usize,
    pub signer: SignerId,
    pub current_hash: Hash,
    pub difficulty: u64,
    pub range: NonceRange,
    /// Emit a progress message every this many nonces (0 disables)
    pub checkpoint_interval: u64,
}

/// The winning nonce of a session together with everything needed to verify it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    #[serde(with = "nonce_string")]
    pub nonce: u64,
    pub hash: Hash,
    pub signer: SignerId,
    pub current_hash: Hash,
    pub difficulty: u64,
}

/// State of one mining session, owned by the coordinator
#[derive(Clone, Debug)]
pub struct MiningSession {
    pub id: SessionId,
    pub signer: SignerId,
    pub current_hash: Hash,
    pub difficulty: u64,
    nonce_cursor: u64,
}

impl MiningSession {
    pub fn new(signer: SignerId, current_hash: Hash, difficulty: u64, nonce_cursor: u64) -> Self {
        Self {
            id: SessionId::new(&signer, &current_hash),
            signer,
            current_hash,
            difficulty,
            nonce_cursor,
        }
    }

    pub fn nonce_cursor(&self) -> u64 {
        self.nonce_cursor
    }

    /// Moves the cursor forward; returns false when `nonce` would move it back
    pub fn advance(&mut self, nonce: u64) -> bool {
        if nonce <= self.nonce_cursor {
            return false;
        }
        self.nonce_cursor = nonce;
        true
    }
}

/// Nonces travel as decimal strings so JSON consumers with 53-bit numbers keep them exact
pub(crate) mod nonce_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(nonce: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(nonce)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
