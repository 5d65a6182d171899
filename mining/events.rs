//! Typed messages exchanged with the UI collaborator
//!
//! Both directions are fire-and-forget. Commands may be delivered more than
//! once; the engine emits each result at most once.

use crate::chain::TransactionResult;
use crate::job::{AccountRef, Proof, SignerId};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Status codes reported while a proof is being submitted
///
/// On the wire a status is its numeric [`code`](StatusCode::code).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StatusCode {
    Submitting,
    Success,
    BusInvalidWaiting,
}

impl StatusCode {
    /// Numeric code understood by the UI port
    pub fn code(self) -> u8 {
        match self {
            StatusCode::Submitting => 3,
            StatusCode::Success => 4,
            StatusCode::BusInvalidWaiting => 5,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            3 => Some(StatusCode::Submitting),
            4 => Some(StatusCode::Success),
            5 => Some(StatusCode::BusInvalidWaiting),
            _ => None,
        }
    }
}

impl Serialize for StatusCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for StatusCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        StatusCode::from_code(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown status code {}", code)))
    }
}

/// Inbound commands
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EngineCommand {
    StartMining { signer: SignerId, account: AccountRef },
    StopMining,
    SubmitProof { signer: SignerId, proof: Proof },
    AbandonSubmission,
}

/// Outbound events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EngineEvent {
    ProofFound(Proof),
    MiningError(String),
    StatusUpdate(StatusCode),
    ProofSubmitError(String),
    /// An epoch wait finished and the pending proof is being re-attempted
    RetrySubmitProof(Proof),
    SubmissionComplete(TransactionResult),
}
