//! Wire messages exchanged between the coordinator server and peers

use borsh::{BorshDeserialize, BorshSerialize};
use lockstep_core::{CanonicalEntry, InputBatch, ParticipantId, Step};

#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    /// First frame from a peer
    Hello { participant: ParticipantId },
    /// Handshake accepted
    Welcome {
        participant: ParticipantId,
        input_delay: Step,
    },
    /// Commands a peer collected while executing `source_step`
    Submit {
        source_step: Step,
        batch: InputBatch,
    },
    /// A step every participant contributed to
    Finalized(CanonicalEntry),
    /// Handshake refused; the server closes the connection
    Rejected { reason: String },
    /// Liveness signal carrying the host's current step
    Heartbeat { step: Step },
}

impl SyncMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("SyncMessage serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }

    /// Variant name for log lines
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "Hello",
            Self::Welcome { .. } => "Welcome",
            Self::Submit { .. } => "Submit",
            Self::Finalized(_) => "Finalized",
            Self::Rejected { .. } => "Rejected",
            Self::Heartbeat { .. } => "Heartbeat",
        }
    }
}
