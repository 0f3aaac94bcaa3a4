use lockstep_core::ParticipantId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Coordinator rejected {participant}: {reason}")]
    Rejected {
        participant: ParticipantId,
        reason: String,
    },

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Unexpected handshake message: {0}")]
    UnexpectedMessage(String),

    #[error("Connection closed during handshake")]
    ConnectionClosed,
}
