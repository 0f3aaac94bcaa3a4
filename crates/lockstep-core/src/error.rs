//! Lockstep errors

use crate::types::{ParticipantId, Step};
use thiserror::Error;

/// Invalid session configuration. Fatal at construction time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Step rate must be between 1 and 1000000000 ticks per second, got {0}")]
    InvalidStepRate(u32),

    #[error("Buffer duration must be a finite number of seconds covering at least one step, got {0}")]
    InvalidBufferDuration(f64),

    #[error("A session needs at least one participant")]
    NoParticipants,

    #[error("Roster has {actual} participants but the session expects {expected}")]
    RosterSize { expected: usize, actual: usize },

    #[error("Participant {0} appears twice in the roster")]
    DuplicateParticipant(ParticipantId),

    #[error("{0} participants do not fit in a participant id")]
    TooManyParticipants(usize),
}

/// Errors raised while synchronizing inputs
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Participant {0} is not part of this session")]
    UnknownParticipant(ParticipantId),

    #[error("Entry for step {step} arrived after step {current} began executing")]
    LateEntry { step: Step, current: Step },

    #[error("Entry for step {0} is already scheduled")]
    DuplicateEntry(Step),

    #[error("Source step {source_step} is outside the submission window {earliest}..={latest}")]
    StepOutOfRange {
        source_step: Step,
        earliest: Step,
        latest: Step,
    },

    #[error("Submission channel closed")]
    ChannelClosed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}
