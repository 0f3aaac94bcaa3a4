//! Lockstep Core - deterministic input synchronization
//!
//! Architecture:
//! - Every participant submits the commands it issued during a step
//! - The coordinator merges submissions per step, strips unowned entities and
//!   broadcasts the step once every participant contributed
//! - Each peer's driver executes a step only after its canonical entry arrived,
//!   stalling otherwise, so all simulations see the same command stream
//! - Inputs are delayed by a few steps to hide network jitter

pub mod authority;
pub mod broadcast;
pub mod clock;
pub mod command_queue;
pub mod config;
pub mod coordinator;
pub mod digest;
pub mod driver;
pub mod error;
pub mod input_buffer;
pub mod replay;
pub mod roster;
pub mod session;
pub mod turn;
pub mod types;

pub use authority::AuthorityFilter;
pub use broadcast::{Broadcaster, LocalFanout};
pub use clock::Clock;
pub use command_queue::{CommandSender, LocalCommandQueue};
pub use config::{SyncConfig, Timing};
pub use coordinator::{Coordinator, CoordinatorStats, SubmissionSink, SubmitOutcome};
pub use digest::DigestSimulation;
pub use driver::{AdvanceOutcome, DriverStats, LockstepDriver, Simulation};
pub use error::{ConfigError, SyncError};
pub use input_buffer::{Admission, InputBuffer, ScheduledStepEntry};
pub use replay::ReplayLog;
pub use roster::{EntityOwnership, OwnershipRegistry, Participant, Roster};
pub use session::Session;
pub use turn::TurnTracker;
pub use types::*;

/// Lockstep ticks per second
pub const DEFAULT_STEP_RATE: u32 = 20;

/// Seconds of input buffering used to absorb network jitter
pub const DEFAULT_BUFFER_DURATION_SECS: f64 = 0.10;

/// Participants per session
pub const DEFAULT_PARTICIPANT_COUNT: usize = 2;

/// Steps past the newest finalized step (plus the input delay) a submission may target
pub const MAX_STEPS_AHEAD: Step = 1024;
