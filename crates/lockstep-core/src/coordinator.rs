//! Coordinator - merges submissions, detects quorum, filters and broadcasts

use crate::authority::AuthorityFilter;
use crate::broadcast::Broadcaster;
use crate::config::{SyncConfig, Timing};
use crate::error::{ConfigError, SyncError};
use crate::input_buffer::{Admission, InputBuffer};
use crate::replay::ReplayLog;
use crate::roster::{OwnershipRegistry, Roster};
use crate::types::{CanonicalEntry, Contribution, InputBatch, ParticipantId, Step};
use crate::MAX_STEPS_AHEAD;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Where a participant's batches go. The coordinator itself for a listen host,
/// a network client for a remote peer.
pub trait SubmissionSink: Send + Sync {
    fn submit_batch(
        &self,
        participant: ParticipantId,
        source_step: Step,
        batch: InputBatch,
    ) -> Result<(), SyncError>;
}

/// What happened to one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored; the step still waits for other participants
    Pending { step: Step, contributions: usize },
    /// This submission completed the quorum and the step was broadcast
    Finalized { step: Step, commands: usize },
    /// Rejected: the participant already contributed to this step
    Duplicate { step: Step, contributions: usize },
    /// Rejected: the step was finalized and retired long ago
    Stale { step: Step },
}

impl SubmitOutcome {
    /// Step the submission was scheduled for
    pub fn step(&self) -> Step {
        match self {
            Self::Pending { step, .. }
            | Self::Finalized { step, .. }
            | Self::Duplicate { step, .. }
            | Self::Stale { step } => *step,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Pending { .. } | Self::Finalized { .. })
    }
}

/// Coordinator counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub submissions_accepted: u64,
    pub duplicates_rejected: u64,
    pub stale_rejected: u64,
    pub steps_finalized: u64,
    pub last_finalized_step: Option<Step>,
    pub entities_stripped: u64,
}

/// Counters bumped on the submit path; read as a [`CoordinatorStats`] snapshot
#[derive(Debug, Default)]
struct Counters {
    submissions_accepted: AtomicU64,
    duplicates_rejected: AtomicU64,
    stale_rejected: AtomicU64,
    steps_finalized: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.submissions_accepted,
            &self.duplicates_rejected,
            &self.stale_rejected,
            &self.steps_finalized,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Authoritative merge point for every participant's inputs
pub struct Coordinator {
    timing: Timing,
    roster: Roster,
    buffer: InputBuffer,
    filter: AuthorityFilter,
    broadcaster: Arc<dyn Broadcaster>,
    replay: Option<ReplayLog>,
    counters: Counters,
}

impl Coordinator {
    /// Create a coordinator. Fails if the configuration or roster is invalid.
    pub fn new(
        config: &SyncConfig,
        roster: Roster,
        ownership: Arc<dyn OwnershipRegistry>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Result<Self, ConfigError> {
        let timing = config.timing()?;
        roster.expect_size(config.participant_count)?;

        tracing::info!(
            "Coordinator ready: {} participants, {:?} steps, input delay {}",
            roster.len(),
            timing.step_length,
            timing.input_delay
        );

        Ok(Self {
            timing,
            buffer: InputBuffer::new(roster.len()),
            roster,
            filter: AuthorityFilter::new(ownership),
            broadcaster,
            replay: config.record_canonical_steps.then(ReplayLog::new),
            counters: Counters::default(),
        })
    }

    /// Schedule `participant`'s batch from `source_step` for `source_step + input_delay`
    pub fn submit(
        &self,
        participant: ParticipantId,
        source_step: Step,
        batch: InputBatch,
    ) -> Result<SubmitOutcome, SyncError> {
        if !self.roster.contains(participant) {
            return Err(SyncError::UnknownParticipant(participant));
        }

        let step = self.target_step(source_step)?;
        let outcome = match self.buffer.insert(participant, step, batch) {
            Admission::Pending { contributions } => {
                Counters::bump(&self.counters.submissions_accepted);
                SubmitOutcome::Pending { step, contributions }
            }
            Admission::Complete { contributions } => {
                Counters::bump(&self.counters.submissions_accepted);
                let commands = self.finalize(step, contributions);
                SubmitOutcome::Finalized { step, commands }
            }
            Admission::Duplicate { contributions } => {
                tracing::warn!(
                    "Duplicate submission from {} for step {} rejected",
                    participant,
                    step
                );
                Counters::bump(&self.counters.duplicates_rejected);
                SubmitOutcome::Duplicate { step, contributions }
            }
            Admission::Stale => {
                tracing::warn!(
                    "Submission from {} for retired step {} rejected",
                    participant,
                    step
                );
                Counters::bump(&self.counters.stale_rejected);
                SubmitOutcome::Stale { step }
            }
        };

        Ok(outcome)
    }

    /// Map a source step onto the grid, refusing anything before the priming
    /// steps or too far past the newest finalized step.
    fn target_step(&self, source_step: Step) -> Result<Step, SyncError> {
        let delay = self.timing.input_delay;
        let earliest = -delay;
        let latest = self
            .buffer
            .horizon()
            .unwrap_or(-1)
            .saturating_add(MAX_STEPS_AHEAD);

        match source_step.checked_add(delay) {
            Some(step) if source_step >= earliest && step <= latest.saturating_add(delay) => Ok(step),
            _ => Err(SyncError::StepOutOfRange {
                source_step,
                earliest,
                latest,
            }),
        }
    }

    /// Filter, record and broadcast a step that just reached quorum
    fn finalize(&self, step: Step, contributions: Vec<Contribution>) -> usize {
        let contributions = contributions
            .into_iter()
            .map(|c| {
                let batch = match self.roster.get(c.participant) {
                    Some(issuer) => self.filter.filter(issuer, c.batch),
                    None => InputBatch::empty(),
                };
                Contribution {
                    participant: c.participant,
                    batch,
                }
            })
            .collect();
        let entry = CanonicalEntry { step, contributions };

        if let Some(replay) = &self.replay {
            replay.record(&entry);
        }

        self.broadcaster.broadcast(&entry);

        let commands = entry.command_count();
        Counters::bump(&self.counters.steps_finalized);

        tracing::debug!("Step {} finalized: {} commands", step, commands);
        commands
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn input_delay(&self) -> Step {
        self.timing.input_delay
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Contributions received so far for a step still held in the buffer
    pub fn contribution_count(&self, step: Step) -> Option<usize> {
        self.buffer.contribution_count(step)
    }

    pub fn pending_steps(&self) -> Vec<Step> {
        self.buffer.pending_steps()
    }

    /// Selected entities stripped by the authority filter
    pub fn stripped_count(&self) -> u64 {
        self.filter.stripped_count()
    }

    /// Replay log, if canonical step recording is enabled
    pub fn replay(&self) -> Option<&ReplayLog> {
        self.replay.as_ref()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let counters = &self.counters;
        CoordinatorStats {
            submissions_accepted: counters.submissions_accepted.load(Ordering::Relaxed),
            duplicates_rejected: counters.duplicates_rejected.load(Ordering::Relaxed),
            stale_rejected: counters.stale_rejected.load(Ordering::Relaxed),
            steps_finalized: counters.steps_finalized.load(Ordering::Relaxed),
            last_finalized_step: self.buffer.horizon(),
            entities_stripped: self.filter.stripped_count(),
        }
    }

    /// Discard every buffered entry, recorded step and counter.
    ///
    /// Only call between sessions, with no `submit` in flight.
    pub fn reset(&self) {
        self.buffer.clear();
        self.filter.reset();
        if let Some(replay) = &self.replay {
            replay.clear();
        }
        self.counters.reset();
        tracing::info!("Coordinator reset");
    }
}

impl SubmissionSink for Coordinator {
    fn submit_batch(
        &self,
        participant: ParticipantId,
        source_step: Step,
        batch: InputBatch,
    ) -> Result<(), SyncError> {
        self.submit(participant, source_step, batch).map(|_| ())
    }
}
