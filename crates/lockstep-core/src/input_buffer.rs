//! Input buffer - per-step submissions awaiting quorum
//!
//! Each step index owns its own slot and lock, so submissions for unrelated
//! steps never contend. The map shard lock is only held while looking a slot
//! up, never while a slot lock is awaited.

use crate::types::{Contribution, InputBatch, ParticipantId, Step};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

/// Submissions merged so far for one step
#[derive(Debug, Clone, Default)]
pub struct ScheduledStepEntry {
    /// Contributions in arrival order. Moved out when the entry finalizes.
    contributions: Vec<Contribution>,
    /// Everyone who contributed, kept after finalization to catch resubmissions
    contributors: Vec<ParticipantId>,
}

impl ScheduledStepEntry {
    pub fn contribution_count(&self) -> usize {
        self.contributors.len()
    }

    pub fn has_contributed(&self, participant: ParticipantId) -> bool {
        self.contributors.contains(&participant)
    }

    fn push(&mut self, participant: ParticipantId, batch: InputBatch) {
        self.contributors.push(participant);
        self.contributions.push(Contribution { participant, batch });
    }
}

#[derive(Debug, Default)]
struct StepSlot {
    finalized: AtomicBool,
    entry: Mutex<ScheduledStepEntry>,
}

/// Result of adding one submission to the buffer
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Accepted, quorum not yet reached
    Pending { contributions: usize },
    /// Accepted and this submission completed the quorum. Returned to exactly one caller per step.
    Complete { contributions: Vec<Contribution> },
    /// The participant already contributed to this step (or it is already final)
    Duplicate { contributions: usize },
    /// The step was finalized and retired before this submission arrived
    Stale,
}

/// Coordinator-side table of steps awaiting quorum
#[derive(Debug)]
pub struct InputBuffer {
    quorum: usize,
    slots: DashMap<Step, Arc<StepSlot>>,
    /// Highest step finalized so far
    horizon: AtomicI64,
}

impl InputBuffer {
    pub fn new(quorum: usize) -> Self {
        Self {
            quorum,
            slots: DashMap::new(),
            horizon: AtomicI64::new(Step::MIN),
        }
    }

    /// Add `participant`'s batch to the entry for `target`
    pub fn insert(&self, participant: ParticipantId, target: Step, batch: InputBatch) -> Admission {
        if target < self.horizon.load(Ordering::Acquire) && !self.slots.contains_key(&target) {
            return Admission::Stale;
        }

        let slot = self.slots.entry(target).or_default().value().clone();
        let mut entry = slot.entry.lock();

        if slot.finalized.load(Ordering::Acquire) || entry.has_contributed(participant) {
            return Admission::Duplicate {
                contributions: entry.contribution_count(),
            };
        }

        entry.push(participant, batch);
        let count = entry.contribution_count();
        if count < self.quorum {
            return Admission::Pending { contributions: count };
        }

        // Quorum reached: the flag flips under the slot lock, so only this caller sees it happen.
        slot.finalized.store(true, Ordering::Release);
        let contributions = std::mem::take(&mut entry.contributions);
        drop(entry);

        self.horizon.fetch_max(target, Ordering::AcqRel);
        self.retire_below(target);

        Admission::Complete { contributions }
    }

    /// Drop finalized slots older than `step`
    fn retire_below(&self, step: Step) {
        self.slots
            .retain(|slot_step, slot| *slot_step >= step || !slot.finalized.load(Ordering::Acquire));
    }

    /// Contributions received so far for `step`, if the step has a live slot
    pub fn contribution_count(&self, step: Step) -> Option<usize> {
        let slot = self.slots.get(&step)?.value().clone();
        let count = slot.entry.lock().contribution_count();
        Some(count)
    }

    /// Highest step finalized so far
    pub fn horizon(&self) -> Option<Step> {
        let horizon = self.horizon.load(Ordering::Acquire);
        (horizon != Step::MIN).then_some(horizon)
    }

    pub fn is_finalized(&self, step: Step) -> bool {
        match self.slots.get(&step) {
            Some(slot) => slot.finalized.load(Ordering::Acquire),
            None => step <= self.horizon.load(Ordering::Acquire),
        }
    }

    /// Steps that have submissions but no quorum yet
    pub fn pending_steps(&self) -> Vec<Step> {
        let mut steps: Vec<Step> = self
            .slots
            .iter()
            .filter(|slot| !slot.value().finalized.load(Ordering::Acquire))
            .map(|slot| *slot.key())
            .collect();
        steps.sort_unstable();
        steps
    }

    /// Discard every entry, finalized or not
    pub fn clear(&self) {
        self.slots.clear();
        self.horizon.store(Step::MIN, Ordering::Release);
    }
}
