//! Turn tracking - ready flags and the turn counter

use crate::types::{Command, ParticipantId};
use std::collections::BTreeMap;

/// Per-participant ready flags and a monotonic turn counter.
///
/// A turn ends only when every participant has issued `EndTurn` and the step
/// carrying the last of those commands has fully executed.
#[derive(Debug, Clone)]
pub struct TurnTracker {
    turn: u64,
    ready: BTreeMap<ParticipantId, bool>,
}

impl TurnTracker {
    pub fn new(participants: impl IntoIterator<Item = ParticipantId>) -> Self {
        Self {
            turn: 0,
            ready: participants.into_iter().map(|id| (id, false)).collect(),
        }
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn is_ready(&self, participant: ParticipantId) -> bool {
        self.ready.get(&participant).copied().unwrap_or(false)
    }

    pub fn all_ready(&self) -> bool {
        self.ready.values().all(|ready| *ready)
    }

    /// Observe an executed command. `EndTurn` readies its issuer.
    pub fn observe(&mut self, issuer: ParticipantId, command: &Command) {
        if !command.is_end_turn() {
            return;
        }
        match self.ready.get_mut(&issuer) {
            Some(ready) => *ready = true,
            None => tracing::warn!("EndTurn from {} who is not tracked for turns", issuer),
        }
    }

    /// Run once after all commands of a step applied. Returns the new turn number if the turn advanced.
    pub fn end_step(&mut self) -> Option<u64> {
        if self.ready.is_empty() || !self.all_ready() {
            return None;
        }
        self.ready.values_mut().for_each(|ready| *ready = false);
        self.turn += 1;
        Some(self.turn)
    }

    pub fn reset(&mut self) {
        self.turn = 0;
        self.ready.values_mut().for_each(|ready| *ready = false);
    }
}
