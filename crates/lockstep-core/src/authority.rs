//! Authority filter - strips selected entities the issuer does not own

use crate::roster::{OwnershipRegistry, Participant};
use crate::types::{Input, InputBatch};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Redacts a participant's batch against team ownership before it becomes canonical.
///
/// Commanding another team's entities is not an error: those entities are
/// dropped from the selection and the command itself is kept.
pub struct AuthorityFilter {
    ownership: Arc<dyn OwnershipRegistry>,
    /// Total selected entities removed since the last reset
    stripped: AtomicU64,
}

impl AuthorityFilter {
    pub fn new(ownership: Arc<dyn OwnershipRegistry>) -> Self {
        Self {
            ownership,
            stripped: AtomicU64::new(0),
        }
    }

    /// Filter `batch` as issued by `issuer`
    pub fn filter(&self, issuer: &Participant, batch: InputBatch) -> InputBatch {
        let mut removed = 0u64;
        let inputs = batch
            .inputs
            .into_iter()
            .map(|input| {
                let before = input.selection.len();
                let input = self.filter_input(issuer, input);
                removed += (before - input.selection.len()) as u64;
                input
            })
            .collect();

        if removed > 0 {
            self.stripped.fetch_add(removed, Ordering::Relaxed);
            tracing::debug!(
                "Stripped {} unowned entities from {}'s batch",
                removed,
                issuer.id
            );
        }

        InputBatch { inputs }
    }

    fn filter_input(&self, issuer: &Participant, mut input: Input) -> Input {
        input
            .selection
            .retain(|entity| self.ownership.owner_team(*entity) == Some(issuer.team));
        input
    }

    /// Number of selected entities stripped since construction or the last reset
    pub fn stripped_count(&self) -> u64 {
        self.stripped.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.stripped.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::EntityOwnership;
    use crate::types::{Command, EntityId, ParticipantId, TeamId};

    fn filter() -> AuthorityFilter {
        let ownership: EntityOwnership = [
            (EntityId(10), TeamId(1)),
            (EntityId(11), TeamId(1)),
            (EntityId(20), TeamId(2)),
        ]
        .into_iter()
        .collect();
        AuthorityFilter::new(Arc::new(ownership))
    }

    fn player_one() -> Participant {
        Participant::new(ParticipantId(1), TeamId(1))
    }

    #[test]
    fn test_strips_enemy_selection_keeps_own() {
        let filter = filter();
        let batch = InputBatch::new(vec![Input::new(
            Command::attack(EntityId(20)),
            vec![EntityId(20), EntityId(10)],
        )]);

        let filtered = filter.filter(&player_one(), batch);
        assert_eq!(filtered.inputs[0].selection, vec![EntityId(10)]);
        // The attack target is not an owned actor and stays.
        assert_eq!(filtered.inputs[0].command.target_entity, Some(EntityId(20)));
        assert_eq!(filter.stripped_count(), 1);
    }

    #[test]
    fn test_unknown_entities_stripped() {
        let filter = filter();
        let batch = InputBatch::new(vec![Input::new(Command::stop(), vec![EntityId(99)])]);
        let filtered = filter.filter(&player_one(), batch);
        assert!(filtered.inputs[0].selection.is_empty());
    }

    #[test]
    fn test_empty_selection_still_forwarded() {
        let filter = filter();
        let batch = InputBatch::new(vec![
            Input::new(Command::end_turn(), vec![]),
            Input::new(Command::stop(), vec![EntityId(20)]),
        ]);
        let filtered = filter.filter(&player_one(), batch);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.inputs[0].command.is_end_turn());
        assert!(filtered.inputs[1].selection.is_empty());
    }

    #[test]
    fn test_filter_is_idempotent() {
        let filter = filter();
        let batch = InputBatch::new(vec![
            Input::new(Command::stop(), vec![EntityId(11), EntityId(20), EntityId(10)]),
            Input::new(Command::produce(), vec![EntityId(20)]),
        ]);

        let once = filter.filter(&player_one(), batch);
        let stripped = filter.stripped_count();
        let twice = filter.filter(&player_one(), once.clone());

        assert_eq!(once, twice);
        assert_eq!(filter.stripped_count(), stripped);
        assert_eq!(once.inputs[0].selection, vec![EntityId(11), EntityId(10)]);
    }
}
