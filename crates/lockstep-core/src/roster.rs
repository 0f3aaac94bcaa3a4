//! Session participants and entity ownership

use crate::error::ConfigError;
use crate::types::{EntityId, ParticipantId, TeamId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A participant slot in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub team: TeamId,
}

impl Participant {
    pub fn new(id: ParticipantId, team: TeamId) -> Self {
        Self { id, team }
    }
}

/// Fixed set of participants for one session, ordered by id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    participants: BTreeMap<ParticipantId, Participant>,
}

impl Roster {
    /// Build a roster, rejecting duplicate ids and an empty participant list
    pub fn new(participants: impl IntoIterator<Item = Participant>) -> Result<Self, ConfigError> {
        let mut map = BTreeMap::new();
        for participant in participants {
            if map.insert(participant.id, participant).is_some() {
                return Err(ConfigError::DuplicateParticipant(participant.id));
            }
        }
        if map.is_empty() {
            return Err(ConfigError::NoParticipants);
        }
        Ok(Self { participants: map })
    }

    /// `count` participants with ids `1..=count`, each on its own team
    pub fn sequential(count: usize) -> Result<Self, ConfigError> {
        let last = u32::try_from(count).map_err(|_| ConfigError::TooManyParticipants(count))?;
        Self::new((1..=last).map(|id| Participant::new(ParticipantId(id), TeamId(id))))
    }

    /// Check the roster against the configured participant count
    pub fn expect_size(&self, expected: usize) -> Result<(), ConfigError> {
        if self.len() != expected {
            return Err(ConfigError::RosterSize {
                expected,
                actual: self.len(),
            });
        }
        Ok(())
    }

    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.participants.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

/// Answers which team owns an entity. Supplied by the world, not by this crate.
pub trait OwnershipRegistry: Send + Sync {
    fn owner_team(&self, entity: EntityId) -> Option<TeamId>;
}

/// Minimal concurrent entity-to-team table
#[derive(Debug, Default)]
pub struct EntityOwnership {
    owners: DashMap<EntityId, TeamId>,
}

impl EntityOwnership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or transfer) ownership of an entity
    pub fn assign(&self, entity: EntityId, team: TeamId) {
        self.owners.insert(entity, team);
    }

    /// Forget an entity, e.g. after it was destroyed
    pub fn remove(&self, entity: EntityId) -> Option<TeamId> {
        self.owners.remove(&entity).map(|(_, team)| team)
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl FromIterator<(EntityId, TeamId)> for EntityOwnership {
    fn from_iter<I: IntoIterator<Item = (EntityId, TeamId)>>(iter: I) -> Self {
        Self {
            owners: iter.into_iter().collect(),
        }
    }
}

impl OwnershipRegistry for EntityOwnership {
    fn owner_team(&self, entity: EntityId) -> Option<TeamId> {
        self.owners.get(&entity).map(|team| *team)
    }
}
