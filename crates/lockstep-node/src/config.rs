//! Node Configuration

use anyhow::Context;
use lockstep_core::{
    ConfigError, EntityId, EntityOwnership, Participant, Roster, SyncConfig, TeamId,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which team owns an entity when the session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityAssignment {
    pub entity: EntityId,
    pub team: TeamId,
}

/// Session description shared by the host and every peer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub sync: SyncConfig,
    /// Empty means `1..=participant_count`, one team each
    pub roster: Vec<Participant>,
    pub entities: Vec<EntityAssignment>,
}

impl NodeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn roster(&self) -> Result<Roster, ConfigError> {
        if self.roster.is_empty() {
            Roster::sequential(self.sync.participant_count)
        } else {
            Roster::new(self.roster.iter().copied())
        }
    }

    pub fn ownership(&self) -> EntityOwnership {
        self.entities.iter().map(|a| (a.entity, a.team)).collect()
    }

    /// Entities a participant on `team` may command
    pub fn owned_by(&self, team: TeamId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|a| a.team == team)
            .map(|a| a.entity)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::{OwnershipRegistry, ParticipantId};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "sync": {{ "step_rate": 30, "participant_count": 3 }},
                "roster": [
                    {{ "id": 1, "team": 1 }},
                    {{ "id": 2, "team": 1 }},
                    {{ "id": 7, "team": 2 }}
                ],
                "entities": [
                    {{ "entity": 100, "team": 1 }},
                    {{ "entity": 101, "team": 1 }},
                    {{ "entity": 200, "team": 2 }}
                ]
            }}"#
        )
        .unwrap();

        let config = NodeConfig::load(file.path()).unwrap();
        assert_eq!(config.sync.step_rate, 30);
        assert_eq!(config.sync.buffer_duration, SyncConfig::default().buffer_duration);

        let roster = config.roster().unwrap();
        roster.expect_size(config.sync.participant_count).unwrap();
        assert_eq!(roster.get(ParticipantId(7)).unwrap().team, TeamId(2));

        assert_eq!(config.owned_by(TeamId(1)), vec![EntityId(100), EntityId(101)]);
        assert_eq!(config.ownership().owner_team(EntityId(200)), Some(TeamId(2)));
    }

    #[test]
    fn test_empty_roster_is_sequential() {
        let config = NodeConfig::default();
        let roster = config.roster().unwrap();
        assert_eq!(roster.ids().collect::<Vec<_>>(), vec![ParticipantId(1), ParticipantId(2)]);
        assert!(config.ownership().is_empty());
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_oversized_participant_count_rejected() {
        let config: NodeConfig =
            serde_json::from_str(r#"{ "sync": { "participant_count": 4294967297 } }"#).unwrap();
        assert_eq!(
            config.roster(),
            Err(ConfigError::TooManyParticipants(4_294_967_297))
        );
    }

    #[test]
    fn test_duplicate_roster_entry_rejected() {
        let config = NodeConfig {
            roster: vec![
                Participant::new(ParticipantId(1), TeamId(1)),
                Participant::new(ParticipantId(1), TeamId(2)),
            ],
            ..Default::default()
        };
        assert_eq!(
            config.roster(),
            Err(ConfigError::DuplicateParticipant(ParticipantId(1)))
        );
    }

    #[test]
    fn test_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(NodeConfig::load(&dir.path().join("absent.json")).is_err());

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(NodeConfig::load(&path).is_err());
    }
}
