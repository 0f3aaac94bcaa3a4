//! Core value types shared by the coordinator and every peer

use bitflags::bitflags;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Step index on the lockstep grid. Priming submissions use negative source steps.
pub type Step = i64;

/// Identifier of a participant in a session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ParticipantId(pub u32);

/// Team a participant plays for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TeamId(pub u32);

/// Identifier of a simulated entity (unit, building, ...)
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
    BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct EntityId(pub u32);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "team{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// What a command asks the selected entities to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum CommandKind {
    Stop,
    Move,
    Attack,
    Produce,
    /// Marks the issuer ready to end the current turn
    EndTurn,
}

bitflags! {
    /// Modifier keys held while issuing a command
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CommandModifiers: u8 {
        const ALTERNATE_ONE = 1;
        const ALTERNATE_TWO = 1 << 1;
        /// Also sets the rally point from the target fields
        const SET_RALLY = 1 << 2;
        /// Appends to the entity's order queue instead of replacing it
        const QUEUE = 1 << 3;
    }
}

impl BorshSerialize for CommandModifiers {
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        BorshSerialize::serialize(&self.bits(), writer)
    }
}

impl BorshDeserialize for CommandModifiers {
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        let bits = u8::deserialize_reader(reader)?;
        Self::from_bits(bits).ok_or_else(|| {
            borsh::io::Error::new(
                borsh::io::ErrorKind::InvalidData,
                format!("unknown command modifier bits {:#04x}", bits),
            )
        })
    }
}

/// A point on the simulation plane
#[derive(Debug, Clone, Copy, PartialEq, Default, BorshSerialize, BorshDeserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// A single command. Pure data, never a reference into live simulation state.
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub modifiers: CommandModifiers,
    /// Entity the command is aimed at (the unit being attacked, followed, ...)
    pub target_entity: Option<EntityId>,
    /// World position the command is aimed at
    pub target_position: Option<Position>,
}

impl Command {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            modifiers: CommandModifiers::empty(),
            target_entity: None,
            target_position: None,
        }
    }

    pub fn stop() -> Self {
        Self::new(CommandKind::Stop)
    }

    pub fn move_to(position: Position) -> Self {
        Self::new(CommandKind::Move).at(position)
    }

    pub fn attack(target: EntityId) -> Self {
        Self::new(CommandKind::Attack).targeting(target)
    }

    pub fn produce() -> Self {
        Self::new(CommandKind::Produce)
    }

    pub fn end_turn() -> Self {
        Self::new(CommandKind::EndTurn)
    }

    pub fn with_modifiers(mut self, modifiers: CommandModifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn targeting(mut self, entity: EntityId) -> Self {
        self.target_entity = Some(entity);
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.target_position = Some(position);
        self
    }

    pub fn is_end_turn(&self) -> bool {
        self.kind == CommandKind::EndTurn
    }
}

/// A command together with the entities that were selected when it was issued
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Input {
    pub command: Command,
    /// Entities the command acts through. Subject to the authority filter.
    pub selection: Vec<EntityId>,
}

impl Input {
    pub fn new(command: Command, selection: Vec<EntityId>) -> Self {
        Self { command, selection }
    }
}

/// Everything one participant issued during one source step
#[derive(Debug, Clone, PartialEq, Default, BorshSerialize, BorshDeserialize)]
pub struct InputBatch {
    pub inputs: Vec<Input>,
}

impl InputBatch {
    pub fn new(inputs: Vec<Input>) -> Self {
        Self { inputs }
    }

    /// The batch used to prime the input delay pipeline
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }
}

/// One participant's batch inside a step entry
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct Contribution {
    pub participant: ParticipantId,
    pub batch: InputBatch,
}

/// Finalized, authority-filtered inputs for one step, identical on every peer
#[derive(Debug, Clone, PartialEq, BorshSerialize, BorshDeserialize)]
pub struct CanonicalEntry {
    pub step: Step,
    /// Contributions in coordinator arrival order
    pub contributions: Vec<Contribution>,
}

impl CanonicalEntry {
    /// Every input in execution order, paired with its issuer
    pub fn inputs(&self) -> impl Iterator<Item = (ParticipantId, &Input)> + '_ {
        self.contributions
            .iter()
            .flat_map(|c| c.batch.inputs.iter().map(move |input| (c.participant, input)))
    }

    pub fn command_count(&self) -> usize {
        self.contributions.iter().map(|c| c.batch.len()).sum()
    }

    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("CanonicalEntry serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}
