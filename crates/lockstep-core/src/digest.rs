//! Reference simulation that only fingerprints what it is asked to do.
//!
//! Two peers that executed the same canonical stream end with the same
//! digest, which makes it a cheap desync detector.

use crate::driver::Simulation;
use crate::types::{Input, ParticipantId};
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct DigestSimulation {
    hasher: blake3::Hasher,
    elapsed: Duration,
    commands_applied: u64,
    turn: u64,
}

impl DigestSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Running fingerprint of every applied command and turn change
    pub fn digest(&self) -> [u8; 32] {
        *self.hasher.finalize().as_bytes()
    }

    /// Short hex prefix for log lines
    pub fn digest_prefix(&self) -> String {
        self.digest()[..4].iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Total physics time integrated so far
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn commands_applied(&self) -> u64 {
        self.commands_applied
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }
}

impl Simulation for DigestSimulation {
    fn advance_physics(&mut self, delta: Duration) {
        // Frame pacing differs per peer, so only the total is tracked.
        self.elapsed += delta;
    }

    fn apply_command(&mut self, issuer: ParticipantId, input: &Input) {
        let encoded = borsh::to_vec(input).expect("Input serialization should not fail");
        self.hasher.update(&issuer.0.to_le_bytes());
        self.hasher.update(&encoded);
        self.commands_applied += 1;
    }

    fn on_turn_advanced(&mut self, turn: u64) {
        self.hasher.update(b"turn");
        self.hasher.update(&turn.to_le_bytes());
        self.turn = turn;
    }
}
