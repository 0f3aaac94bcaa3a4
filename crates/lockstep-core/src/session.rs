//! Listen-host session: the coordinator plus the host's own driver

use crate::broadcast::LocalFanout;
use crate::config::SyncConfig;
use crate::coordinator::Coordinator;
use crate::driver::{AdvanceOutcome, LockstepDriver, Simulation};
use crate::error::SyncError;
use crate::roster::{OwnershipRegistry, Roster};
use crate::types::{CanonicalEntry, ParticipantId};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

/// Explicit session context for a host that is also a participant.
///
/// The host's driver receives canonical entries through the same broadcast
/// path as every remote peer, so its commands are never applied twice.
pub struct Session<S> {
    coordinator: Arc<Coordinator>,
    driver: LockstepDriver<S>,
}

impl<S: Simulation> Session<S> {
    /// Wrap an existing coordinator. `inbox` must be subscribed to the coordinator's broadcaster.
    pub fn new(
        coordinator: Arc<Coordinator>,
        inbox: Receiver<CanonicalEntry>,
        participant: ParticipantId,
        simulation: S,
    ) -> Result<Self, SyncError> {
        if !coordinator.roster().contains(participant) {
            return Err(SyncError::UnknownParticipant(participant));
        }
        let driver = LockstepDriver::new(
            coordinator.timing(),
            coordinator.roster().ids(),
            simulation,
        )
        .with_submitter(participant, coordinator.clone())
        .with_inbox(inbox);

        Ok(Self {
            coordinator,
            driver,
        })
    }

    /// Self-contained session broadcasting through an in-process fanout.
    /// Returns the fanout so further local peers can subscribe.
    pub fn local(
        config: &SyncConfig,
        roster: Roster,
        ownership: Arc<dyn OwnershipRegistry>,
        participant: ParticipantId,
        simulation: S,
    ) -> Result<(Self, Arc<LocalFanout>), SyncError> {
        let fanout = Arc::new(LocalFanout::new());
        let inbox = fanout.subscribe();
        let coordinator = Arc::new(Coordinator::new(config, roster, ownership, fanout.clone())?);
        let session = Self::new(coordinator, inbox, participant, simulation)?;
        Ok((session, fanout))
    }

    pub fn begin_synchronization(&mut self) -> Result<(), SyncError> {
        self.driver.begin_synchronization()?;
        self.driver.pump();
        Ok(())
    }

    /// Advance the host's simulation. Entries completed by the host's own
    /// submissions are picked up within the same call.
    pub fn advance(&mut self, budget: Duration) -> AdvanceOutcome {
        self.driver.advance(budget)
    }

    /// Clear coordinator, clock, schedule and turn state together.
    ///
    /// Only call between sessions, with no submission in flight.
    pub fn reset(&mut self) {
        self.coordinator.reset();
        self.driver.reset();
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn driver(&self) -> &LockstepDriver<S> {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut LockstepDriver<S> {
        &mut self.driver
    }
}
