//! Lockstep driver - advances one peer's simulation on the shared step grid
//!
//! Each peer runs exactly one driver, from a single fixed-rate timer:
//! - time moves freely between step boundaries
//! - a boundary is only crossed once its canonical entry has arrived
//! - otherwise the call stalls and the caller simply tries again next frame

use crate::clock::Clock;
use crate::command_queue::{CommandSender, LocalCommandQueue};
use crate::config::Timing;
use crate::coordinator::SubmissionSink;
use crate::error::SyncError;
use crate::turn::TurnTracker;
use crate::types::{CanonicalEntry, Command, EntityId, Input, InputBatch, ParticipantId, Step};
use crossbeam_channel::Receiver;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// The deterministic world a driver steps. Identical call sequences must
/// produce identical state on every peer.
pub trait Simulation {
    /// Integrate the world forward by `delta`
    fn advance_physics(&mut self, delta: Duration);

    /// Apply one canonical input on behalf of `issuer`
    fn apply_command(&mut self, issuer: ParticipantId, input: &Input);

    /// Every participant ended their turn; `turn` is the new turn number
    fn on_turn_advanced(&mut self, _turn: u64) {}
}

/// Result of one [`LockstepDriver::advance`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AdvanceOutcome {
    /// Virtual time moved or at least one step executed
    pub advanced: bool,
    /// Portion of the budget that was consumed
    pub consumed: Duration,
    pub steps_executed: u32,
    /// Boundary the call stopped at for lack of a finalized entry
    pub stalled_at: Option<Step>,
}

/// Driver counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct DriverStats {
    pub steps_executed: u64,
    pub commands_applied: u64,
    pub stalls: u64,
    pub turns_advanced: u64,
    pub submit_failures: u64,
}

struct Submitter {
    participant: ParticipantId,
    sink: Arc<dyn SubmissionSink>,
}

/// Owns one peer's clock, received schedule and turn state
pub struct LockstepDriver<S> {
    clock: Clock,
    /// Canonical entries received but not yet executed
    schedule: BTreeMap<Step, CanonicalEntry>,
    /// Broadcast channel the driver pulls entries from on its own
    inbox: Option<Receiver<CanonicalEntry>>,
    turns: TurnTracker,
    queue: LocalCommandQueue,
    /// None for spectators and replays
    submitter: Option<Submitter>,
    simulation: S,
    started: bool,
    last_stall: Option<Step>,
    stats: DriverStats,
}

impl<S: Simulation> LockstepDriver<S> {
    /// Create a driver that only executes what it is given (spectator/replay)
    pub fn new(
        timing: Timing,
        participants: impl IntoIterator<Item = ParticipantId>,
        simulation: S,
    ) -> Self {
        Self {
            clock: Clock::new(timing),
            schedule: BTreeMap::new(),
            inbox: None,
            turns: TurnTracker::new(participants),
            queue: LocalCommandQueue::new(),
            submitter: None,
            simulation,
            started: false,
            last_stall: None,
            stats: DriverStats::default(),
        }
    }

    /// Collect local commands as `participant` and send them to `sink` after every step
    pub fn with_submitter(mut self, participant: ParticipantId, sink: Arc<dyn SubmissionSink>) -> Self {
        self.submitter = Some(Submitter { participant, sink });
        self
    }

    /// Pull canonical entries from `inbox` whenever a boundary finds none scheduled
    pub fn with_inbox(mut self, inbox: Receiver<CanonicalEntry>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    /// Start stepping. A participating driver primes the input delay
    /// pipeline with empty batches for source steps `-input_delay..-1`.
    pub fn begin_synchronization(&mut self) -> Result<(), SyncError> {
        if let Some(submitter) = &self.submitter {
            let delay = self.clock.timing().input_delay;
            for source_step in -delay..0 {
                submitter
                    .sink
                    .submit_batch(submitter.participant, source_step, InputBatch::empty())?;
            }
            tracing::info!(
                "{} primed {} steps of input delay",
                submitter.participant,
                delay
            );
        }
        self.started = true;
        Ok(())
    }

    /// Accept a canonical entry from the coordinator
    pub fn deliver(&mut self, entry: CanonicalEntry) -> Result<(), SyncError> {
        let current = self.clock.current_step();
        if entry.step < current {
            return Err(SyncError::LateEntry {
                step: entry.step,
                current,
            });
        }
        if self.schedule.contains_key(&entry.step) {
            return Err(SyncError::DuplicateEntry(entry.step));
        }
        tracing::trace!("Scheduled step {} ({} commands)", entry.step, entry.command_count());
        self.schedule.insert(entry.step, entry);
        Ok(())
    }

    /// Move everything waiting in the inbox into the schedule
    pub fn pump(&mut self) -> usize {
        let entries: Vec<CanonicalEntry> = match &self.inbox {
            Some(inbox) => inbox.try_iter().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for entry in entries {
            match self.deliver(entry) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::error!("Dropped canonical entry: {}", e),
            }
        }
        delivered
    }

    fn take_entry(&mut self, step: Step) -> Option<CanonicalEntry> {
        if !self.schedule.contains_key(&step) {
            self.pump();
        }
        self.schedule.remove(&step)
    }

    /// Spend up to `budget` of virtual time, executing every boundary step
    /// whose entry has arrived.
    ///
    /// Stalling on the first boundary leaves time untouched. Stalling on a
    /// later one keeps the steps already executed and stops exactly on the
    /// last crossed boundary.
    pub fn advance(&mut self, budget: Duration) -> AdvanceOutcome {
        let mut outcome = AdvanceOutcome::default();
        if !self.started {
            return outcome;
        }

        let mut remaining = budget;
        loop {
            let to_boundary = self.clock.time_to_boundary();
            if remaining <= to_boundary {
                if !remaining.is_zero() {
                    self.step_physics(remaining);
                    outcome.consumed += remaining;
                }
                break;
            }

            let step = self.clock.current_step();
            let Some(entry) = self.take_entry(step) else {
                self.record_stall(step);
                outcome.stalled_at = Some(step);
                break;
            };

            if !to_boundary.is_zero() {
                self.step_physics(to_boundary);
            }
            outcome.consumed += to_boundary;
            remaining -= to_boundary;

            self.execute_step(entry);
            outcome.steps_executed += 1;
        }

        outcome.advanced = !outcome.consumed.is_zero() || outcome.steps_executed > 0;
        outcome
    }

    fn step_physics(&mut self, delta: Duration) {
        self.simulation.advance_physics(delta);
        self.clock.advance_time(delta);
    }

    fn record_stall(&mut self, step: Step) {
        self.stats.stalls += 1;
        if self.last_stall == Some(step) {
            tracing::trace!("Still waiting on inputs for step {}", step);
        } else {
            tracing::warn!("Inputs for step {} not received, stalling", step);
            self.last_stall = Some(step);
        }
    }

    /// Apply a step's commands, check the turn, send local input, move to the next boundary
    fn execute_step(&mut self, entry: CanonicalEntry) {
        let step = entry.step;
        debug_assert_eq!(step, self.clock.current_step());

        for (issuer, input) in entry.inputs() {
            self.simulation.apply_command(issuer, input);
            self.turns.observe(issuer, &input.command);
            self.stats.commands_applied += 1;
        }

        if let Some(turn) = self.turns.end_step() {
            tracing::info!("All participants ready, turn {} begins at step {}", turn, step);
            self.stats.turns_advanced += 1;
            self.simulation.on_turn_advanced(turn);
        }

        if let Some(submitter) = &self.submitter {
            let batch = self.queue.drain();
            if let Err(e) = submitter.sink.submit_batch(submitter.participant, step, batch) {
                tracing::error!("Failed to submit inputs for step {}: {}", step, e);
                self.stats.submit_failures += 1;
            }
        }

        self.clock.complete_step();
        self.stats.steps_executed += 1;
    }

    /// Queue a command to go out with the next submission
    pub fn enqueue(&self, command: Command, selection: &[EntityId]) {
        self.queue.enqueue(command, selection);
    }

    /// Handle for issuing commands from another thread
    pub fn command_sender(&self) -> CommandSender {
        self.queue.sender()
    }

    /// Return to step 0 and time 0 with no scheduled entries and no ready flags.
    ///
    /// Only call between sessions. The simulation itself is left alone.
    pub fn reset(&mut self) {
        self.clock.reset();
        self.schedule.clear();
        if let Some(inbox) = &self.inbox {
            inbox.try_iter().for_each(drop);
        }
        self.turns.reset();
        self.queue.clear();
        self.started = false;
        self.last_stall = None;
        self.stats = DriverStats::default();
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        self.submitter.as_ref().map(|s| s.participant)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// The next boundary's entry has arrived
    pub fn is_ready_to_execute(&self) -> bool {
        self.schedule.contains_key(&self.clock.current_step())
    }

    pub fn current_step(&self) -> Step {
        self.clock.current_step()
    }

    pub fn current_time(&self) -> Duration {
        self.clock.current_time()
    }

    pub fn timing(&self) -> Timing {
        self.clock.timing()
    }

    pub fn turn(&self) -> u64 {
        self.turns.turn()
    }

    pub fn turns(&self) -> &TurnTracker {
        &self.turns
    }

    /// Steps received and waiting to execute
    pub fn scheduled_steps(&self) -> Vec<Step> {
        self.schedule.keys().copied().collect()
    }

    pub fn stats(&self) -> DriverStats {
        self.stats.clone()
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.simulation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::types::Contribution;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        physics: Vec<Duration>,
        applied: Vec<(ParticipantId, Command)>,
        turns: Vec<u64>,
    }

    impl Simulation for Recorder {
        fn advance_physics(&mut self, delta: Duration) {
            self.physics.push(delta);
        }

        fn apply_command(&mut self, issuer: ParticipantId, input: &Input) {
            self.applied.push((issuer, input.command.clone()));
        }

        fn on_turn_advanced(&mut self, turn: u64) {
            self.turns.push(turn);
        }
    }

    #[derive(Default)]
    struct CapturingSink {
        submitted: Mutex<Vec<(ParticipantId, Step, InputBatch)>>,
    }

    impl SubmissionSink for CapturingSink {
        fn submit_batch(
            &self,
            participant: ParticipantId,
            source_step: Step,
            batch: InputBatch,
        ) -> Result<(), SyncError> {
            self.submitted.lock().push((participant, source_step, batch));
            Ok(())
        }
    }

    const P1: ParticipantId = ParticipantId(1);
    const P2: ParticipantId = ParticipantId(2);

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    fn timing() -> Timing {
        SyncConfig::default().timing().unwrap()
    }

    fn spectator() -> LockstepDriver<Recorder> {
        let mut driver = LockstepDriver::new(timing(), [P1, P2], Recorder::default());
        driver.begin_synchronization().unwrap();
        driver
    }

    fn entry(step: Step, inputs: Vec<(ParticipantId, Command)>) -> CanonicalEntry {
        CanonicalEntry {
            step,
            contributions: inputs
                .into_iter()
                .map(|(participant, command)| Contribution {
                    participant,
                    batch: InputBatch::new(vec![Input::new(command, vec![])]),
                })
                .collect(),
        }
    }

    #[test]
    fn test_not_started_does_nothing() {
        let mut driver = LockstepDriver::new(timing(), [P1], Recorder::default());
        let outcome = driver.advance(ms(10));
        assert!(!outcome.advanced);
        assert_eq!(driver.current_time(), Duration::ZERO);
    }

    #[test]
    fn test_advance_within_step() {
        let mut driver = spectator();
        let outcome = driver.advance(ms(30));
        assert!(outcome.advanced);
        assert_eq!(outcome.consumed, ms(30));
        assert_eq!(driver.current_time(), ms(30));
        assert_eq!(driver.simulation().physics, vec![ms(30)]);
    }

    #[test]
    fn test_budget_equal_to_boundary_does_not_cross() {
        let mut driver = spectator();
        let outcome = driver.advance(ms(50));
        assert_eq!(outcome.steps_executed, 0);
        assert_eq!(driver.current_time(), ms(50));
        assert_eq!(driver.current_step(), 0);
    }

    #[test]
    fn test_stall_leaves_time_untouched() {
        let mut driver = spectator();
        driver.advance(ms(30));

        let outcome = driver.advance(ms(40));
        assert!(!outcome.advanced);
        assert_eq!(outcome.consumed, Duration::ZERO);
        assert_eq!(outcome.stalled_at, Some(0));
        assert_eq!(driver.current_time(), ms(30));
        assert_eq!(driver.simulation().physics, vec![ms(30)]);

        driver.advance(ms(40));
        assert_eq!(driver.stats().stalls, 2);
    }

    #[test]
    fn test_crossing_executes_in_entry_order() {
        let mut driver = spectator();
        driver
            .deliver(entry(0, vec![(P2, Command::stop()), (P1, Command::produce())]))
            .unwrap();

        let outcome = driver.advance(ms(70));
        assert!(outcome.advanced);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(outcome.consumed, ms(70));
        assert_eq!(driver.current_step(), 1);
        assert_eq!(driver.simulation().physics, vec![ms(50), ms(20)]);

        let issuers: Vec<_> = driver.simulation().applied.iter().map(|(p, _)| *p).collect();
        assert_eq!(issuers, vec![P2, P1]);
    }

    #[test]
    fn test_multiple_boundaries_in_one_call() {
        let mut driver = spectator();
        driver.deliver(entry(0, vec![])).unwrap();
        driver.deliver(entry(1, vec![])).unwrap();
        driver.deliver(entry(2, vec![])).unwrap();

        let outcome = driver.advance(ms(160));
        assert_eq!(outcome.steps_executed, 3);
        assert_eq!(outcome.stalled_at, None);
        assert_eq!(driver.current_step(), 3);
        assert_eq!(driver.current_time(), ms(160));
    }

    #[test]
    fn test_later_stall_keeps_executed_steps() {
        let mut driver = spectator();
        driver.deliver(entry(0, vec![])).unwrap();

        let outcome = driver.advance(ms(120));
        assert!(outcome.advanced);
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(outcome.stalled_at, Some(1));
        assert_eq!(outcome.consumed, ms(50));
        assert_eq!(driver.current_time(), ms(50));
    }

    #[test]
    fn test_stall_keeps_fixed_grid() {
        let mut driver = spectator();
        driver.advance(ms(45));
        driver.advance(ms(100));
        driver.deliver(entry(0, vec![])).unwrap();

        driver.advance(ms(10));
        assert_eq!(driver.current_step(), 1);
        assert_eq!(driver.current_time(), ms(55));
        assert_eq!(driver.clock.next_step_time(), ms(100));
    }

    #[test]
    fn test_late_and_duplicate_entries_rejected() {
        let mut driver = spectator();
        driver.deliver(entry(0, vec![])).unwrap();
        assert_eq!(
            driver.deliver(entry(0, vec![])),
            Err(SyncError::DuplicateEntry(0))
        );

        driver.advance(ms(60));
        assert_eq!(
            driver.deliver(entry(0, vec![])),
            Err(SyncError::LateEntry { step: 0, current: 1 })
        );
    }

    #[test]
    fn test_priming_and_collection() {
        let sink = Arc::new(CapturingSink::default());
        let mut driver = LockstepDriver::new(timing(), [P1, P2], Recorder::default())
            .with_submitter(P1, sink.clone());
        driver.begin_synchronization().unwrap();

        {
            let submitted = sink.submitted.lock();
            let steps: Vec<_> = submitted.iter().map(|(_, s, _)| *s).collect();
            assert_eq!(steps, vec![-2, -1]);
            assert!(submitted.iter().all(|(p, _, b)| *p == P1 && b.is_empty()));
        }

        driver.enqueue(Command::stop(), &[EntityId(4)]);
        driver.deliver(entry(0, vec![])).unwrap();
        driver.advance(ms(60));

        let submitted = sink.submitted.lock();
        assert_eq!(submitted.len(), 3);
        let (participant, source_step, batch) = &submitted[2];
        assert_eq!((*participant, *source_step), (P1, 0));
        assert_eq!(batch.inputs[0].selection, vec![EntityId(4)]);
    }

    #[test]
    fn test_end_turn_advances_after_step() {
        let mut driver = spectator();
        driver.deliver(entry(0, vec![(P1, Command::end_turn())])).unwrap();
        driver
            .deliver(entry(1, vec![(P2, Command::end_turn()), (P2, Command::stop())]))
            .unwrap();

        driver.advance(ms(60));
        assert_eq!(driver.turn(), 0);
        assert!(driver.turns().is_ready(P1));

        driver.advance(ms(50));
        assert_eq!(driver.turn(), 1);
        assert!(!driver.turns().is_ready(P1));
        assert_eq!(driver.simulation().turns, vec![1]);
        assert_eq!(driver.stats().turns_advanced, 1);
    }

    #[test]
    fn test_inbox_pulled_at_boundary() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut driver = LockstepDriver::new(timing(), [P1, P2], Recorder::default()).with_inbox(rx);
        driver.begin_synchronization().unwrap();

        tx.send(entry(0, vec![(P1, Command::stop())])).unwrap();
        tx.send(entry(1, vec![])).unwrap();
        let outcome = driver.advance(ms(110));
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(driver.simulation().applied.len(), 1);

        tx.send(entry(2, vec![])).unwrap();
        driver.reset();
        assert_eq!(driver.pump(), 0);
    }

    #[test]
    fn test_reset() {
        let mut driver = spectator();
        driver.deliver(entry(0, vec![(P1, Command::end_turn())])).unwrap();
        driver.deliver(entry(1, vec![])).unwrap();
        driver.advance(ms(60));
        driver.reset();

        assert!(!driver.is_started());
        assert_eq!(driver.current_step(), 0);
        assert_eq!(driver.current_time(), Duration::ZERO);
        assert!(driver.scheduled_steps().is_empty());
        assert!(!driver.turns().is_ready(P1));
    }
}
