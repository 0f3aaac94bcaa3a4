//! Virtual simulation clock on a fixed step grid

use crate::config::Timing;
use crate::types::Step;
use std::time::Duration;

/// Tracks virtual time and the step whose boundary comes next.
///
/// Step `s` executes when virtual time reaches `(s + 1) * step_length`. The
/// boundary is always recomputed from the step index, so stalls never shift
/// the grid.
#[derive(Debug, Clone)]
pub struct Clock {
    timing: Timing,
    /// Next step to execute
    current_step: Step,
    /// Virtual time elapsed since the session started
    current_time: Duration,
    /// Time of the boundary at which `current_step` executes
    next_step_time: Duration,
}

impl Clock {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            current_step: 0,
            current_time: Duration::ZERO,
            next_step_time: timing.boundary(0),
        }
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn current_step(&self) -> Step {
        self.current_step
    }

    pub fn current_time(&self) -> Duration {
        self.current_time
    }

    pub fn next_step_time(&self) -> Duration {
        self.next_step_time
    }

    /// Virtual time left before the next boundary
    pub fn time_to_boundary(&self) -> Duration {
        self.next_step_time.saturating_sub(self.current_time)
    }

    /// Move virtual time forward without crossing a boundary
    pub(crate) fn advance_time(&mut self, delta: Duration) {
        debug_assert!(delta <= self.time_to_boundary());
        self.current_time += delta;
    }

    /// Mark the current step executed and move to the next boundary
    pub(crate) fn complete_step(&mut self) {
        self.current_step += 1;
        self.next_step_time = self.timing.boundary(self.current_step);
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.timing);
    }
}
