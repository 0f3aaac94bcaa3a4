//! Session configuration

use crate::error::ConfigError;
use crate::types::Step;
use crate::{DEFAULT_BUFFER_DURATION_SECS, DEFAULT_PARTICIPANT_COUNT, DEFAULT_STEP_RATE};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Lockstep session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lockstep ticks per second
    pub step_rate: u32,
    /// Seconds of network jitter to absorb by delaying inputs
    pub buffer_duration: f64,
    /// Fixed number of participants that must contribute to every step
    pub participant_count: usize,
    /// Keep every finalized entry in the replay log
    pub record_canonical_steps: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            step_rate: DEFAULT_STEP_RATE,
            buffer_duration: DEFAULT_BUFFER_DURATION_SECS,
            participant_count: DEFAULT_PARTICIPANT_COUNT,
            record_canonical_steps: false,
        }
    }
}

/// Step grid derived from a validated [`SyncConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Length of one step
    pub step_length: Duration,
    /// Number of steps a submission is deferred before it may execute
    pub input_delay: Step,
}

impl SyncConfig {
    /// Validate the configuration and derive the step grid
    pub fn timing(&self) -> Result<Timing, ConfigError> {
        if self.step_rate == 0 || u64::from(self.step_rate) > NANOS_PER_SEC {
            return Err(ConfigError::InvalidStepRate(self.step_rate));
        }
        if !self.buffer_duration.is_finite() || self.buffer_duration <= 0.0 {
            return Err(ConfigError::InvalidBufferDuration(self.buffer_duration));
        }
        if self.participant_count == 0 {
            return Err(ConfigError::NoParticipants);
        }

        let invalid_buffer = || ConfigError::InvalidBufferDuration(self.buffer_duration);
        let step_nanos = NANOS_PER_SEC / u64::from(self.step_rate);
        let buffer_nanos = Duration::try_from_secs_f64(self.buffer_duration)
            .map_err(|_| invalid_buffer())?
            .as_nanos();
        let input_delay = buffer_nanos.div_ceil(u128::from(step_nanos));
        let input_delay = Step::try_from(input_delay).map_err(|_| invalid_buffer())?;
        // With no delay a step's own submissions could never arrive before it executes
        if input_delay < 1 {
            return Err(invalid_buffer());
        }

        Ok(Timing {
            step_length: Duration::from_nanos(step_nanos),
            input_delay,
        })
    }
}

impl Timing {
    /// Virtual time at which `step` executes
    pub fn boundary(&self, step: Step) -> Duration {
        let index = u32::try_from(step.saturating_add(1).max(0)).unwrap_or(u32::MAX);
        self.step_length.saturating_mul(index)
    }
}
