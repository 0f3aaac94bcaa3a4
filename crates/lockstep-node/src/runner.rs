//! Fixed-rate frame loop shared by host and peer nodes

use lockstep_core::{
    Command, DigestSimulation, EntityId, LockstepDriver, Position, Step,
};
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Frame loop configuration
#[derive(Debug, Clone)]
pub struct FrameOptions {
    /// Frames per second
    pub frame_rate: u32,
    /// Issue an EndTurn after every N executed steps (0 = never)
    pub end_turn_every: u64,
    /// Order `units` to move every N executed steps (0 = never)
    pub move_every: u64,
    /// Entities this node commands
    pub units: Vec<EntityId>,
    /// Stop once this step is reached
    pub max_steps: Option<Step>,
    pub report_interval: Duration,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            frame_rate: 60,
            end_turn_every: 0,
            move_every: 0,
            units: Vec::new(),
            max_steps: None,
            report_interval: Duration::from_secs(5),
        }
    }
}

/// Advance `driver` by real elapsed time every frame until Ctrl+C or `max_steps`.
///
/// `report` runs every `report_interval`; an error from it ends the loop.
pub async fn run<F>(
    driver: &mut LockstepDriver<DigestSimulation>,
    options: &FrameOptions,
    mut report: F,
) -> anyhow::Result<()>
where
    F: FnMut(&LockstepDriver<DigestSimulation>) -> anyhow::Result<()>,
{
    let frame = Duration::from_secs_f64(1.0 / options.frame_rate.max(1) as f64);
    let mut ticker = interval(frame);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut last_frame = Instant::now();
    let mut last_report = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Instant::now();
                let budget = now - last_frame;
                last_frame = now;

                let before = driver.current_step();
                let outcome = driver.advance(budget);
                for step in before..driver.current_step() {
                    issue_orders(driver, options, step);
                }
                if outcome.stalled_at.is_some() {
                    tracing::trace!("Frame stalled at step {}", driver.current_step());
                }

                if let Some(max) = options.max_steps {
                    if driver.current_step() >= max {
                        tracing::info!("Reached step {}, stopping", max);
                        break;
                    }
                }

                if now - last_report >= options.report_interval {
                    last_report = now;
                    log_progress(driver);
                    report(driver)?;
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    log_progress(driver);
    Ok(())
}

/// Scripted orders issued after `step` executed
fn issue_orders(driver: &LockstepDriver<DigestSimulation>, options: &FrameOptions, step: Step) {
    let executed = (step + 1) as u64;
    if options.move_every > 0 && executed % options.move_every == 0 && !options.units.is_empty() {
        let angle = step as f32 * 0.1;
        let target = Position::new(angle.cos() * 10.0, angle.sin() * 10.0);
        driver.enqueue(Command::move_to(target), &options.units);
    }
    if options.end_turn_every > 0 && executed % options.end_turn_every == 0 {
        driver.enqueue(Command::end_turn(), &[]);
    }
}

fn log_progress(driver: &LockstepDriver<DigestSimulation>) {
    let stats = driver.stats();
    tracing::info!(
        "Step {} | turn {} | {} stalls | {} commands | digest {}",
        driver.current_step(),
        driver.turn(),
        stats.stalls,
        stats.commands_applied,
        driver.simulation().digest_prefix()
    );
}
