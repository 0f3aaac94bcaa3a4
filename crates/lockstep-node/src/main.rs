//! Lockstep Node
//!
//! Runs one participant of a lockstep session.
//! Host mode also runs the coordinator and accepts peer connections;
//! peer mode connects to a host.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use lockstep_core::{
    Coordinator, DigestSimulation, LockstepDriver, ParticipantId, Session,
};
use lockstep_net::{ChannelBroadcaster, CoordinatorServer, PeerClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod runner;

use config::NodeConfig;
use runner::FrameOptions;

/// Node mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Host mode - runs the coordinator and plays as one participant
    Host,
    /// Peer mode - connects to a host
    Peer,
}

/// Deterministic lockstep session node
#[derive(Parser, Debug)]
#[command(name = "lockstep")]
#[command(about = "Lockstep input synchronization host and peer", long_about = None)]
struct Args {
    /// Node mode (host or peer)
    #[arg(long, value_enum, default_value = "host")]
    mode: Mode,

    /// Participant id this node plays as
    #[arg(long, default_value = "1")]
    participant: u32,

    /// Coordinator bind address (host mode)
    #[arg(long, default_value = "127.0.0.1:9100")]
    bind: String,

    /// Coordinator address to connect to (peer mode)
    #[arg(long, default_value = "127.0.0.1:9100")]
    host_addr: String,

    /// JSON session config (roster, entity ownership, sync settings)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lockstep steps per second
    #[arg(long)]
    step_rate: Option<u32>,

    /// Input buffer in seconds
    #[arg(long)]
    buffer: Option<f64>,

    /// Number of participants
    #[arg(long)]
    participants: Option<usize>,

    /// Keep every canonical step (host mode)
    #[arg(long)]
    record: bool,

    /// Frames per second driving the simulation
    #[arg(long, default_value = "60")]
    frame_rate: u32,

    /// End the turn every N steps (0 = never)
    #[arg(long, default_value = "0")]
    end_turn_every: u64,

    /// Move owned units every N steps (0 = never)
    #[arg(long, default_value = "0")]
    move_every: u64,

    /// Exit after this many steps
    #[arg(long)]
    steps: Option<i64>,

    /// Seconds between progress reports
    #[arg(long, default_value = "5")]
    report_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&args)?;

    match args.mode {
        Mode::Host => run_host(args, config).await,
        Mode::Peer => run_peer(args, config).await,
    }
}

/// Config file first, then command line overrides
fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };

    if let Some(step_rate) = args.step_rate {
        config.sync.step_rate = step_rate;
    }
    if let Some(buffer) = args.buffer {
        config.sync.buffer_duration = buffer;
    }
    if let Some(participants) = args.participants {
        config.sync.participant_count = participants;
    }
    if args.record {
        config.sync.record_canonical_steps = true;
    }
    Ok(config)
}

fn frame_options(args: &Args, config: &NodeConfig, participant: ParticipantId) -> Result<FrameOptions> {
    let roster = config.roster()?;
    let team = roster
        .get(participant)
        .map(|p| p.team)
        .ok_or_else(|| anyhow::anyhow!("{} is not on the roster", participant))?;

    Ok(FrameOptions {
        frame_rate: args.frame_rate,
        end_turn_every: args.end_turn_every,
        move_every: args.move_every,
        units: config.owned_by(team),
        max_steps: args.steps,
        report_interval: Duration::from_secs(args.report_secs.max(1)),
    })
}

/// Run in host mode - coordinator plus the host's own participant
async fn run_host(args: Args, config: NodeConfig) -> Result<()> {
    let participant = ParticipantId(args.participant);
    let options = frame_options(&args, &config, participant)?;

    tracing::info!("Starting lockstep node - HOST MODE");
    tracing::info!("  Participant: {}", participant);
    tracing::info!("  Step rate: {}Hz", config.sync.step_rate);
    tracing::info!("  Participants: {}", config.sync.participant_count);
    tracing::info!("  Frame rate: {}fps", args.frame_rate);

    let broadcaster = Arc::new(ChannelBroadcaster::new());
    let coordinator = Arc::new(Coordinator::new(
        &config.sync,
        config.roster()?,
        Arc::new(config.ownership()),
        broadcaster.clone(),
    )?);

    let server = CoordinatorServer::new(coordinator.clone(), broadcaster.clone());
    let addr = server.start(&args.bind).await?;

    let mut session = Session::new(
        coordinator.clone(),
        broadcaster.subscribe_local(),
        participant,
        DigestSimulation::new(),
    )?;
    session.begin_synchronization()?;

    tracing::info!("Host running. Peers can connect to {}.", addr);
    tracing::info!("Press Ctrl+C to stop.");

    runner::run(session.driver_mut(), &options, |driver| {
        broadcaster.broadcast_heartbeat(driver.current_step());
        let stats = coordinator.stats();
        tracing::info!(
            "{} peers connected | {} steps finalized | {} duplicates | {} stale | {} entities stripped",
            server.connected_peers(),
            stats.steps_finalized,
            stats.duplicates_rejected,
            stats.stale_rejected,
            stats.entities_stripped
        );
        Ok(())
    })
    .await?;

    if let Some(replay) = coordinator.replay() {
        tracing::info!("Recorded {} canonical steps", replay.len());
    }
    tracing::info!("Host stopped");

    Ok(())
}

/// Run in peer mode - connect to a host and follow its canonical stream
async fn run_peer(args: Args, config: NodeConfig) -> Result<()> {
    let participant = ParticipantId(args.participant);
    let options = frame_options(&args, &config, participant)?;

    let timing = config.sync.timing()?;
    let roster = config.roster()?;
    roster.expect_size(config.sync.participant_count)?;

    tracing::info!("Starting lockstep node - PEER MODE");
    tracing::info!("  Participant: {}", participant);
    tracing::info!("  Connecting to host: {}", args.host_addr);

    let client = PeerClient::connect(&args.host_addr, participant).await?;
    if client.input_delay() != timing.input_delay {
        anyhow::bail!(
            "Host runs with input delay {}, local config gives {}",
            client.input_delay(),
            timing.input_delay
        );
    }

    let mut driver = LockstepDriver::new(timing, roster.ids(), DigestSimulation::new())
        .with_submitter(participant, client.sink())
        .with_inbox(client.entries());
    driver.begin_synchronization()?;

    tracing::info!("Connected. Press Ctrl+C to stop.");

    let sink = client.sink();
    runner::run(&mut driver, &options, |driver| {
        if !client.is_connected() {
            anyhow::bail!("Lost connection to host");
        }
        sink.send_heartbeat(driver.current_step());
        Ok(())
    })
    .await?;

    tracing::info!("Peer stopped");

    Ok(())
}
