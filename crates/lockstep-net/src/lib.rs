//! Lockstep Net - WebSocket transport for the lockstep coordinator
//!
//! Architecture:
//! - The host runs a CoordinatorServer next to its Coordinator
//! - Peers connect with PeerClient and introduce themselves with Hello
//! - Submissions flow peer -> host, canonical entries flow host -> every peer
//! - All frames are borsh-encoded SyncMessages

pub mod broadcast;
pub mod client;
pub mod error;
pub mod messages;

pub use broadcast::{ChannelBroadcaster, CoordinatorServer};
pub use client::{PeerClient, RemoteSink};
pub use error::NetError;
pub use messages::SyncMessage;

/// Canonical entries buffered per connection before a slow peer lags
pub const BROADCAST_CAPACITY: usize = 1024;

/// How long either side waits for the handshake
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 5;
