//! Coordinator side of the WebSocket transport
//!
//! The host runs CoordinatorServer, peers connect with PeerClient

use crate::error::NetError;
use crate::messages::SyncMessage;
use crate::{BROADCAST_CAPACITY, HANDSHAKE_TIMEOUT_SECS};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lockstep_core::{Broadcaster, CanonicalEntry, Coordinator, LocalFanout, ParticipantId, Step};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

type WsSender = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsReceiver = SplitStream<WebSocketStream<TcpStream>>;

/// Broadcaster handing every canonical entry to all connected peers and to
/// the host's own driver
pub struct ChannelBroadcaster {
    /// Encoded frames for remote connections
    tx: broadcast::Sender<Vec<u8>>,
    /// In-process subscribers (the host's participant)
    local: LocalFanout,
    entries_sent: AtomicU64,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            local: LocalFanout::new(),
            entries_sent: AtomicU64::new(0),
        }
    }

    /// Frame stream for one remote connection
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.tx.subscribe()
    }

    /// Inbox for a driver running in this process
    pub fn subscribe_local(&self) -> crossbeam_channel::Receiver<CanonicalEntry> {
        self.local.subscribe()
    }

    pub fn broadcast_heartbeat(&self, step: Step) {
        let msg = SyncMessage::Heartbeat { step };
        let _ = self.tx.send(msg.to_bytes());
    }

    pub fn remote_subscribers(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn entries_sent(&self) -> u64 {
        self.entries_sent.load(Ordering::Relaxed)
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, entry: &CanonicalEntry) {
        let data = SyncMessage::Finalized(entry.clone()).to_bytes();
        match self.tx.send(data) {
            Ok(n) => {
                tracing::debug!("Broadcast step {} to {} remote peers", entry.step, n);
            }
            Err(_) => {
                // No remote peers connected
            }
        }
        self.local.broadcast(entry);
        self.entries_sent.fetch_add(1, Ordering::Relaxed);
    }
}

/// Accepts peer connections and feeds their submissions to the coordinator
pub struct CoordinatorServer {
    coordinator: Arc<Coordinator>,
    broadcaster: Arc<ChannelBroadcaster>,
    /// Participants with a live connection
    connected: Arc<RwLock<HashSet<ParticipantId>>>,
}

impl CoordinatorServer {
    /// `broadcaster` must be the one `coordinator` was built with
    pub fn new(coordinator: Arc<Coordinator>, broadcaster: Arc<ChannelBroadcaster>) -> Self {
        Self {
            coordinator,
            broadcaster,
            connected: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Start listening for peer connections, returning the bound address
    pub async fn start(&self, addr: &str) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!("Coordinator server listening on {}", local_addr);

        let coordinator = self.coordinator.clone();
        let broadcaster = self.broadcaster.clone();
        let connected = self.connected.clone();

        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        tracing::info!("Peer connected from {}", peer_addr);
                        let coordinator = coordinator.clone();
                        let broadcaster = broadcaster.clone();
                        let connected = connected.clone();

                        tokio::spawn(async move {
                            if let Err(e) =
                                handle_peer_connection(stream, coordinator, broadcaster, connected)
                                    .await
                            {
                                tracing::warn!("Peer connection error from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    }
                }
            }
        });

        Ok(local_addr)
    }

    pub fn connected_peers(&self) -> usize {
        self.connected.read().len()
    }

    pub fn is_connected(&self, participant: ParticipantId) -> bool {
        self.connected.read().contains(&participant)
    }

    pub fn broadcaster(&self) -> &Arc<ChannelBroadcaster> {
        &self.broadcaster
    }
}

async fn handle_peer_connection(
    stream: TcpStream,
    coordinator: Arc<Coordinator>,
    broadcaster: Arc<ChannelBroadcaster>,
    connected: Arc<RwLock<HashSet<ParticipantId>>>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let participant = match await_hello(&mut ws_receiver).await {
        Ok(participant) => participant,
        Err(e) => {
            reject(&mut ws_sender, e.to_string()).await;
            return Err(e.into());
        }
    };

    if !coordinator.roster().contains(participant) {
        reject(&mut ws_sender, format!("{} is not on the roster", participant)).await;
        anyhow::bail!("unknown participant {}", participant);
    }
    if !connected.write().insert(participant) {
        reject(&mut ws_sender, format!("{} is already connected", participant)).await;
        anyhow::bail!("duplicate connection for {}", participant);
    }

    // Subscribe before Welcome: no step involving this peer can finalize earlier.
    let rx = broadcaster.subscribe();
    let result = serve_participant(participant, ws_sender, ws_receiver, rx, coordinator).await;

    connected.write().remove(&participant);
    tracing::info!("{} disconnected", participant);
    result
}

async fn await_hello(ws_receiver: &mut WsReceiver) -> Result<ParticipantId, NetError> {
    let timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
    loop {
        let frame = tokio::time::timeout(timeout, ws_receiver.next())
            .await
            .map_err(|_| NetError::HandshakeTimeout)?;

        match frame {
            Some(Ok(Message::Binary(data))) => {
                return match SyncMessage::from_bytes(&data) {
                    Ok(SyncMessage::Hello { participant }) => Ok(participant),
                    Ok(other) => Err(NetError::UnexpectedMessage(other.kind().to_string())),
                    Err(e) => Err(NetError::UnexpectedMessage(e.to_string())),
                };
            }
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                return Err(NetError::ConnectionClosed)
            }
            // Ping/pong before the handshake
            Some(Ok(_)) => continue,
        }
    }
}

async fn reject(ws_sender: &mut WsSender, reason: String) {
    tracing::warn!("Rejecting peer: {}", reason);
    let msg = SyncMessage::Rejected { reason };
    let _ = ws_sender.send(Message::Binary(msg.to_bytes())).await;
    let _ = ws_sender.close().await;
}

async fn serve_participant(
    participant: ParticipantId,
    mut ws_sender: WsSender,
    mut ws_receiver: WsReceiver,
    mut rx: broadcast::Receiver<Vec<u8>>,
    coordinator: Arc<Coordinator>,
) -> anyhow::Result<()> {
    let welcome = SyncMessage::Welcome {
        participant,
        input_delay: coordinator.input_delay(),
    };
    ws_sender.send(Message::Binary(welcome.to_bytes())).await?;
    tracing::info!("{} joined", participant);

    // Forward canonical entries to this peer
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(data) => {
                    if ws_sender.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // The skipped steps are gone for good; this peer will stall.
                    tracing::error!("{} lagged {} messages", participant, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    // Submissions are handled in arrival order, one at a time per peer
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => match SyncMessage::from_bytes(&data) {
                Ok(SyncMessage::Submit { source_step, batch }) => {
                    match coordinator.submit(participant, source_step, batch) {
                        Ok(outcome) => {
                            tracing::trace!("{} submission: {:?}", participant, outcome);
                        }
                        Err(e) => {
                            tracing::warn!("{} submission failed: {}", participant, e);
                        }
                    }
                }
                Ok(SyncMessage::Heartbeat { step }) => {
                    tracing::trace!("{} heartbeat at step {}", participant, step);
                }
                Ok(other) => {
                    tracing::warn!("{} sent unexpected {}", participant, other.kind());
                }
                Err(e) => {
                    tracing::warn!("{} sent an undecodable frame: {}", participant, e);
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error from {}: {}", participant, e);
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    Ok(())
}
