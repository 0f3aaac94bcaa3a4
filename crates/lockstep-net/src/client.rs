//! Peer side of the WebSocket transport

use crate::error::NetError;
use crate::messages::SyncMessage;
use crate::HANDSHAKE_TIMEOUT_SECS;
use crossbeam_channel::{unbounded, Receiver};
use futures_util::{SinkExt, StreamExt};
use lockstep_core::{CanonicalEntry, InputBatch, ParticipantId, Step, SubmissionSink, SyncError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Connection to a remote coordinator
pub struct PeerClient {
    participant: ParticipantId,
    input_delay: Step,
    /// Canonical entries in arrival order, ready for a driver inbox
    entries: Receiver<CanonicalEntry>,
    sink: Arc<RemoteSink>,
    /// Cleared once the coordinator connection ends
    connected: Arc<AtomicBool>,
}

impl PeerClient {
    /// Connect to the coordinator server at `addr` and complete the handshake
    pub async fn connect(addr: &str, participant: ParticipantId) -> anyhow::Result<Self> {
        let url = format!("ws://{}", addr);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let hello = SyncMessage::Hello { participant };
        ws_sender.send(Message::Binary(hello.to_bytes())).await?;

        let timeout = Duration::from_secs(HANDSHAKE_TIMEOUT_SECS);
        let input_delay = loop {
            let frame = tokio::time::timeout(timeout, ws_receiver.next())
                .await
                .map_err(|_| NetError::HandshakeTimeout)?;

            match frame {
                Some(Ok(Message::Binary(data))) => match SyncMessage::from_bytes(&data)? {
                    SyncMessage::Welcome { input_delay, .. } => break input_delay,
                    SyncMessage::Rejected { reason } => {
                        return Err(NetError::Rejected {
                            participant,
                            reason,
                        }
                        .into())
                    }
                    other => {
                        return Err(NetError::UnexpectedMessage(other.kind().to_string()).into())
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(NetError::ConnectionClosed.into()),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => continue,
            }
        };

        tracing::info!(
            "Connected to coordinator at {} as {} (input delay {})",
            addr,
            participant,
            input_delay
        );

        let (entries_tx, entries) = unbounded::<CanonicalEntry>();
        // Unbounded: a submission is never dropped while the connection lives.
        // The driver stalls without its own finalized steps, which caps the backlog.
        let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<SyncMessage>();

        let connected = Arc::new(AtomicBool::new(true));
        let receiver_connected = connected.clone();

        // Spawn receiver task
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Binary(data)) => match SyncMessage::from_bytes(&data) {
                        Ok(SyncMessage::Finalized(entry)) => {
                            if entries_tx.send(entry).is_err() {
                                break;
                            }
                        }
                        Ok(SyncMessage::Heartbeat { step }) => {
                            tracing::trace!("Coordinator heartbeat at step {}", step);
                        }
                        Ok(other) => {
                            tracing::warn!("Unexpected {} from coordinator", other.kind());
                        }
                        Err(e) => {
                            tracing::warn!("Undecodable frame from coordinator: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::warn!("Coordinator closed connection");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            receiver_connected.store(false, Ordering::Release);
        });

        // Spawn sender task
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if ws_sender.send(Message::Binary(msg.to_bytes())).await.is_err() {
                    break;
                }
            }
            // Every sink handle is gone: leave cleanly so the host frees our slot
            let _ = ws_sender.close().await;
        });

        Ok(Self {
            participant,
            input_delay,
            entries,
            sink: Arc::new(RemoteSink {
                participant,
                msg_tx,
            }),
            connected,
        })
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Input delay announced by the coordinator
    pub fn input_delay(&self) -> Step {
        self.input_delay
    }

    /// Receiver of canonical entries, suitable as a driver inbox
    pub fn entries(&self) -> Receiver<CanonicalEntry> {
        self.entries.clone()
    }

    /// Submission handle for this peer's driver
    pub fn sink(&self) -> Arc<RemoteSink> {
        self.sink.clone()
    }
}

/// Forwards a driver's submissions over the connection
pub struct RemoteSink {
    participant: ParticipantId,
    msg_tx: mpsc::UnboundedSender<SyncMessage>,
}

impl RemoteSink {
    pub fn send_heartbeat(&self, step: Step) {
        let _ = self.msg_tx.send(SyncMessage::Heartbeat { step });
    }
}

impl SubmissionSink for RemoteSink {
    fn submit_batch(
        &self,
        participant: ParticipantId,
        source_step: Step,
        batch: InputBatch,
    ) -> Result<(), SyncError> {
        // The server attributes everything on this connection to its own participant
        if participant != self.participant {
            return Err(SyncError::UnknownParticipant(participant));
        }
        self.msg_tx
            .send(SyncMessage::Submit { source_step, batch })
            .map_err(|_| SyncError::ChannelClosed)
    }
}
