//! Coordinator server and peer clients talking over a real socket

use crossbeam_channel::Receiver;
use lockstep_core::{
    CanonicalEntry, Command, Coordinator, EntityId, EntityOwnership, Input, InputBatch,
    LockstepDriver, ParticipantId, Roster, Simulation, SubmissionSink, SyncConfig, TeamId,
};
use lockstep_net::{ChannelBroadcaster, CoordinatorServer, NetError, PeerClient};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const P1: ParticipantId = ParticipantId(1);
const P2: ParticipantId = ParticipantId(2);

async fn start_host(participants: usize) -> (Arc<Coordinator>, CoordinatorServer, SocketAddr) {
    let config = SyncConfig {
        participant_count: participants,
        ..Default::default()
    };
    let ownership: Arc<EntityOwnership> = Arc::new(
        [(EntityId(10), TeamId(1)), (EntityId(20), TeamId(2))]
            .into_iter()
            .collect(),
    );
    let broadcaster = Arc::new(ChannelBroadcaster::new());
    let coordinator = Arc::new(
        Coordinator::new(
            &config,
            Roster::sequential(participants).unwrap(),
            ownership,
            broadcaster.clone(),
        )
        .unwrap(),
    );
    let server = CoordinatorServer::new(coordinator.clone(), broadcaster);
    let addr = server.start("127.0.0.1:0").await.unwrap();
    (coordinator, server, addr)
}

async fn next_entry(entries: Receiver<CanonicalEntry>) -> CanonicalEntry {
    tokio::task::spawn_blocking(move || entries.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .expect("no canonical entry arrived")
}

#[tokio::test]
async fn test_both_peers_receive_the_same_entry() {
    let (_coordinator, server, addr) = start_host(2).await;
    let a = PeerClient::connect(&addr.to_string(), P1).await.unwrap();
    let b = PeerClient::connect(&addr.to_string(), P2).await.unwrap();
    assert_eq!(a.input_delay(), 2);
    assert_eq!(server.connected_peers(), 2);

    let attack = InputBatch::new(vec![Input::new(
        Command::attack(EntityId(20)),
        vec![EntityId(10), EntityId(20)],
    )]);
    a.sink().submit_batch(P1, 0, attack).unwrap();
    b.sink().submit_batch(P2, 0, InputBatch::empty()).unwrap();

    let from_a = next_entry(a.entries()).await;
    let from_b = next_entry(b.entries()).await;
    assert_eq!(from_a, from_b);
    assert_eq!(from_a.step, 2);

    // Arrival order across two connections is not fixed
    let mut participants: Vec<_> = from_a.contributions.iter().map(|c| c.participant).collect();
    participants.sort();
    assert_eq!(participants, vec![P1, P2]);

    // Enemy unit stripped from the selection, attack target untouched
    let from_p1 = from_a
        .contributions
        .iter()
        .find(|c| c.participant == P1)
        .unwrap();
    let input = &from_p1.batch.inputs[0];
    assert_eq!(input.selection, vec![EntityId(10)]);
    assert_eq!(input.command.target_entity, Some(EntityId(20)));
}

#[tokio::test]
async fn test_handshake_rejections() {
    let (_coordinator, _server, addr) = start_host(2).await;
    let _a = PeerClient::connect(&addr.to_string(), P1).await.unwrap();

    let err = PeerClient::connect(&addr.to_string(), P1).await.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<NetError>(),
        Some(NetError::Rejected { participant, .. }) if *participant == P1
    ));

    let err = PeerClient::connect(&addr.to_string(), ParticipantId(9))
        .await
        .err()
        .unwrap();
    assert!(matches!(err.downcast_ref::<NetError>(), Some(NetError::Rejected { .. })));
}

#[tokio::test]
async fn test_slot_frees_after_disconnect() {
    let (_coordinator, server, addr) = start_host(1).await;
    let a = PeerClient::connect(&addr.to_string(), P1).await.unwrap();
    assert!(server.is_connected(P1));
    drop(a);

    // Dropping the client ends both tasks and closes the socket
    for _ in 0..50 {
        if !server.is_connected(P1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!server.is_connected(P1));
    PeerClient::connect(&addr.to_string(), P1).await.unwrap();
}

#[tokio::test]
async fn test_burst_of_submissions_all_reach_coordinator() {
    let (coordinator, _server, addr) = start_host(1).await;
    let client = PeerClient::connect(&addr.to_string(), P1).await.unwrap();
    let sink = client.sink();

    // Far more than the socket writer can flush before the loop ends
    for source_step in -2..600 {
        sink.submit_batch(P1, source_step, InputBatch::empty()).unwrap();
    }

    let entries = client.entries();
    let steps = tokio::task::spawn_blocking(move || {
        (0..602)
            .map(|_| entries.recv_timeout(Duration::from_secs(5)).map(|e| e.step))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .unwrap()
    .expect("every submission should finalize");

    assert_eq!(steps, (0..602).collect::<Vec<_>>());
    assert_eq!(coordinator.stats().submissions_accepted, 602);
}

#[derive(Default)]
struct Counter {
    commands: usize,
}

impl Simulation for Counter {
    fn advance_physics(&mut self, _delta: Duration) {}

    fn apply_command(&mut self, _issuer: ParticipantId, _input: &Input) {
        self.commands += 1;
    }
}

#[tokio::test]
async fn test_remote_peer_drives_with_host() {
    let (coordinator, server, addr) = start_host(2).await;
    let client = PeerClient::connect(&addr.to_string(), P2).await.unwrap();

    let mut host = LockstepDriver::new(coordinator.timing(), coordinator.roster().ids(), Counter::default())
        .with_submitter(P1, coordinator.clone())
        .with_inbox(server.broadcaster().subscribe_local());
    let mut peer = LockstepDriver::new(coordinator.timing(), coordinator.roster().ids(), Counter::default())
        .with_submitter(P2, client.sink())
        .with_inbox(client.entries());

    host.begin_synchronization().unwrap();
    peer.begin_synchronization().unwrap();
    host.enqueue(Command::stop(), &[EntityId(10)]);
    peer.enqueue(Command::stop(), &[EntityId(20)]);

    for _ in 0..200 {
        if host.current_step() >= 6 && peer.current_step() >= 6 {
            break;
        }
        host.advance(Duration::from_millis(10));
        peer.advance(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(host.current_step() >= 6);
    assert!(peer.current_step() >= 6);
    assert_eq!(host.simulation().commands, 2);
    assert_eq!(peer.simulation().commands, 2);
}
