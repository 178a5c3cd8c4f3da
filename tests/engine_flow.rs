mod common;

use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use tokio::sync::watch;

use caballus_driver::config::Config;
use caballus_driver::engine::{Command, Engine, Snapshot};
use caballus_driver::entities::{PositionFix, TrackingPhase};
use caballus_driver::lifecycle::RideState;
use caballus_driver::realtime::memory::{self, ServerEnd};
use caballus_driver::realtime::messages::{InboundMessage, OutboundMessage};

use common::{offer, FakeAPI, PICKUP};

async fn wait_for(
    snapshots: &mut watch::Receiver<Snapshot>,
    what: &str,
    done: impl Fn(&Snapshot) -> bool,
) -> Snapshot {
    let wait = async {
        loop {
            {
                let snapshot = snapshots.borrow_and_update();
                if done(&*snapshot) {
                    return (*snapshot).clone();
                }
            }
            snapshots.changed().await.expect("engine gone");
        }
    };

    tokio::time::timeout(Duration::from_secs(3), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what))
}

async fn next_message(server: &ServerEnd) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(2), server.recv())
        .await
        .expect("no message from the driver")
        .expect("connection closed")
}

async fn send_fix(fixes: &Sender<PositionFix>, lat: f64) {
    fixes.send(PositionFix::new(lat, PICKUP.1)).await.unwrap();
}

#[tokio::test]
async fn offer_to_pickup_with_telemetry_across_a_dropped_connection() {
    let api = FakeAPI::new();
    let (connector, incoming) = memory::pair();
    let config = Config {
        token: "session-token".into(),
        driver_id: Some("D1".into()),
        location_interval: Duration::from_secs(0),
        ..Config::default()
    };

    let (engine, mut snapshots) = Engine::new(config, api.clone(), Arc::new(connector));
    let (commands, command_rx) = async_channel::unbounded();
    let (fixes, fix_rx) = async_channel::unbounded();
    let running = tokio::spawn(engine.run(command_rx, fix_rx));

    commands.send(Command::GoOnline).await.unwrap();
    let server = incoming.recv().await.unwrap();

    match next_message(&server).await {
        OutboundMessage::Auth { token, .. } => assert_eq!(token, "session-token"),
        other => panic!("expected auth first, got {:?}", other),
    }

    // wait for the startup reconciliation so samples carry ride context
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while api.count("find_active_ride").await == 0 {
        assert!(tokio::time::Instant::now() < deadline, "no reconciliation");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    server
        .push(&InboundMessage::NewRideAssignment(offer("R1")))
        .await
        .unwrap();
    let offered = wait_for(&mut snapshots, "offer", |s| s.state == RideState::Offered).await;
    assert_eq!(offered.countdown_remaining, Some(15));
    assert!(offered.online);

    commands.send(Command::Accept).await.unwrap();
    let navigating = wait_for(&mut snapshots, "accept", |s| {
        s.state == RideState::NavigatingToPickup
    })
    .await;
    assert_eq!(navigating.active_ride.map(|r| r.ride.id), Some("R1".to_string()));

    send_fix(&fixes, 52.1400).await;
    match next_message(&server).await {
        OutboundMessage::DriverLocation(location) => {
            assert_eq!(location.ride_id.as_deref(), Some("R1"));
            assert_eq!(location.tracking_phase, TrackingPhase::NavigatingToPickup);
        }
        other => panic!("expected a live location, got {:?}", other),
    }

    // the backend goes away; samples pile up in the buffer
    server.hang_up();
    send_fix(&fixes, 52.1390).await;
    send_fix(&fixes, 52.1380).await;
    wait_for(&mut snapshots, "buffering", |s| s.buffered_samples == 2).await;

    commands.send(Command::GoOffline).await.unwrap();
    wait_for(&mut snapshots, "offline", |s| !s.online).await;

    // dropped while offline
    send_fix(&fixes, 52.1370).await;
    while !fixes.is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    commands.send(Command::GoOnline).await.unwrap();
    let server = incoming.recv().await.unwrap();
    assert_eq!(next_message(&server).await.name(), "auth");
    wait_for(&mut snapshots, "online again", |s| s.online).await;

    // reconnecting reconciles again before samples are tagged with the ride
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while api.count("find_active_ride").await < 3 {
        assert!(tokio::time::Instant::now() < deadline, "no reconciliation after reconnect");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    send_fix(&fixes, 52.1340).await;

    match next_message(&server).await {
        OutboundMessage::LocationBatch { points } => {
            let lats: Vec<f64> = points.iter().map(|p| p.lat).collect();
            assert_eq!(lats, vec![52.1390, 52.1380]);
        }
        other => panic!("expected the buffered batch, got {:?}", other),
    }
    match next_message(&server).await {
        OutboundMessage::DriverLocation(location) => {
            assert_eq!(location.lat, 52.1340);
            assert_eq!(location.ride_id.as_deref(), Some("R1"));
            assert_eq!(location.tracking_phase, TrackingPhase::NavigatingToPickup);
        }
        other => panic!("expected a live location, got {:?}", other),
    }

    // arrival falls back to the last known position
    commands
        .send(Command::Arrive { position: None })
        .await
        .unwrap();
    wait_for(&mut snapshots, "arrival", |s| s.state == RideState::ArrivedAtPickup).await;

    commands.send(Command::Chat("I'm outside".into())).await.unwrap();
    match next_message(&server).await {
        OutboundMessage::ChatMessage { ride_id, text, .. } => {
            assert_eq!(ride_id, "R1");
            assert_eq!(text, "I'm outside");
        }
        other => panic!("expected a chat message, got {:?}", other),
    }

    server
        .push(&InboundMessage::RideCancelled {
            ride_id: Some("R1".into()),
            reason: Some("rider cancelled".into()),
        })
        .await
        .unwrap();
    let cancelled = wait_for(&mut snapshots, "cancellation", |s| s.state == RideState::Idle).await;
    assert!(cancelled.active_ride.is_none());
    assert!(cancelled.chat.is_empty());
    assert_eq!(
        cancelled.notices,
        vec!["The ride was cancelled: rider cancelled".to_string()]
    );

    commands.send(Command::Shutdown).await.unwrap();
    running.await.unwrap().unwrap();

    assert_eq!(api.count("status D1 true").await, 2);
    assert_eq!(api.count("arrive R1").await, 1);
}
