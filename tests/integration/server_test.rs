//! Integration tests for the WebSocket front end

use crate::harness::{fix_along, saved_sprint, test_config};
use futures::{SinkExt, StreamExt};
use hawkspeed::geometry::PositionFix;
use hawkspeed::networking::{ClientMessage, PlayerUpdate, RaceServer, ServerMessage};
use hawkspeed::racing::{ProgressWriter, RaceCoordinator};
use hawkspeed::session::SessionRegistry;
use hawkspeed::storage::{Database, RaceStore};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn player_update(fix: PositionFix) -> PlayerUpdate {
    PlayerUpdate {
        latitude: fix.latitude,
        longitude: fix.longitude,
        rotation: fix.bearing,
        speed: fix.speed_ms,
        logged_at: fix.logged_at,
    }
}

/// Start a server with a one second idle timeout.
async fn serve(db: Arc<Database>) -> SocketAddr {
    let mut config = test_config();
    config.server.bind_address = "127.0.0.1:0".to_string();
    config.server.idle_timeout_secs = 1;
    let config = Arc::new(config);

    let store: Arc<dyn RaceStore> = db;
    let registry = Arc::new(SessionRegistry::new(64));
    let (progress, _task) = ProgressWriter::spawn(Arc::clone(&store), Duration::from_millis(10));
    let coordinator = Arc::new(RaceCoordinator::new(store, registry, progress, Arc::clone(&config)));

    let server = RaceServer::new(config, coordinator);
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { server.run(listener).await });
    addr
}

async fn send(client: &mut Client, msg: &ClientMessage) {
    client.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
}

async fn recv(client: &mut Client) -> Option<ServerMessage> {
    loop {
        match client.next().await? {
            Ok(Message::Text(text)) => return Some(ServerMessage::from_json(&text).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

async fn join(addr: SocketAddr, user_id: Uuid) -> Client {
    let (mut client, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    send(&mut client, &ClientMessage::Join { user_id }).await;
    match recv(&mut client).await {
        Some(ServerMessage::Welcome { .. }) => client,
        other => panic!("expected welcome, got {:?}", other),
    }
}

/// Test a silent spectator is kicked even while updates stream to it
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spectator_idle_timeout() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let track = saved_sprint(&db, 0.0);
    let addr = serve(db).await;

    let mut spectator = join(addr, Uuid::new_v4()).await;
    send(
        &mut spectator,
        &ClientMessage::Spectate {
            track_id: Some(track.id),
        },
    )
    .await;

    let mut racer = join(addr, Uuid::new_v4()).await;
    send(
        &mut racer,
        &ClientMessage::StartRace {
            track_id: track.id,
            started_position: player_update(fix_along(&track, 0.0, 0)),
            countdown_position: None,
            fake: false,
        },
    )
    .await;
    assert!(matches!(recv(&mut racer).await, Some(ServerMessage::RaceStarted { .. })));

    // Racer keeps driving for three seconds, well past the idle timeout
    let driver = tokio::spawn(async move {
        let (mut write, mut read) = racer.split();
        tokio::spawn(async move { while read.next().await.is_some() {} });
        for step in 1..=20i64 {
            let update = ClientMessage::PlayerUpdate(player_update(fix_along(&track, step as f64 * 10.0, step)));
            if write.send(Message::Text(update.to_json().unwrap())).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    });

    let mut updates = 0;
    let kicked = tokio::time::timeout(Duration::from_millis(2500), async {
        loop {
            match recv(&mut spectator).await {
                Some(ServerMessage::SpectatorUpdate(_)) => updates += 1,
                Some(ServerMessage::Kicked { reason }) => return Some(reason),
                Some(_) => continue,
                None => return None,
            }
        }
    })
    .await
    .expect("spectator was never kicked");

    assert_eq!(kicked.as_deref(), Some("idle timeout"));
    assert!(updates > 0);
    driver.abort();
}

/// Test a viewport with its corners swapped is refused
#[tokio::test]
async fn test_invalid_viewport() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    saved_sprint(&db, 0.0);
    let addr = serve(db).await;

    let mut client = join(addr, Uuid::new_v4()).await;
    send(
        &mut client,
        &ClientMessage::Viewport {
            south_west: hawkspeed::GeoPoint::new(1.0, -1.0),
            north_east: hawkspeed::GeoPoint::new(-1.0, 1.0),
        },
    )
    .await;
    match recv(&mut client).await {
        Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "invalid-viewport"),
        other => panic!("expected an error, got {:?}", other),
    }

    send(
        &mut client,
        &ClientMessage::Viewport {
            south_west: hawkspeed::GeoPoint::new(-1.0, -1.0),
            north_east: hawkspeed::GeoPoint::new(1.0, 1.0),
        },
    )
    .await;
    match recv(&mut client).await {
        Some(ServerMessage::TracksInView { tracks }) => assert_eq!(tracks.len(), 1),
        other => panic!("expected tracks, got {:?}", other),
    }
}
