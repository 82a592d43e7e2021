//! WebSocket front end.
//!
//! One task per connection owns the [`PlayerSession`] and its race engine.
//! Outbound frames go through a bounded channel to a writer task so a slow
//! client never blocks the read side.

use super::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::geometry::BoundingBox;
use crate::racing::{RaceCoordinator, RaceEvent};
use crate::session::{InvalidationReason, PlayerSession};
use crate::storage::ServerConfig;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

/// Frame encoding a client is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Json,
    Binary,
}

impl Encoding {
    pub fn encode(&self, msg: &ServerMessage) -> Result<Message, ProtocolError> {
        Ok(match self {
            Encoding::Json => Message::Text(msg.to_json()?),
            Encoding::Binary => Message::Binary(msg.to_bytes()?),
        })
    }
}

/// Decode a client frame. `None` for frames that carry no message.
pub fn decode_frame(frame: &Message) -> Option<(Encoding, Result<ClientMessage, ProtocolError>)> {
    match frame {
        Message::Text(text) => Some((Encoding::Json, ClientMessage::from_json(text))),
        Message::Binary(bytes) => Some((Encoding::Binary, ClientMessage::from_bytes(bytes))),
        _ => None,
    }
}

/// Race server.
pub struct RaceServer {
    config: Arc<ServerConfig>,
    coordinator: Arc<RaceCoordinator>,
}

impl RaceServer {
    pub fn new(config: Arc<ServerConfig>, coordinator: Arc<RaceCoordinator>) -> Self {
        Self { config, coordinator }
    }

    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.server.bind_address).await?;
        tracing::info!("Listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn run(&self, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            tracing::debug!("Accepted connection from {}", addr);

            let coordinator = Arc::clone(&self.coordinator);
            let config = Arc::clone(&self.config);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, coordinator, config).await {
                    tracing::warn!("Connection from {} ended with error: {}", addr, e);
                }
            });
        }
    }
}

struct Outbound {
    tx: mpsc::Sender<Message>,
    encoding: Encoding,
}

impl Outbound {
    async fn send(&self, msg: &ServerMessage) -> anyhow::Result<()> {
        let frame = self.encoding.encode(msg)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| anyhow::anyhow!("writer closed"))
    }

    async fn close(&self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    coordinator: Arc<RaceCoordinator>,
    config: Arc<ServerConfig>,
) -> anyhow::Result<()> {
    let ws_stream = accept_async(stream).await?;
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let (tx, mut rx) = mpsc::channel::<Message>(config.server.outbound_buffer.max(1));

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_write.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    let idle = Duration::from_secs(config.server.idle_timeout_secs);
    let mut out = Outbound {
        tx,
        encoding: Encoding::Json,
    };

    // First frame must identify the player
    let user_id = match tokio::time::timeout(idle, ws_read.next()).await {
        Ok(Some(Ok(frame))) => match decode_frame(&frame) {
            Some((encoding, Ok(ClientMessage::Join { user_id }))) => {
                out.encoding = encoding;
                Some(user_id)
            }
            Some((encoding, _)) => {
                out.encoding = encoding;
                None
            }
            None => None,
        },
        _ => None,
    };

    let Some(user_id) = user_id else {
        tracing::warn!("Connection from {} did not join", addr);
        let _ = out
            .send(&ServerMessage::error("not-joined", ProtocolError::NotJoined.to_string()))
            .await;
        out.close().await;
        drop(out);
        let _ = writer.await;
        return Ok(());
    };

    let registry = Arc::clone(coordinator.registry());
    let mut handle = registry.register(user_id).await;
    let mut session = PlayerSession::new(handle.connection_id, user_id);
    tracing::info!(
        "User {} joined as connection {} from {}",
        user_id,
        handle.connection_id,
        addr
    );
    out.send(&ServerMessage::welcome(handle.connection_id, user_id)).await?;

    let mut spectators = registry.subscribe_spectators();
    let mut spectating: Option<Uuid> = None;
    // Only frames from the client move this
    let mut idle_deadline = Instant::now() + idle;

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            _ = tokio::time::sleep_until(idle_deadline) => {
                tracing::info!("Connection {} idle for {}s", session.connection_id(), idle.as_secs());
                let _ = out.send(&ServerMessage::Kicked {
                    reason: InvalidationReason::IdleTimeout.as_str().to_string(),
                }).await;
                out.close().await;
                break Ok(());
            }
            frame = ws_read.next() => {
                let frame = match frame {
                    None => break Ok(()),
                    Some(Err(e)) => break Err(e.into()),
                    Some(Ok(frame)) => frame,
                };
                idle_deadline = Instant::now() + idle;
                if frame.is_close() {
                    break Ok(());
                }
                let Some((encoding, decoded)) = decode_frame(&frame) else {
                    continue;
                };
                out.encoding = encoding;
                if let Err(e) = registry.touch(session.connection_id()).await {
                    tracing::info!("Closing connection {}: {}", session.connection_id(), e);
                    out.close().await;
                    break Ok(());
                }

                let msg = match decoded {
                    Ok(msg) => msg,
                    Err(e) => {
                        tracing::debug!("Bad frame from connection {}: {}", session.connection_id(), e);
                        if let Err(e) = out.send(&ServerMessage::error("malformed-message", e.to_string())).await {
                            break Err(e);
                        }
                        continue;
                    }
                };

                match dispatch(&coordinator, &mut session, &mut spectating, msg).await {
                    Ok(Dispatch::Reply(replies)) => {
                        let mut failed = None;
                        for reply in &replies {
                            if let Err(e) = out.send(reply).await {
                                failed = Some(e);
                                break;
                            }
                        }
                        if let Some(e) = failed {
                            break Err(e);
                        }
                    }
                    Ok(Dispatch::Leave) => {
                        out.close().await;
                        break Ok(());
                    }
                    Err(e) => break Err(e),
                }
            }
            changed = handle.invalidated.changed() => {
                let reason = if changed.is_ok() {
                    *handle.invalidated.borrow()
                } else {
                    None
                };
                let reason = reason.unwrap_or(InvalidationReason::Shutdown);
                tracing::info!("Closing connection {}: {}", session.connection_id(), reason.as_str());
                let _ = out.send(&ServerMessage::Kicked { reason: reason.as_str().to_string() }).await;
                out.close().await;
                break Ok(());
            }
            update = spectators.recv(), if spectating.is_some() => {
                match update {
                    Ok(snapshot) => {
                        if snapshot.user_id != user_id && snapshot.track_id == spectating {
                            if let Err(e) = out.send(&ServerMessage::SpectatorUpdate(snapshot)).await {
                                break Err(e);
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!("Spectator {} skipped {} updates", session.connection_id(), skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => spectating = None,
                }
            }
        }
    };

    coordinator.handle_disconnect(&mut session).await;
    registry.unregister(session.connection_id()).await;
    tracing::info!("Connection {} for user {} closed", session.connection_id(), user_id);

    drop(out);
    let _ = writer.await;
    result
}

enum Dispatch {
    Reply(Vec<ServerMessage>),
    Leave,
}

async fn dispatch(
    coordinator: &RaceCoordinator,
    session: &mut PlayerSession,
    spectating: &mut Option<Uuid>,
    msg: ClientMessage,
) -> anyhow::Result<Dispatch> {
    let replies = match msg {
        ClientMessage::Join { .. } => vec![ServerMessage::error("already-joined", "Connection already joined")],
        ClientMessage::PlayerUpdate(update) => {
            match coordinator.on_position(session, update.into()).await {
                Ok(event) => {
                    let mut replies = vec![ServerMessage::PlayerUpdateAck {
                        logged_at: update.logged_at,
                    }];
                    if let Some(event) = event {
                        replies.push(event.into());
                    }
                    replies
                }
                Err(e) => vec![ServerMessage::from(&e)],
            }
        }
        ClientMessage::StartRace { .. } => {
            let Some(request) = msg.start_request() else {
                return Ok(Dispatch::Reply(Vec::new()));
            };
            match coordinator.start_race(session, request).await {
                Ok(started) => {
                    tracing::info!(
                        "User {} started attempt {} on track {}",
                        session.user_id(),
                        started.attempt_id,
                        started.track_id
                    );
                    vec![started.into()]
                }
                Err(e) => {
                    tracing::info!("Refused race start for user {}: {}", session.user_id(), e);
                    vec![ServerMessage::RaceStartRefused {
                        code: e.code().to_string(),
                        reason: e.to_string(),
                    }]
                }
            }
        }
        ClientMessage::CancelRace => match coordinator.cancel_race(session).await {
            Ok(RaceEvent::Progress(_)) => Vec::new(),
            Ok(event) => vec![event.into()],
            Err(e) => vec![ServerMessage::from(&e)],
        },
        ClientMessage::Spectate { track_id } => {
            *spectating = track_id;
            match track_id {
                Some(track_id) => coordinator
                    .registry()
                    .players_on_track(track_id)
                    .await
                    .into_iter()
                    .filter(|s| s.user_id != session.user_id())
                    .map(ServerMessage::SpectatorUpdate)
                    .collect(),
                None => Vec::new(),
            }
        }
        ClientMessage::Viewport { south_west, north_east } => match BoundingBox::new(south_west, north_east) {
            Ok(bounds) => match coordinator.tracks_in_view(bounds).await {
                Ok(tracks) => vec![ServerMessage::TracksInView { tracks }],
                Err(e) => vec![ServerMessage::from(&e)],
            },
            Err(e) => vec![ServerMessage::error("invalid-viewport", e.to_string())],
        },
        ClientMessage::Leave => return Ok(Dispatch::Leave),
    };

    Ok(Dispatch::Reply(replies))
}
