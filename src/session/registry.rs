//! Process-wide directory of live sessions and ongoing attempts.
//!
//! The registry never owns race engines; those live inside each
//! connection's task. It tracks which connection is authoritative for a
//! user, which attempt each player has reserved, and reconciles persisted
//! `ongoing` attempts that nobody owns any more.

use super::player::SessionSnapshot;
use super::SessionError;
use crate::racing::{RaceResult, RaceState};
use crate::storage::{blocking, DatabaseError, RaceStore};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

/// Why a connection was told to close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// The same user connected again
    Replaced,
    /// Nothing received for too long
    IdleTimeout,
    Shutdown,
}

impl InvalidationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidationReason::Replaced => "replaced by a newer connection",
            InvalidationReason::IdleTimeout => "idle timeout",
            InvalidationReason::Shutdown => "server shutting down",
        }
    }
}

/// Given to a connection when it registers.
#[derive(Debug)]
pub struct SessionHandle {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    /// Becomes `Some` when this connection must close
    pub invalidated: watch::Receiver<Option<InvalidationReason>>,
}

/// Registry view of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub idle_for: Duration,
    pub snapshot: Option<SessionSnapshot>,
}

/// Counts from a recovery sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    /// Attempts moved to cancelled
    pub cancelled: Vec<Uuid>,
    /// Ongoing attempts left alone because a live session owns them
    pub live: usize,
}

struct SessionEntry {
    user_id: Uuid,
    invalidate: watch::Sender<Option<InvalidationReason>>,
    last_seen: Instant,
    snapshot: Option<SessionSnapshot>,
}

struct Reservation {
    attempt_id: Uuid,
    track_id: Uuid,
    cancel: Arc<AtomicBool>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<Uuid, SessionEntry>,
    by_user: HashMap<Uuid, Uuid>,
    attempts: HashMap<Uuid, Reservation>,
}

/// Session registry.
pub struct SessionRegistry {
    state: Mutex<RegistryState>,
    spectators: broadcast::Sender<SessionSnapshot>,
}

impl SessionRegistry {
    pub fn new(spectator_buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(spectator_buffer.max(1));
        Self {
            state: Mutex::new(RegistryState::default()),
            spectators: tx,
        }
    }

    /// Register a new connection for `user_id`.
    ///
    /// An existing connection for the same user is invalidated and removed;
    /// the new one is authoritative from here on.
    pub async fn register(&self, user_id: Uuid) -> SessionHandle {
        let connection_id = Uuid::new_v4();
        let (invalidate, invalidated) = watch::channel(None);

        let mut state = self.state.lock().await;
        if let Some(previous) = state.by_user.insert(user_id, connection_id) {
            if let Some(old) = state.sessions.remove(&previous) {
                let _ = old.invalidate.send(Some(InvalidationReason::Replaced));
                tracing::info!(
                    "User {} reconnected, invalidating connection {}",
                    user_id,
                    previous
                );
            }
        }

        state.sessions.insert(
            connection_id,
            SessionEntry {
                user_id,
                invalidate,
                last_seen: Instant::now(),
                snapshot: None,
            },
        );

        SessionHandle {
            connection_id,
            user_id,
            invalidated,
        }
    }

    /// Remove a connection. No-op if it was already replaced.
    pub async fn unregister(&self, connection_id: Uuid) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.sessions.remove(&connection_id) {
            if state.by_user.get(&entry.user_id) == Some(&connection_id) {
                state.by_user.remove(&entry.user_id);
            }
            tracing::debug!("Connection {} unregistered", connection_id);
        }
    }

    pub async fn lookup(&self, connection_id: Uuid) -> Option<SessionInfo> {
        let state = self.state.lock().await;
        state.sessions.get(&connection_id).map(|e| SessionInfo {
            connection_id,
            user_id: e.user_id,
            idle_for: e.last_seen.elapsed(),
            snapshot: e.snapshot.clone(),
        })
    }

    /// The authoritative connection for a user.
    pub async fn connection_for_user(&self, user_id: Uuid) -> Option<Uuid> {
        self.state.lock().await.by_user.get(&user_id).copied()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    /// Mark a connection as active.
    pub async fn touch(&self, connection_id: Uuid) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let entry = state
            .sessions
            .get_mut(&connection_id)
            .ok_or(SessionError::NotRegistered(connection_id))?;
        entry.last_seen = Instant::now();
        Ok(())
    }

    /// Store a player's latest state and broadcast it to spectators.
    pub async fn publish_snapshot(&self, connection_id: Uuid, snapshot: SessionSnapshot) {
        {
            let mut state = self.state.lock().await;
            match state.sessions.get_mut(&connection_id) {
                Some(entry) => {
                    entry.last_seen = Instant::now();
                    entry.snapshot = Some(snapshot.clone());
                }
                None => return,
            }
        }
        // No receivers is fine
        let _ = self.spectators.send(snapshot);
    }

    pub fn subscribe_spectators(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.spectators.subscribe()
    }

    /// Latest snapshots of everyone currently racing `track_id`.
    pub async fn players_on_track(&self, track_id: Uuid) -> Vec<SessionSnapshot> {
        let state = self.state.lock().await;
        state
            .sessions
            .values()
            .filter_map(|e| e.snapshot.clone())
            .filter(|s| s.track_id == Some(track_id))
            .collect()
    }

    /// Reserve the single ongoing attempt slot for a player.
    ///
    /// Check and insert happen under one lock, so two concurrent starts for
    /// the same player cannot both succeed. Returns the existing attempt id
    /// on conflict.
    pub async fn reserve_attempt(
        &self,
        user_id: Uuid,
        attempt_id: Uuid,
        track_id: Uuid,
        cancel: Arc<AtomicBool>,
    ) -> Result<(), Uuid> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.attempts.get(&user_id) {
            return Err(existing.attempt_id);
        }
        state.attempts.insert(
            user_id,
            Reservation {
                attempt_id,
                track_id,
                cancel,
            },
        );
        Ok(())
    }

    /// Release a reservation if it still belongs to `attempt_id`.
    pub async fn release_attempt(&self, user_id: Uuid, attempt_id: Uuid) -> bool {
        let mut state = self.state.lock().await;
        match state.attempts.get(&user_id) {
            Some(r) if r.attempt_id == attempt_id => {
                state.attempts.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// The attempt a player has reserved, with its track.
    pub async fn reserved_attempt(&self, user_id: Uuid) -> Option<(Uuid, Uuid)> {
        let state = self.state.lock().await;
        state.attempts.get(&user_id).map(|r| (r.attempt_id, r.track_id))
    }

    /// Ask a player's race to cancel at its next position update.
    pub async fn request_cancel(&self, user_id: Uuid) -> bool {
        let state = self.state.lock().await;
        match state.attempts.get(&user_id) {
            Some(r) => {
                r.cancel.store(true, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Ids of attempts owned by live sessions.
    pub async fn live_attempts(&self) -> HashSet<Uuid> {
        let state = self.state.lock().await;
        state.attempts.values().map(|r| r.attempt_id).collect()
    }

    /// Invalidate connections idle longer than `idle_timeout`.
    pub async fn sweep_stale(&self, idle_timeout: Duration) -> Vec<Uuid> {
        let mut state = self.state.lock().await;
        let stale: Vec<Uuid> = state
            .sessions
            .iter()
            .filter(|(_, e)| e.last_seen.elapsed() > idle_timeout)
            .map(|(id, _)| *id)
            .collect();

        for connection_id in &stale {
            if let Some(entry) = state.sessions.remove(connection_id) {
                let _ = entry.invalidate.send(Some(InvalidationReason::IdleTimeout));
                if state.by_user.get(&entry.user_id) == Some(connection_id) {
                    state.by_user.remove(&entry.user_id);
                }
                tracing::info!("Connection {} timed out", connection_id);
            }
        }

        stale
    }

    /// Tell every connection to close.
    pub async fn shutdown(&self) {
        let state = self.state.lock().await;
        for entry in state.sessions.values() {
            let _ = entry.invalidate.send(Some(InvalidationReason::Shutdown));
        }
    }

    /// Cancel every persisted ongoing attempt that no live session owns.
    ///
    /// Storage is scanned before the live reservations are read. A
    /// reservation is always taken before its attempt is inserted and only
    /// released once the attempt is terminal or its session is gone, so any
    /// attempt missing from the snapshot is either over or unowned. The
    /// registry lock is never held across storage calls.
    pub async fn recover_stuck_attempts(
        &self,
        store: &Arc<dyn RaceStore>,
    ) -> Result<RecoveryReport, DatabaseError> {
        let ongoing = blocking(store, |store| store.find_ongoing_attempts()).await?;
        if ongoing.is_empty() {
            return Ok(RecoveryReport::default());
        }
        let live = self.live_attempts().await;

        let mut report = RecoveryReport::default();
        let mut orphans = Vec::new();
        for attempt_id in ongoing {
            if live.contains(&attempt_id) {
                report.live += 1;
            } else {
                orphans.push(attempt_id);
            }
        }

        report.cancelled = blocking(store, move |store| {
            let mut cancelled = Vec::new();
            for attempt_id in orphans {
                let Some(attempt) = store.get_attempt(attempt_id)? else {
                    continue;
                };
                if attempt.state != RaceState::Ongoing {
                    continue;
                }

                match store.save_terminal_result(&RaceResult::abandoned(&attempt, Utc::now())) {
                    Ok(()) => {
                        tracing::info!("Recovered stuck attempt {} (user {})", attempt.id, attempt.user_id);
                        cancelled.push(attempt.id);
                    }
                    Err(DatabaseError::ConstraintViolation(_)) => {
                        tracing::debug!("Attempt {} ended while recovering", attempt.id);
                    }
                    Err(e) => return Err(e),
                }
            }
            Ok(cancelled)
        })
        .await?;

        if !report.cancelled.is_empty() {
            tracing::info!("Recovery cancelled {} abandoned attempt(s)", report.cancelled.len());
        }
        Ok(report)
    }
}
