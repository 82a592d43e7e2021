//! Glue between player sessions, race engines and storage.

use super::attempt::{CancelReason, RaceAttempt, RaceResult, RaceState};
use super::engine::{RaceEvent, RaceProgressEngine, StartRequest};
use super::leaderboard::finishing_place;
use super::progress::ProgressWriter;
use super::RaceError;
use crate::geometry::{BoundingBox, PositionFix};
use crate::session::{PlayerSession, RecoveryReport, SessionRegistry};
use crate::storage::{blocking, DatabaseError, RaceStore, ServerConfig};
use crate::tracks::TrackSummary;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Confirmation sent when a race begins.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceStarted {
    pub attempt_id: Uuid,
    pub track_id: Uuid,
    /// Hash of the path the race is scored against
    pub track_hash: String,
    pub started_at: DateTime<Utc>,
}

pub struct RaceCoordinator {
    store: Arc<dyn RaceStore>,
    registry: Arc<SessionRegistry>,
    progress: ProgressWriter,
    config: Arc<ServerConfig>,
}

impl RaceCoordinator {
    pub fn new(
        store: Arc<dyn RaceStore>,
        registry: Arc<SessionRegistry>,
        progress: ProgressWriter,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            progress,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RaceStore> {
        &self.store
    }

    /// Begin a race for the session's player.
    ///
    /// An ongoing attempt left in storage by an earlier, dead session is
    /// cancelled here before the new one is recorded.
    pub async fn start_race(
        &self,
        session: &mut PlayerSession,
        request: StartRequest,
    ) -> Result<RaceStarted, RaceError> {
        let user_id = session.user_id();
        if let Some(engine) = session.active_race() {
            return Err(RaceError::AttemptAlreadyActive(engine.attempt_id()));
        }

        let track_id = request.track_id;
        let track = blocking(&self.store, move |store| store.load_verified_track(track_id))
            .await
            .map_err(|e| RaceError::PersistenceFailure(e.to_string()))?
            .ok_or(RaceError::TrackNotFound(track_id))?;

        let engine = RaceProgressEngine::start(Arc::new(track), user_id, &request, self.config.race.clone())?;
        let attempt = engine.attempt_record();

        self.registry
            .reserve_attempt(user_id, attempt.id, attempt.track_id, engine.cancel_handle())
            .await
            .map_err(RaceError::AttemptAlreadyActive)?;

        if let Err(e) = self.persist_start(attempt.clone()).await {
            self.registry.release_attempt(user_id, attempt.id).await;
            return Err(e);
        }

        let started = RaceStarted {
            attempt_id: attempt.id,
            track_id: attempt.track_id,
            track_hash: engine.track().hash.clone(),
            started_at: attempt.started_at,
        };

        // Start position counts as the first update
        if let Err(e) = session.update_position(request.started) {
            tracing::debug!("Start position not newer than last update: {}", e);
        }
        session.attach_to_race(engine).map_err(RaceError::from)?;

        Ok(started)
    }

    async fn persist_start(&self, attempt: RaceAttempt) -> Result<(), RaceError> {
        let (attempt_id, track_id) = (attempt.id, attempt.track_id);
        let stored = blocking(&self.store, move |store| {
            if let Some(orphan) = store.find_ongoing_attempt_for_user(attempt.user_id)? {
                tracing::info!(
                    "Cancelling abandoned attempt {} before starting a new race for user {}",
                    orphan.id,
                    orphan.user_id
                );
                match store.save_terminal_result(&RaceResult::abandoned(&orphan, Utc::now())) {
                    Ok(()) | Err(DatabaseError::ConstraintViolation(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            store.insert_attempt(&attempt)
        })
        .await;

        stored.map_err(|e| match e {
            DatabaseError::ConstraintViolation(_) => RaceError::AttemptAlreadyActive(attempt_id),
            DatabaseError::NotFound(_) => RaceError::TrackNotFound(track_id),
            other => RaceError::PersistenceFailure(other.to_string()),
        })
    }

    /// Feed a position update through the session and its race.
    ///
    /// Returns the race event, or `None` when the player is not racing.
    pub async fn on_position(
        &self,
        session: &mut PlayerSession,
        fix: PositionFix,
    ) -> Result<Option<RaceEvent>, RaceError> {
        session.update_position(fix)?;

        let event = match session.active_race_mut() {
            Some(engine) => Some(engine.update(&fix)?),
            None => None,
        };

        let event = match event {
            Some(RaceEvent::Progress(snapshot)) => {
                self.progress.record(snapshot);
                Some(RaceEvent::Progress(snapshot))
            }
            Some(terminal) => Some(self.complete(session, terminal).await?),
            None => None,
        };

        if let Some(snapshot) = session.snapshot() {
            self.registry
                .publish_snapshot(session.connection_id(), snapshot)
                .await;
        }

        Ok(event)
    }

    /// Cancel the session's race at the player's request.
    pub async fn cancel_race(&self, session: &mut PlayerSession) -> Result<RaceEvent, RaceError> {
        let event = session
            .active_race_mut()
            .ok_or(RaceError::NotRacing)?
            .cancel(CancelReason::Requested, Utc::now());
        self.complete(session, event).await
    }

    /// Detach a disconnecting session's race.
    ///
    /// The attempt stays ongoing in storage and is cancelled by the next
    /// recovery sweep, or when the player starts another race.
    pub async fn handle_disconnect(&self, session: &mut PlayerSession) {
        session.mark_disconnected();
        if let Some(engine) = session.detach() {
            let snapshot = engine.snapshot();
            self.progress.record(snapshot);
            self.registry
                .release_attempt(session.user_id(), engine.attempt_id())
                .await;
            tracing::info!(
                "User {} disconnected during attempt {} at {:.1}%",
                session.user_id(),
                engine.attempt_id(),
                snapshot.percent_complete
            );
        }
    }

    /// Tracks a client can see on its map, verified ones first.
    pub async fn tracks_in_view(&self, bounds: BoundingBox) -> Result<Vec<TrackSummary>, RaceError> {
        let limit = self.config.server.viewport_track_limit;
        blocking(&self.store, move |store| store.tracks_in_bounds(&bounds, limit))
            .await
            .map_err(|e| RaceError::PersistenceFailure(e.to_string()))
    }

    /// Run a recovery sweep against the store.
    pub async fn recover(&self) -> Result<RecoveryReport, DatabaseError> {
        self.registry.recover_stuck_attempts(&self.store).await
    }

    /// Persist a terminal event, then detach the race from the session.
    ///
    /// If the write keeps failing the race stays attached; the next update
    /// returns the same terminal event and the write is tried again.
    async fn complete(&self, session: &mut PlayerSession, event: RaceEvent) -> Result<RaceEvent, RaceError> {
        let Some(mut result) = event.result().cloned() else {
            return Ok(event);
        };

        if result.state == RaceState::Finished && result.finishing_place.is_none() {
            let track_id = result.track_id;
            let existing = blocking(&self.store, move |store| store.finished_attempts(track_id))
                .await
                .map_err(|e| RaceError::PersistenceFailure(e.to_string()))?;
            result.finishing_place =
                finishing_place(&existing, &result, self.config.environment.includes_fake_attempts());
            if let (Some(place), Some(engine)) = (result.finishing_place, session.active_race_mut()) {
                engine.record_finishing_place(place);
            }
        }

        self.persist_terminal(&result).await?;

        self.progress.forget(result.attempt_id);
        session.detach();
        self.registry
            .release_attempt(result.user_id, result.attempt_id)
            .await;

        Ok(match event {
            RaceEvent::Finished(_) => RaceEvent::Finished(result),
            RaceEvent::Disqualified(_) => RaceEvent::Disqualified(result),
            _ => RaceEvent::Cancelled(result),
        })
    }

    async fn persist_terminal(&self, result: &RaceResult) -> Result<(), RaceError> {
        let retries = self.config.storage.terminal_write_retries.max(1);
        let backoff = Duration::from_millis(self.config.storage.terminal_retry_backoff_ms);
        let mut last_error = String::new();

        for attempt in 0..retries {
            let pending = result.clone();
            match blocking(&self.store, move |store| store.save_terminal_result(&pending)).await {
                Ok(()) => return Ok(()),
                Err(DatabaseError::ConstraintViolation(msg)) => {
                    // Already terminal: fine if it is this same outcome
                    let attempt_id = result.attempt_id;
                    let stored = blocking(&self.store, move |store| store.get_attempt(attempt_id))
                        .await
                        .map_err(|e| RaceError::PersistenceFailure(e.to_string()))?;
                    if stored.map(|a| a.state) == Some(result.state) {
                        return Ok(());
                    }
                    return Err(RaceError::PersistenceFailure(msg));
                }
                Err(e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        "Writing result for attempt {} failed (try {}/{}): {}",
                        result.attempt_id,
                        attempt + 1,
                        retries,
                        e
                    );
                    if attempt + 1 < retries {
                        tokio::time::sleep(backoff * 2u32.saturating_pow(attempt)).await;
                    }
                }
            }
        }

        tracing::error!(
            "Giving up on result for attempt {}, leaving it ongoing",
            result.attempt_id
        );
        Err(RaceError::PersistenceFailure(last_error))
    }
}
