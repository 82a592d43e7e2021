//! Live race progress state machine.
//!
//! One engine per ongoing attempt, owned by the player's session. Each
//! position update is projected onto the track path near the last known
//! progress, and the engine decides whether the player advanced, went
//! off-track, drove backwards, or crossed the finish.
//!
//! ```text
//! not_started --start--> ongoing --+--> finished
//!                                  +--> disqualified
//!                                  +--> cancelled
//! ```

use super::attempt::{CancelReason, DisqualifyReason, ProgressSnapshot, RaceAttempt, RaceResult, RaceState};
use super::RaceError;
use crate::geometry::{bearing_difference, PositionFix};
use crate::storage::config::RaceSettings;
use crate::tracks::Track;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What a player sends to begin a race.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRequest {
    pub track_id: Uuid,
    /// Position when the race actually started
    pub started: PositionFix,
    /// Position logged when the countdown began
    pub countdown: Option<PositionFix>,
    pub fake: bool,
}

/// Outcome of a position update.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    Progress(ProgressSnapshot),
    Finished(RaceResult),
    Disqualified(RaceResult),
    Cancelled(RaceResult),
}

impl RaceEvent {
    pub fn result(&self) -> Option<&RaceResult> {
        match self {
            RaceEvent::Progress(_) => None,
            RaceEvent::Finished(r) | RaceEvent::Disqualified(r) | RaceEvent::Cancelled(r) => Some(r),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.result().is_some()
    }

    fn from_result(result: RaceResult) -> Self {
        match result.state {
            RaceState::Finished => RaceEvent::Finished(result),
            RaceState::Disqualified => RaceEvent::Disqualified(result),
            _ => RaceEvent::Cancelled(result),
        }
    }
}

/// Progress tracker for one attempt.
#[derive(Debug)]
pub struct RaceProgressEngine {
    attempt_id: Uuid,
    user_id: Uuid,
    track: Arc<Track>,
    settings: RaceSettings,
    fake: bool,
    state: RaceState,
    started_at: DateTime<Utc>,
    last_fix_at: DateTime<Utc>,
    /// Time of the last on-track position
    progress_at: DateTime<Utc>,
    /// Lap-local path distance of the last accepted position
    lap_position: f64,
    /// Unwrapped race distance of the last accepted position
    race_distance: f64,
    max_distance: f64,
    missed_m: f64,
    last_offset: f64,
    off_track_since: Option<DateTime<Utc>>,
    cancel_requested: Arc<AtomicBool>,
    terminal: Option<RaceResult>,
}

impl RaceProgressEngine {
    /// Validate a start request against the track and begin an attempt.
    pub fn start(
        track: Arc<Track>,
        user_id: Uuid,
        request: &StartRequest,
        settings: RaceSettings,
    ) -> Result<Self, RaceError> {
        Self::check_start(&track, request, &settings)?;

        let started = &request.started;
        let circular = track.is_circuit();
        let projection = track.path.project_near(
            started.latitude,
            started.longitude,
            0.0,
            settings.projection_window_m,
            circular,
        );
        let lap_length = track.lap_length();
        let race_distance = if circular && projection.path_distance > lap_length / 2.0 {
            projection.path_distance - lap_length
        } else {
            projection.path_distance
        };

        tracing::info!(
            "User {} started race on track '{}' ({:.0}m x {})",
            user_id,
            track.name,
            lap_length,
            track.laps
        );

        Ok(Self {
            attempt_id: Uuid::new_v4(),
            user_id,
            settings,
            fake: request.fake,
            state: RaceState::Ongoing,
            started_at: started.logged_at,
            last_fix_at: started.logged_at,
            progress_at: started.logged_at,
            lap_position: projection.path_distance,
            race_distance,
            max_distance: race_distance.max(0.0),
            missed_m: 0.0,
            last_offset: projection.offset_m,
            off_track_since: None,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            terminal: None,
            track,
        })
    }

    /// Conditions (a)-(c) of a race start: verified track, heading and
    /// position at the start line, no false start during the countdown.
    pub fn check_start(track: &Track, request: &StartRequest, settings: &RaceSettings) -> Result<(), RaceError> {
        if !track.verified {
            return Err(RaceError::StartConditionsNotMet(format!(
                "track '{}' is not verified",
                track.name
            )));
        }

        let started = &request.started;
        if !started.is_valid() {
            return Err(RaceError::StartConditionsNotMet(
                "start position is not a valid coordinate".to_string(),
            ));
        }

        let distance_from_start = started.point().distance_to(track.path.origin());
        if distance_from_start > settings.start_proximity_m {
            return Err(RaceError::StartConditionsNotMet(format!(
                "{:.0}m from the start line, must be within {:.0}m",
                distance_from_start, settings.start_proximity_m
            )));
        }

        let heading_error = bearing_difference(started.bearing, track.start_bearing);
        if heading_error > settings.start_bearing_tolerance_deg {
            return Err(RaceError::StartConditionsNotMet(format!(
                "facing {:.0} degrees away from the track direction, at most {:.0} allowed",
                heading_error, settings.start_bearing_tolerance_deg
            )));
        }

        if let Some(countdown) = &request.countdown {
            if countdown.logged_at > started.logged_at {
                return Err(RaceError::StartConditionsNotMet(
                    "countdown position logged after the race started".to_string(),
                ));
            }
            let creep = countdown.point().distance_to(&started.point());
            if creep > settings.max_countdown_creep_m {
                return Err(RaceError::StartConditionsNotMet(format!(
                    "moved {:.0}m during the countdown, at most {:.0}m allowed",
                    creep, settings.max_countdown_creep_m
                )));
            }
        }

        Ok(())
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn track(&self) -> &Arc<Track> {
        &self.track
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn is_fake(&self) -> bool {
        self.fake
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Flag observed at the next position update.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_requested)
    }

    /// The record to persist when the attempt begins.
    pub fn attempt_record(&self) -> RaceAttempt {
        let mut attempt = RaceAttempt::start(self.track.id, self.user_id, self.started_at, self.fake);
        attempt.id = self.attempt_id;
        attempt
    }

    /// Terminal result, once reached.
    pub fn terminal_result(&self) -> Option<&RaceResult> {
        self.terminal.as_ref()
    }

    /// Feed one position update.
    ///
    /// Out-of-order fixes are rejected with `StaleUpdate` and change
    /// nothing. After a terminal transition the same terminal event is
    /// returned for every further update.
    pub fn update(&mut self, fix: &PositionFix) -> Result<RaceEvent, RaceError> {
        if let Some(result) = &self.terminal {
            return Ok(RaceEvent::from_result(result.clone()));
        }

        if fix.logged_at <= self.last_fix_at {
            return Err(RaceError::StaleUpdate {
                at: fix.logged_at,
                last: self.last_fix_at,
            });
        }
        self.last_fix_at = fix.logged_at;

        if self.cancel_requested.load(Ordering::Acquire) {
            return Ok(self.cancel(CancelReason::Requested, fix.logged_at));
        }

        let path = &self.track.path;
        let circular = self.track.is_circuit();
        let lap_length = self.track.lap_length();
        let tolerance = self.settings.off_track_tolerance_m;

        let mut projection = path.project_near(
            fix.latitude,
            fix.longitude,
            self.lap_position,
            self.settings.projection_window_m,
            circular,
        );
        if projection.offset_m > tolerance {
            // Large gap between fixes; accept a match anywhere on the path
            let anywhere = path.project(fix.latitude, fix.longitude);
            if anywhere.offset_m <= tolerance {
                projection = anywhere;
            }
        }
        self.last_offset = projection.offset_m;

        if projection.offset_m > tolerance {
            let since = *self.off_track_since.get_or_insert(fix.logged_at);
            let off_secs = (fix.logged_at - since).num_milliseconds() as f64 / 1000.0;
            if off_secs > self.settings.off_track_grace_secs {
                return Ok(self.disqualify(DisqualifyReason::OffTrack, fix.logged_at));
            }
            tracing::debug!(
                "Attempt {} off-track by {:.0}m for {:.1}s",
                self.attempt_id,
                projection.offset_m,
                off_secs
            );
            return Ok(RaceEvent::Progress(self.snapshot_at(fix.logged_at)));
        }
        self.off_track_since = None;

        let previous = self.race_distance;
        if circular {
            let mut delta = projection.path_distance - self.lap_position;
            if delta > lap_length / 2.0 {
                delta -= lap_length;
            } else if delta < -lap_length / 2.0 {
                delta += lap_length;
            }
            self.race_distance += delta;
        } else {
            self.race_distance = projection.path_distance;
        }
        self.lap_position = projection.path_distance;

        let interval_secs = (fix.logged_at - self.progress_at).num_milliseconds() as f64 / 1000.0;
        self.progress_at = fix.logged_at;

        let noise_floor = self.max_distance - self.settings.progress_noise_m;
        if self.race_distance > self.max_distance {
            // Anything beyond what could be driven since the last fix was skipped
            let reachable = self.settings.max_speed_ms * interval_secs + self.settings.progress_noise_m;
            let skipped = self.race_distance - self.max_distance - reachable;
            self.max_distance = self.race_distance;
            if skipped > 0.0 {
                self.missed_m += skipped;
                tracing::debug!("Attempt {} skipped {:.0}m of track", self.attempt_id, skipped);
                if self.percent_missed() > self.settings.max_percent_missed {
                    return Ok(self.disqualify(DisqualifyReason::SkippedTrack, fix.logged_at));
                }
            }
        } else if self.race_distance < noise_floor {
            let reversed = (previous.min(noise_floor) - self.race_distance).max(0.0);
            self.missed_m += reversed;
            if self.percent_missed() > self.settings.max_percent_missed {
                return Ok(self.disqualify(DisqualifyReason::ExcessiveReversal, fix.logged_at));
            }
        }

        if self.crossed_finish(fix) {
            return Ok(self.finish(fix.logged_at));
        }

        Ok(RaceEvent::Progress(self.snapshot_at(fix.logged_at)))
    }

    /// Stop the race without a leaderboard entry.
    pub fn cancel(&mut self, reason: CancelReason, at: DateTime<Utc>) -> RaceEvent {
        if let Some(result) = &self.terminal {
            return RaceEvent::from_result(result.clone());
        }
        tracing::info!("Attempt {} cancelled ({})", self.attempt_id, reason.as_str());
        self.conclude(RaceState::Cancelled, Some(reason.as_str().to_string()), at)
    }

    /// Set the finishing place on a finished result.
    pub fn record_finishing_place(&mut self, place: u32) {
        if let Some(result) = self.terminal.as_mut() {
            if result.state == RaceState::Finished {
                result.finishing_place = Some(place);
            }
        }
    }

    /// Current progress as of `at`.
    pub fn snapshot_at(&self, at: DateTime<Utc>) -> ProgressSnapshot {
        let race_length = self.track.race_length();
        let distance = self.max_distance.max(0.0);
        let stopwatch_ms = (at - self.started_at).num_milliseconds().max(0) as u64;
        let elapsed_secs = stopwatch_ms as f64 / 1000.0;
        let finished = self.state == RaceState::Finished;

        ProgressSnapshot {
            attempt_id: self.attempt_id,
            distance_m: distance,
            percent_complete: if finished {
                100.0
            } else {
                (distance / race_length * 100.0).clamp(0.0, 100.0)
            },
            percent_missed: self.percent_missed(),
            laps_complete: if finished {
                self.track.laps
            } else {
                ((distance / self.track.lap_length()).floor() as u32).min(self.track.laps)
            },
            average_speed_ms: if elapsed_secs > 0.0 {
                distance / elapsed_secs
            } else {
                0.0
            },
            stopwatch_ms,
            offset_m: self.last_offset,
            recorded_at: at,
        }
    }

    /// Progress as of the last accepted update.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot_at(self.last_fix_at)
    }

    fn percent_missed(&self) -> f64 {
        self.missed_m / self.track.race_length() * 100.0
    }

    fn crossed_finish(&self, fix: &PositionFix) -> bool {
        let tolerance = self.settings.finish_tolerance_m;
        if self.track.is_circuit() {
            self.race_distance >= self.track.race_length() - tolerance
                && fix.point().distance_to(self.track.path.origin()) <= tolerance
        } else {
            self.lap_position >= self.track.lap_length() - tolerance
        }
    }

    fn finish(&mut self, at: DateTime<Utc>) -> RaceEvent {
        tracing::info!(
            "Attempt {} finished track '{}' in {}ms",
            self.attempt_id,
            self.track.name,
            (at - self.started_at).num_milliseconds()
        );
        self.conclude(RaceState::Finished, None, at)
    }

    fn disqualify(&mut self, reason: DisqualifyReason, at: DateTime<Utc>) -> RaceEvent {
        tracing::info!("Attempt {} disqualified ({})", self.attempt_id, reason.as_str());
        self.conclude(RaceState::Disqualified, Some(reason.as_str().to_string()), at)
    }

    fn conclude(&mut self, state: RaceState, reason: Option<String>, at: DateTime<Utc>) -> RaceEvent {
        self.state = state;
        let snapshot = self.snapshot_at(at);
        let result = RaceResult {
            attempt_id: self.attempt_id,
            track_id: self.track.id,
            user_id: self.user_id,
            state,
            reason,
            distance_m: snapshot.distance_m,
            percent_complete: snapshot.percent_complete,
            percent_missed: snapshot.percent_missed,
            laps_complete: snapshot.laps_complete,
            average_speed_ms: snapshot.average_speed_ms,
            stopwatch_ms: snapshot.stopwatch_ms,
            finishing_place: None,
            ended_at: at,
            fake: self.fake,
        };
        self.terminal = Some(result.clone());
        RaceEvent::from_result(result)
    }
}
