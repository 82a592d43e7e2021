//! Unit test modules.

mod fixtures;
mod import_gpx_test;
mod leaderboard_test;
mod track_verification_test;
