//! Unit tests for the track verification pipeline

use hawkspeed::geometry::{GeoPoint, TrackPath};
use hawkspeed::storage::config::{SnappingSettings, TrackSettings};
use hawkspeed::tracks::{verify_path, ImportedTrack, TrackType, TrackVerificationPipeline};
use uuid::Uuid;

fn loop_points(close: bool) -> Vec<GeoPoint> {
    let mut points = vec![
        GeoPoint::new(-27.4700, 153.0200),
        GeoPoint::new(-27.4680, 153.0200),
        GeoPoint::new(-27.4680, 153.0225),
        GeoPoint::new(-27.4700, 153.0225),
    ];
    if close {
        points.push(GeoPoint::new(-27.4700, 153.0200));
    }
    points
}

fn imported(points: Vec<GeoPoint>, track_type: TrackType) -> ImportedTrack {
    ImportedTrack {
        name: "Botanic loop".to_string(),
        description: None,
        track_type,
        laps: 3,
        points,
        snapped: false,
    }
}

fn pipeline() -> TrackVerificationPipeline {
    TrackVerificationPipeline::new(TrackSettings::default(), SnappingSettings::default())
}

/// Test verifying twice gives the same outcome and hash
#[tokio::test]
async fn test_verification_is_idempotent() {
    let pipeline = pipeline();
    let track = pipeline
        .run(imported(loop_points(true), TrackType::Circuit), Uuid::new_v4(), &[])
        .await
        .unwrap();
    assert!(track.verified, "{:?}", track.verification_failure);
    assert_eq!(track.laps, 3);

    let again = pipeline.reverify(&track, &[]);
    assert_eq!(again.verified, track.verified);
    assert_eq!(again.verification_failure, track.verification_failure);
    assert_eq!(again.hash, track.hash);
    assert_eq!(again.path, track.path);
}

/// Test unchanged input always hashes the same
#[tokio::test]
async fn test_hash_is_stable_across_runs() {
    let pipeline = pipeline();
    let owner = Uuid::new_v4();
    let a = pipeline.run(imported(loop_points(true), TrackType::Circuit), owner, &[]).await.unwrap();
    let b = pipeline.run(imported(loop_points(true), TrackType::Circuit), owner, &[]).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(a.hash, b.hash);
    assert_eq!(a.hash.len(), 64);
}

/// Test moving one point changes the hash
#[test]
fn test_hash_changes_with_geometry() {
    let original = TrackPath::new(loop_points(true)).unwrap();
    let mut moved = loop_points(true);
    moved[2].longitude += 0.0001;
    let moved = TrackPath::new(moved).unwrap();

    assert_ne!(original.content_hash(), moved.content_hash());
}

/// Test an open loop is not accepted as a circuit
#[tokio::test]
async fn test_circuit_must_close() {
    let track = pipeline()
        .run(imported(loop_points(false), TrackType::Circuit), Uuid::new_v4(), &[])
        .await
        .unwrap();
    assert!(!track.verified);
    assert!(track.verification_failure.unwrap().contains("start and end"));
}

/// Test the same open path is fine as a sprint
#[test]
fn test_open_path_is_a_valid_sprint() {
    let path = TrackPath::new(loop_points(false)).unwrap();
    let outcome = verify_path(&path, TrackType::Sprint, 1, &TrackSettings::default(), &[]);
    assert!(outcome.verified, "{:?}", outcome.failures);
}

/// Test every failing rule is reported
#[test]
fn test_all_failures_reported() {
    let path = TrackPath::new(vec![GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0005, 0.0)]).unwrap();
    let outcome = verify_path(
        &path,
        TrackType::Circuit,
        1,
        &TrackSettings::default(),
        &[GeoPoint::new(0.0, 0.0)],
    );

    assert!(!outcome.verified);
    assert_eq!(outcome.failures.len(), 3);
    let reason = outcome.reason().unwrap();
    assert!(reason.contains("minimum"));
    assert!(reason.contains("another track"));
}

/// Test a path with fewer than two distinct points is rejected outright
#[tokio::test]
async fn test_degenerate_path_rejected() {
    let result = pipeline()
        .run(
            imported(vec![GeoPoint::new(1.0, 1.0), GeoPoint::new(1.0, 1.0)], TrackType::Sprint),
            Uuid::new_v4(),
            &[],
        )
        .await;
    assert!(result.is_err());
}

/// Test snapping switched off leaves points alone and records nothing
#[tokio::test]
async fn test_snapping_disabled_keeps_raw_points() {
    let track = pipeline()
        .run(imported(loop_points(true), TrackType::Circuit), Uuid::new_v4(), &[])
        .await
        .unwrap();
    assert!(!track.snapped);
    assert!(track.snap_failure.is_none());
    assert_eq!(track.path.points(), loop_points(true).as_slice());
}
