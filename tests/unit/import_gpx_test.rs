//! Unit tests for GPX and export file import

use hawkspeed::geometry::{GeoPoint, TrackPath};
use hawkspeed::tracks::import::gpx::parse_gpx;
use hawkspeed::tracks::import::{export_track, import_directory, import_file, parse_export};
use hawkspeed::tracks::{ImportError, Track, TrackType};
use std::fs;
use uuid::Uuid;

const TRACK_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <metadata>
    <name>Metadata Name</name>
  </metadata>
  <trk>
    <name>Lap of the Gabba</name>
    <type>circuit</type>
    <trkseg>
      <trkpt lat="-27.4858" lon="153.0381"><ele>12</ele></trkpt>
      <trkpt lat="-27.4850" lon="153.0392"><ele>13</ele></trkpt>
      <trkpt lat="-27.4862" lon="153.0401"><ele>12</ele></trkpt>
      <trkpt lat="-27.4858" lon="153.0381"><ele>12</ele></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

const ROUTE_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <rte>
    <name>Route Name</name>
    <rtept lat="45.5" lon="-122.5"><ele>100</ele></rtept>
    <rtept lat="45.51" lon="-122.51"><ele>110</ele></rtept>
  </rte>
</gpx>"#;

const WAYPOINTS_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <metadata>
    <name>Loose points</name>
  </metadata>
  <wpt lat="45.5" lon="-122.5"><name>Point 1</name></wpt>
  <wpt lat="45.51" lon="-122.51"><name>Point 2</name></wpt>
</gpx>"#;

const UNNAMED_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test">
  <trk>
    <trkseg>
      <trkpt lat="45.5" lon="-122.5"></trkpt>
      <trkpt lat="45.51" lon="-122.51"></trkpt>
    </trkseg>
  </trk>
</gpx>"#;

/// Test track points, type and name come from the first track
#[test]
fn test_parse_gpx_track() {
    let imported = parse_gpx(TRACK_GPX.as_bytes()).unwrap();
    assert_eq!(imported.name, "Lap of the Gabba");
    assert_eq!(imported.track_type, TrackType::Circuit);
    assert_eq!(imported.points.len(), 4);
    assert_eq!(imported.points[1].elevation, Some(13.0));
    assert!(!imported.snapped);
}

/// Test routes are used when there are no tracks
#[test]
fn test_parse_gpx_route() {
    let imported = parse_gpx(ROUTE_GPX.as_bytes()).unwrap();
    assert_eq!(imported.name, "Route Name");
    assert_eq!(imported.track_type, TrackType::Sprint);
    assert_eq!(imported.points.len(), 2);
}

/// Test waypoints are the last resort and metadata names the track
#[test]
fn test_parse_gpx_waypoints() {
    let imported = parse_gpx(WAYPOINTS_GPX.as_bytes()).unwrap();
    assert_eq!(imported.name, "Loose points");
    assert_eq!(imported.points.len(), 2);
    assert_eq!(imported.points[0].elevation, None);
}

/// Test malformed input
#[test]
fn test_parse_gpx_malformed() {
    assert!(matches!(
        parse_gpx(b"<gpx><trk>"),
        Err(ImportError::MalformedImport(_))
    ));
}

/// Test unknown extensions are refused
#[test]
fn test_import_file_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("track.kml");
    fs::write(&path, "<kml/>").unwrap();

    assert!(matches!(import_file(&path), Err(ImportError::UnsupportedFormat(_))));
    assert!(matches!(
        import_file(&dir.path().join("missing.gpx")),
        Err(ImportError::FileNotFound(_))
    ));
}

/// Test a directory import reports each file separately
#[test]
fn test_import_directory() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a_gabba.gpx"), TRACK_GPX).unwrap();
    fs::write(dir.path().join("b_broken.gpx"), "nope").unwrap();
    fs::write(dir.path().join("c_unnamed.gpx"), UNNAMED_GPX).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let results = import_directory(dir.path()).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());

    let unnamed = results[2].1.as_ref().unwrap();
    assert_eq!(unnamed.name, "c_unnamed");
}

fn sample_track() -> Track {
    let path = TrackPath::new(vec![
        GeoPoint::new(-27.4700, 153.0200).with_elevation(20.0),
        GeoPoint::new(-27.4650, 153.0210).with_elevation(25.5),
        GeoPoint::new(-27.4600, 153.0250),
    ])
    .unwrap();
    let mut track = Track::new(Uuid::new_v4(), "River run".to_string(), TrackType::Sprint, 1, path);
    track.snapped = true;
    track
}

/// Test an export re-imports with the same geometry and snapped flag
#[test]
fn test_export_reimport() {
    let track = sample_track();
    let json = export_track(&track).to_json().unwrap();

    let imported = parse_export(json.as_bytes()).unwrap();
    assert_eq!(imported.name, "River run");
    assert!(imported.snapped);
    assert_eq!(imported.points, track.path.points());
    assert_eq!(TrackPath::new(imported.points).unwrap().content_hash(), track.hash);
}

/// Test tampered exports are rejected by the hash check
#[test]
fn test_export_hash_mismatch() {
    let mut export = export_track(&sample_track());
    export.points[1].latitude += 0.001;
    let json = export.to_json().unwrap();

    match parse_export(json.as_bytes()) {
        Err(ImportError::MalformedImport(msg)) => assert!(msg.contains("hash")),
        other => panic!("expected hash mismatch, got {:?}", other),
    }
}
