//! Lease responses as the coordination API sends them.

use pipeline::lease_api::{parse_lease_response, release_request};
use pipeline::transfer::should_fetch;
use pipeline::{normalize_chunk, OffGridPolicy, SourcesConfig};
use serde_json::json;
use test_utils::{chunks, lease, scheme};
use tile_common::AreaName;

#[test]
fn test_named_area_lease() {
    let response = json!({ "statusCode": 200, "body": lease::NAMED_AREA_BODY });
    let chunk = parse_lease_response(&response, scheme::CHUNK_SIZE).unwrap();

    assert_eq!(chunk.id, "6f1c2d9e-area");
    assert_eq!(chunk.area_name, AreaName::Named("NZ20_Hawkes".into()));
    assert_eq!((chunk.xmin(), chunk.ymin()), chunks::ORIGIN);
    assert_eq!(chunk.bounds.max_y, chunks::bounds(chunks::ORIGIN).3);
    assert_eq!(chunk.source_files.len(), 3);
    assert!(!chunk.overwrite);

    let (endpoint, payload) = release_request(&chunk);
    assert_eq!(endpoint, "release_area_v2");
    assert_eq!(payload["area_name"], "NZ20_Hawkes");

    let sources = SourcesConfig {
        reindex_areas: vec!["NZ20_Hawkes".into()],
        ..Default::default()
    };
    let wanted: Vec<_> = chunk
        .source_files
        .iter()
        .filter(|uri| should_fetch(uri, &chunk, &sources))
        .collect();
    assert_eq!(wanted, vec!["s3://lidar/a.laz", "s3://lidar/b.laz"]);
}

#[test]
fn test_legacy_lease() {
    let response = json!({ "body": lease::LEGACY_BODY });
    let chunk = parse_lease_response(&response, scheme::CHUNK_SIZE).unwrap();

    assert!(chunk.area_name.is_legacy());
    assert_eq!((chunk.xmin(), chunk.ymin()), chunks::EAST_NEIGHBOUR);
    assert!(chunk.overwrite);

    let (endpoint, payload) = release_request(&chunk);
    assert_eq!(endpoint, "release_area");
    assert_eq!(payload, json!({ "uuid": "legacy-1" }));
}

#[test]
fn test_off_grid_lease_policies() {
    let body = format!(
        r#"{{"uuid":"off","files":"","xmin":{},"ymin":{}}}"#,
        chunks::OFF_GRID.0,
        chunks::OFF_GRID.1
    );
    let chunk = parse_lease_response(&json!({ "body": body }), scheme::CHUNK_SIZE).unwrap();
    assert!(chunk.source_files.is_empty());

    assert!(normalize_chunk(chunk.clone(), scheme::CHUNK_SIZE, OffGridPolicy::Reject).is_err());

    let snapped = normalize_chunk(chunk, scheme::CHUNK_SIZE, OffGridPolicy::Snap).unwrap();
    assert_eq!((snapped.xmin(), snapped.ymin()), chunks::EAST_NEIGHBOUR);
}
