//! End-to-end tests for tile lookups through `Archive`.

use std::sync::Arc;

use pmtiles_reader::{
    tile_id_to_zxy, Archive, ArchiveError, CacheConfig, Compression, FileReader, SharedCache,
    TileType,
};

use super::test_utils::{pyramid, tile_id, TestArchive, TrackingMockReader};

fn open(reader: TrackingMockReader) -> Archive<TrackingMockReader> {
    Archive::new(reader)
}

// =============================================================================
// Lookups
// =============================================================================

#[tokio::test]
async fn test_single_root_entry_resolves() {
    let bytes = TestArchive::new().tile(0, 0, 0, &[0xAB; 69]).build();
    let archive = open(TrackingMockReader::new(bytes, "single"));
    let header = archive.get_header().await.unwrap();

    let range = archive.get_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(range.offset, header.tile_data_offset);
    assert_eq!(range.length, 69);

    let tile = archive.read_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(&tile.data[..], &[0xAB; 69]);
    assert_eq!(tile.compression, Compression::None);
    assert_eq!(tile.tile_type, TileType::Mvt);
}

#[tokio::test]
async fn test_uncovered_coordinate_not_found() {
    let bytes = TestArchive::new()
        .zoom_range(0, 2)
        .tile(2, 1, 1, b"a")
        .build();
    let archive = open(TrackingMockReader::new(bytes, "sparse"));

    assert!(archive.get_tile(2, 1, 1).await.unwrap().is_some());
    assert!(archive.get_tile(2, 1, 2).await.unwrap().is_none());
    assert!(archive.get_tile(0, 0, 0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_length_entries_share_payload() {
    // ids 5..9 are the first four tiles at zoom 2
    let bytes = TestArchive::new()
        .zoom_range(0, 2)
        .run(tile_id(2, 0, 0), 4, b"ocean")
        .build();
    let archive = open(TrackingMockReader::new(bytes, "runs"));

    let first = archive.get_tile(2, 0, 0).await.unwrap().unwrap();
    for (x, y) in [(0, 1), (1, 1), (1, 0)] {
        assert_eq!(archive.get_tile(2, x, y).await.unwrap(), Some(first));
    }
    // the fifth id along the curve is outside the run
    let (z, x, y) = tile_id_to_zxy(tile_id(2, 0, 0) + 4).unwrap();
    assert!(archive.get_tile(z, x, y).await.unwrap().is_none());
}

#[tokio::test]
async fn test_leaf_directories_full_pyramid() {
    let bytes = pyramid(3).gzip_internal().leaf_size(7).build();
    let reader = TrackingMockReader::new(bytes, "pyramid");
    let archive = open(reader.clone());

    let header = archive.get_header().await.unwrap();
    assert_eq!(header.internal_compression, Compression::Gzip);
    assert!(header.leaf_directory_length > 0);
    assert_eq!(header.num_addressed_tiles, 85);

    for z in 0..=3u8 {
        let n = 1u32 << z;
        for x in 0..n {
            for y in 0..n {
                let tile = archive.read_tile(z, x, y).await.unwrap().unwrap();
                assert_eq!(tile.data, format!("{z}/{x}/{y}").into_bytes());
            }
        }
    }

    // Directories are cached: a second pass only reads payloads
    reader.reset_tracking();
    for z in 0..=3u8 {
        archive.read_tile(z, 0, 0).await.unwrap().unwrap();
    }
    assert_eq!(reader.request_count(), 4);
}

#[tokio::test]
async fn test_zoom_outside_range_reads_nothing() {
    let bytes = pyramid(1).build();
    let reader = TrackingMockReader::new(bytes, "zoom");
    let archive = open(reader.clone());
    archive.get_header().await.unwrap();

    reader.reset_tracking();
    assert!(archive.get_tile(2, 0, 0).await.unwrap().is_none());
    assert!(archive.get_tile(26, 0, 0).await.unwrap().is_none());
    assert_eq!(reader.request_count(), 0);
}

#[tokio::test]
async fn test_min_zoom_respected() {
    let bytes = TestArchive::new()
        .zoom_range(1, 1)
        .tile(1, 0, 0, b"a")
        .build();
    let archive = open(TrackingMockReader::new(bytes, "minzoom"));
    assert!(archive.get_tile(0, 0, 0).await.unwrap().is_none());
    assert!(archive.get_tile(1, 0, 0).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_coordinates() {
    let archive = open(TrackingMockReader::new(pyramid(1).build(), "bad"));
    assert!(matches!(
        archive.get_tile(27, 0, 0).await,
        Err(ArchiveError::TileId(_))
    ));
    assert!(matches!(
        archive.get_tile(0, 1, 1).await,
        Err(ArchiveError::TileId(_))
    ));
}

// =============================================================================
// Metadata and TileJSON
// =============================================================================

#[tokio::test]
async fn test_metadata_gzip() {
    let bytes = TestArchive::new()
        .gzip_internal()
        .tile(0, 0, 0, b"x")
        .metadata(serde_json::json!({ "name": "roads", "format": "pbf" }))
        .build();
    let reader = TrackingMockReader::new(bytes, "meta");
    let archive = open(reader.clone());

    let metadata = archive.get_metadata().await.unwrap();
    assert_eq!(metadata["name"], "roads");
    assert_eq!(metadata["format"], "pbf");

    // header read + metadata read, no directory traffic
    assert_eq!(reader.request_count(), 2);
}

#[tokio::test]
async fn test_invalid_metadata_json() {
    let mut bytes = TestArchive::new()
        .tile(0, 0, 0, b"x")
        .metadata(serde_json::json!({ "name": "abc" }))
        .build();
    let start = bytes.windows(4).position(|w| w == b"name").unwrap();
    bytes[start - 2] = b'[';

    let archive = open(TrackingMockReader::new(bytes, "badmeta"));
    assert!(matches!(
        archive.get_metadata().await,
        Err(ArchiveError::Format(pmtiles_reader::FormatError::InvalidMetadata(_)))
    ));
}

#[tokio::test]
async fn test_tile_json() {
    let bytes = pyramid(2)
        .tile_type(2)
        .center(1, 10.5, -20.25)
        .metadata(serde_json::json!({
            "name": "imagery",
            "description": "satellite",
            "attribution": "test"
        }))
        .build();
    let archive = open(TrackingMockReader::new(bytes, "tilejson"));

    let tilejson = archive.tile_json("https://example.com/tiles").await.unwrap();
    assert_eq!(tilejson.tiles, vec!["https://example.com/tiles/{z}/{x}/{y}.png"]);
    assert_eq!(tilejson.maxzoom, 2);
    assert_eq!(tilejson.center, [10.5, -20.25, 1.0]);

    let json = serde_json::to_value(&tilejson).unwrap();
    assert_eq!(json["tilejson"], "3.0.0");
    assert_eq!(json["scheme"], "xyz");
    assert_eq!(json["description"], "satellite");
    assert!(json.get("vector_layers").is_none());
}

// =============================================================================
// Concurrency and replacement
// =============================================================================

#[tokio::test]
async fn test_concurrent_lookups_share_reads() {
    let bytes = pyramid(3).leaf_size(10).build();
    let reader = TrackingMockReader::new(bytes, "concurrent")
        .with_delay(std::time::Duration::from_millis(20));
    let archive = Arc::new(open(reader.clone()));

    let mut handles = Vec::new();
    for x in 0..8u32 {
        for y in 0..8u32 {
            let archive = Arc::clone(&archive);
            handles.push(tokio::spawn(async move {
                archive.get_tile(3, x, y).await
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().is_some());
    }

    let requests = reader.get_requests().await;
    let header_reads = requests.iter().filter(|(offset, _)| *offset == 0).count();
    assert_eq!(header_reads, 1);

    // each leaf directory was read once
    let mut unique = requests.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique.len(), requests.len());
}

#[tokio::test]
async fn test_replaced_archive_is_reread() {
    let old = TestArchive::new().tile(0, 0, 0, b"before").build();
    let new = TestArchive::new()
        .zoom_range(0, 1)
        .tile(0, 0, 0, b"after the replacement")
        .tile(1, 0, 0, b"child")
        .build();

    let reader = TrackingMockReader::new(old, "replaced").with_version("v1");
    let archive = open(reader.clone());
    let tile = archive.read_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(&tile.data[..], b"before");

    reader.replace(new, "v2");

    let tile = archive.read_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(&tile.data[..], b"after the replacement");
    assert_eq!(
        archive.get_header().await.unwrap().etag.as_deref(),
        Some("v2")
    );
    assert!(archive.get_tile(1, 0, 0).await.unwrap().is_some());
}

#[tokio::test]
async fn test_transport_failure_not_cached() {
    let reader = TrackingMockReader::new(pyramid(1).build(), "flaky");
    let archive = open(reader.clone());

    reader.fail_next_read();
    assert!(matches!(
        archive.get_tile(1, 0, 0).await,
        Err(ArchiveError::Io(_))
    ));
    assert!(archive.cache().is_empty());

    assert!(archive.get_tile(1, 0, 0).await.unwrap().is_some());
}

#[tokio::test]
async fn test_archives_share_one_cache() {
    let cache = Arc::new(SharedCache::with_config(CacheConfig {
        max_entries: 64,
        prefetch_root: true,
    }));
    let first = Archive::with_cache(
        Arc::new(TrackingMockReader::new(
            TestArchive::new().tile(0, 0, 0, b"first").build(),
            "first",
        )),
        Arc::clone(&cache),
    );
    let second = Archive::with_cache(
        Arc::new(TrackingMockReader::new(
            TestArchive::new().tile(0, 0, 0, b"second!").build(),
            "second",
        )),
        Arc::clone(&cache),
    );

    let a = first.read_tile(0, 0, 0).await.unwrap().unwrap();
    let b = second.read_tile(0, 0, 0).await.unwrap().unwrap();
    assert_eq!(&a.data[..], b"first");
    assert_eq!(&b.data[..], b"second!");
    assert_eq!(cache.len(), 4);
}

#[tokio::test]
async fn test_file_reader_end_to_end() {
    let path = std::env::temp_dir().join(format!(
        "pmtiles-reader-it-{}.pmtiles",
        std::process::id()
    ));
    tokio::fs::write(&path, pyramid(2).gzip_internal().leaf_size(4).build())
        .await
        .unwrap();

    let archive = Archive::new(FileReader::new(&path).await.unwrap());
    let tile = archive.read_tile(2, 3, 1).await.unwrap().unwrap();
    assert_eq!(&tile.data[..], b"2/3/1");
    assert!(archive.get_header().await.unwrap().etag.is_some());

    // a rewritten file reports a new version and is picked up
    tokio::fs::write(&path, pyramid(3).tile(2, 3, 1, b"rewritten").build())
        .await
        .unwrap();
    let tile = archive.read_tile(2, 3, 1).await.unwrap().unwrap();
    assert_eq!(&tile.data[..], b"rewritten");

    tokio::fs::remove_file(&path).await.unwrap();
}
