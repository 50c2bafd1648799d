//! Tests for legacy (v2) archives and format detection.

use pmtiles_reader::{
    detect_format, ArchiveError, ArchiveFormat, DetectError, IoError, LegacyArchive, TileRange,
};

use super::test_utils::{
    encode_legacy_directory, legacy_archive, pyramid, LegacyRecord, TrackingMockReader,
};

const LEAF_OFFSET: u64 = 1_000;
const TILES_OFFSET: u64 = 2_000;

fn record(z: u8, x: u32, y: u32, offset: u64, length: u32, is_dir: bool) -> LegacyRecord {
    LegacyRecord {
        z,
        x,
        y,
        offset,
        length,
        is_dir,
    }
}

/// A root with one tile and one leaf pointer at zoom 2; the leaf holds two
/// zoom 3 tiles.
fn sample() -> Vec<u8> {
    let leaf = encode_legacy_directory(&[
        record(3, 2, 2, TILES_OFFSET + 5, 6, false),
        record(3, 3, 3, TILES_OFFSET + 11, 5, false),
    ]);
    let root = [
        record(0, 0, 0, TILES_OFFSET, 5, false),
        record(2, 1, 1, LEAF_OFFSET, leaf.len() as u32, true),
    ];
    legacy_archive(
        &serde_json::json!({ "name": "legacy roads", "minzoom": "0", "maxzoom": "3" }),
        &root,
        &[
            (LEAF_OFFSET, leaf),
            (TILES_OFFSET, b"worldleaf-aleafb".to_vec()),
        ],
    )
}

#[tokio::test]
async fn test_open_reads_header_region_once() {
    let reader = TrackingMockReader::new(sample(), "legacy.pmtiles");
    let archive = LegacyArchive::open(reader.clone()).await.unwrap();

    assert_eq!(archive.header().version, 2);
    assert_eq!(archive.root().len(), 2);
    assert_eq!(reader.request_count(), 1);

    let metadata = archive.get_metadata().unwrap();
    assert_eq!(metadata["name"], "legacy roads");
    assert_eq!(reader.request_count(), 1);
}

#[tokio::test]
async fn test_root_tile_lookup() {
    let archive = LegacyArchive::open(TrackingMockReader::new(sample(), "root"))
        .await
        .unwrap();

    assert_eq!(
        archive.get_tile(0, 0, 0).await.unwrap(),
        Some(TileRange {
            offset: TILES_OFFSET,
            length: 5
        })
    );
    assert_eq!(&archive.read_tile(0, 0, 0).await.unwrap().unwrap()[..], b"world");
}

#[tokio::test]
async fn test_leaf_tile_lookup() {
    let reader = TrackingMockReader::new(sample(), "leaf");
    let archive = LegacyArchive::open(reader.clone()).await.unwrap();

    assert_eq!(&archive.read_tile(3, 2, 2).await.unwrap().unwrap()[..], b"leaf-a");
    assert_eq!(&archive.read_tile(3, 3, 3).await.unwrap().unwrap()[..], b"leafb");

    let requests = reader.get_requests().await;
    assert!(requests.iter().any(|(offset, _)| *offset == LEAF_OFFSET));
}

#[tokio::test]
async fn test_missing_legacy_tiles() {
    let reader = TrackingMockReader::new(sample(), "missing");
    let archive = LegacyArchive::open(reader.clone()).await.unwrap();
    reader.reset_tracking();

    // below the leaf level, no pointer for its ancestor
    assert!(archive.get_tile(3, 0, 0).await.unwrap().is_none());
    // above the leaf level, not in the root
    assert!(archive.get_tile(1, 0, 0).await.unwrap().is_none());
    assert_eq!(reader.request_count(), 0);

    // the leaf exists but does not hold this tile
    assert!(archive.get_tile(3, 2, 3).await.unwrap().is_none());
    assert_eq!(reader.request_count(), 1);
}

#[tokio::test]
async fn test_truncated_leaf_is_an_error() {
    let mut bytes = sample();
    bytes.truncate(LEAF_OFFSET as usize + 10);
    let archive = LegacyArchive::open(TrackingMockReader::new(bytes, "truncated"))
        .await
        .unwrap();

    assert!(matches!(
        archive.get_tile(3, 2, 2).await,
        Err(ArchiveError::Io(IoError::UnexpectedLength { .. }))
    ));
}

#[tokio::test]
async fn test_detect_format_from_store() {
    let v3 = TrackingMockReader::new(pyramid(0).build(), "v3");
    assert_eq!(
        detect_format(&v3).await.unwrap(),
        ArchiveFormat::V3 { version: 3 }
    );

    let v2 = TrackingMockReader::new(sample(), "v2");
    let format = detect_format(&v2).await.unwrap();
    assert_eq!(format, ArchiveFormat::Legacy { version: 2 });
    assert_eq!(format.name(), "PMTiles v2 (legacy)");

    let other = TrackingMockReader::new(b"GIF89a-not-tiles".to_vec(), "gif");
    assert!(matches!(
        detect_format(&other).await,
        Err(DetectError::Format(_))
    ));
}
