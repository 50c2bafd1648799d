//! pmtiles-reader - Inspect PMTiles archives from the command line.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pmtiles_reader::{
    config::{Cli, Command, TileArgs},
    detect_format, Archive, ArchiveFormat, FileReader, LegacyArchive, SharedCache, TileCoord,
    SPEC_VERSION,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = cli.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "pmtiles_reader=debug"
    } else {
        "pmtiles_reader=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Archive opening
// =============================================================================

enum Opened {
    Current(Archive<FileReader>),
    Legacy(LegacyArchive<FileReader>),
}

async fn open(cli: &Cli) -> Result<Opened, String> {
    let path = cli.archive_path();
    let reader = FileReader::new(path)
        .await
        .map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;

    let format = detect_format(&reader).await.map_err(|e| e.to_string())?;
    debug!(path = %path.display(), format = %format.name(), "Detected archive format");

    match format {
        ArchiveFormat::V3 { version } if version == SPEC_VERSION => {
            let cache = Arc::new(SharedCache::with_config(cli.cache.clone()));
            Ok(Opened::Current(Archive::with_cache(Arc::new(reader), cache)))
        }
        ArchiveFormat::V3 { version } => Err(format!(
            "Unsupported format version {version}: only version {SPEC_VERSION} is supported"
        )),
        ArchiveFormat::Legacy { .. } => {
            let archive = LegacyArchive::open(reader)
                .await
                .map_err(|e| e.to_string())?;
            info!("Reading {}", format.name());
            Ok(Opened::Legacy(archive))
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run(cli: Cli) -> Result<(), String> {
    let archive = open(&cli).await?;

    match (&cli.command, &archive) {
        (Command::Header(_), Opened::Current(a)) => {
            let header = a.get_header().await.map_err(|e| e.to_string())?;
            print_json(&*header)
        }
        (Command::Header(_), Opened::Legacy(a)) => print_json(a.header()),

        (Command::Metadata(_), Opened::Current(a)) => {
            let metadata = a.get_metadata().await.map_err(|e| e.to_string())?;
            print_json(&metadata)
        }
        (Command::Metadata(_), Opened::Legacy(a)) => {
            let metadata = a.get_metadata().map_err(|e| e.to_string())?;
            print_json(&metadata)
        }

        (Command::Tile(args), _) => run_tile(args, &archive).await,

        (Command::Tilejson(args), Opened::Current(a)) => {
            let tilejson = a
                .tile_json(&args.base_url)
                .await
                .map_err(|e| e.to_string())?;
            print_json(&tilejson)
        }
        (Command::Tilejson(_), Opened::Legacy(_)) => {
            Err("TileJSON output requires a version 3 archive".to_string())
        }
    }
}

/// Summary printed for a located tile.
#[derive(Serialize)]
struct TileSummary {
    tile: String,
    offset: u64,
    length: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    compression: Option<pmtiles_reader::Compression>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tile_type: Option<pmtiles_reader::TileType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

async fn run_tile(args: &TileArgs, archive: &Opened) -> Result<(), String> {
    let coord = TileCoord::new(args.z, args.x, args.y);
    let not_found = || format!("Tile {coord} not found");

    let (range, data, compression, tile_type) = match archive {
        Opened::Current(a) => {
            let range = a
                .get_tile(coord.z, coord.x, coord.y)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(not_found)?;
            let tile = a
                .read_tile(coord.z, coord.x, coord.y)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(not_found)?;
            (range, tile.data, Some(tile.compression), Some(tile.tile_type))
        }
        Opened::Legacy(a) => {
            let range = a
                .get_tile(coord.z, coord.x, coord.y)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(not_found)?;
            let data = a
                .read_tile(coord.z, coord.x, coord.y)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(not_found)?;
            (range, data, None, None)
        }
    };

    let output = match &args.output {
        Some(path) => {
            tokio::fs::write(path, &data)
                .await
                .map_err(|e| format!("Cannot write {}: {}", path.display(), e))?;
            info!("Wrote {} bytes to {}", data.len(), path.display());
            Some(path.display().to_string())
        }
        None => None,
    };

    print_json(&TileSummary {
        tile: coord.to_string(),
        offset: range.offset,
        length: range.length,
        compression,
        tile_type,
        output,
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
