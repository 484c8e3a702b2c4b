//! CLI command implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Subcommand;
use piecestream_core::demux::PieceSpan;
use piecestream_core::{DemuxConfig, Demuxer, SelectionPolicy};
use piecestream_sim::{ContentManifest, SimulatedEngine, SwarmConfig, content_handle};
use tokio::fs;
use tracing::info;

use crate::file_output::FileOutput;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Write a synthetic content manifest
    Manifest {
        /// Name of the content; files are placed under it
        #[arg(long, default_value = "sample")]
        name: String,
        /// Piece length in bytes
        #[arg(long, default_value_t = 16384)]
        piece_length: u32,
        /// Comma-separated file sizes in bytes
        #[arg(long, value_delimiter = ',', required = true)]
        sizes: Vec<u64>,
        /// Seed of the generated content
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Where to write the manifest
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show how each file of a manifest maps onto pieces
    Inspect {
        /// Path to the manifest
        manifest: PathBuf,
    },
    /// Stream the selected files of a manifest into a directory
    Demux {
        /// Path to the manifest
        manifest: PathBuf,
        /// Directory receiving one file per stream
        #[arg(short, long)]
        out: PathBuf,
        /// Which files to stream
        #[arg(long, value_enum)]
        policy: Option<SelectionPolicy>,
        /// Pieces requested ahead of each stream's position
        #[arg(long)]
        window: Option<u32>,
        /// Sniff the first bytes of each stream before opening its port
        #[arg(long)]
        typefind: bool,
        /// Directory for the engine's partial download
        #[arg(long)]
        temp: Option<PathBuf>,
        /// Keep the partial download after the run
        #[arg(long)]
        keep_temp: bool,
        /// Pieces the simulated swarm completes per tick
        #[arg(long, default_value_t = 4)]
        pieces_per_tick: u32,
        /// Milliseconds between swarm ticks
        #[arg(long, default_value_t = 50)]
        tick_ms: u64,
        /// Chance that the swarm completes pieces out of order
        #[arg(long, default_value_t = 0.0)]
        reorder: f64,
        /// Compare every written file with the manifest's content
        #[arg(long)]
        verify: bool,
    },
}

/// Options of the `demux` command.
struct DemuxOptions {
    policy: Option<SelectionPolicy>,
    window: Option<u32>,
    typefind: bool,
    temp: Option<PathBuf>,
    keep_temp: bool,
    swarm: SwarmConfig,
    verify: bool,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Manifest {
            name,
            piece_length,
            sizes,
            seed,
            output,
        } => write_manifest(&name, piece_length, &sizes, seed, &output).await,
        Commands::Inspect { manifest } => inspect(&manifest).await,
        Commands::Demux {
            manifest,
            out,
            policy,
            window,
            typefind,
            temp,
            keep_temp,
            pieces_per_tick,
            tick_ms,
            reorder,
            verify,
        } => {
            let options = DemuxOptions {
                policy,
                window,
                typefind,
                temp,
                keep_temp,
                swarm: SwarmConfig::default()
                    .with_speed(pieces_per_tick, Duration::from_millis(tick_ms))
                    .with_reordering(reorder, 0),
                verify,
            };
            demux(&manifest, &out, options).await
        }
    }
}

async fn read_manifest(path: &Path) -> anyhow::Result<(Vec<u8>, ContentManifest)> {
    let description = fs::read(path)
        .await
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let manifest = ContentManifest::from_json(&description)
        .with_context(|| format!("Invalid manifest {}", path.display()))?;
    Ok((description, manifest))
}

/// Write a synthetic manifest
///
/// # Errors
/// - Manifest validation or file write failed
pub async fn write_manifest(
    name: &str,
    piece_length: u32,
    sizes: &[u64],
    seed: u64,
    output: &Path,
) -> anyhow::Result<()> {
    let manifest = ContentManifest::synthetic(name, piece_length, sizes, seed);
    manifest.validate()?;
    fs::write(output, manifest.to_json()?)
        .await
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "Wrote manifest {} ({} files, {} bytes)",
        output.display(),
        manifest.files.len(),
        manifest.total_size()
    );
    Ok(())
}

/// Print the piece span of every file
///
/// # Errors
/// - Manifest could not be read or parsed
pub async fn inspect(path: &Path) -> anyhow::Result<()> {
    let (description, manifest) = read_manifest(path).await?;
    let content = manifest.content();

    println!("Content: {}", manifest.name);
    println!("  Handle: {}", content_handle(&description));
    println!(
        "  Pieces: {} x {} bytes ({} bytes total)",
        content.num_pieces,
        content.piece_length,
        content.total_size()
    );
    for file in &content.files {
        let span = PieceSpan::for_range(content.piece_length, file.offset, file.size);
        println!(
            "  [{}] {} - {} bytes at offset {}, pieces {}..={} (start offset {}, end offset {})",
            file.index,
            file.path,
            file.size,
            file.offset,
            span.start_piece,
            span.last_data_piece(),
            span.start_offset,
            span.end_offset
        );
    }
    Ok(())
}

/// Run the demuxer on the simulated engine until every stream ended
///
/// # Errors
/// - Manifest could not be read, demuxer setup failed, or the run failed
async fn demux(path: &Path, out: &Path, options: DemuxOptions) -> anyhow::Result<()> {
    let (description, manifest) = read_manifest(path).await?;

    let mut config = DemuxConfig::from_env();
    if let Some(policy) = options.policy {
        config = config.with_selection(policy);
    }
    if let Some(window) = options.window {
        config = config.with_window(window);
    }
    if options.typefind {
        config = config.with_typefind(true);
    }
    if let Some(temp) = options.temp {
        config.storage.temp_path = temp;
    }
    if options.keep_temp {
        config.storage.delete_on_teardown = false;
    }

    let swarm = SwarmConfig {
        seed: manifest.seed,
        ..options.swarm
    };
    let engine = Arc::new(SimulatedEngine::new(swarm)?);
    let output = Arc::new(FileOutput::new(out));
    let demuxer = Demuxer::new(engine, output.clone(), config)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    demuxer.start()?;
    demuxer.push_description(&description);
    demuxer.end_of_description()?;
    info!(manifest = %path.display(), out = %out.display(), "Demuxing");

    loop {
        tokio::select! {
            _ = output.changed() => {
                if output.is_finished() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || demuxer.stop()).await??;

    if let Some(failure) = output.failure() {
        bail!(failure);
    }

    let mut mismatched = Vec::new();
    for summary in output.summary() {
        let state = if summary.ended { "complete" } else { "partial" };
        println!(
            "  [{}] {} - {} bytes ({state})",
            summary.port,
            summary.path.display(),
            summary.written
        );
        if options.verify {
            let expected = manifest.file_bytes(summary.port).unwrap_or_default();
            let written = fs::read(&summary.path).await.unwrap_or_default();
            if written != expected {
                mismatched.push(summary.path.display().to_string());
            }
        }
    }
    if !mismatched.is_empty() {
        bail!("Output differs from content: {}", mismatched.join(", "));
    }
    if options.verify {
        println!("All outputs match the content");
    }
    Ok(())
}
