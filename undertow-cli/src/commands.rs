//! CLI command implementations

use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::Subcommand;
use undertow_core::config::UndertowConfig;
use undertow_core::engine::{SimulatedBackend, TorrentBackend};
use undertow_core::streaming::FileEntry;
use undertow_core::torrent::{
    AddTorrentParams, DEFAULT_PIECE_SIZE, TorrentCreator, TorrentMetadata, encode_torrent,
    parse_access_uri,
};
use undertow_core::{TorrentStream, UndertowError};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the files of a torrent
    Files {
        /// torrent:// URI of a .torrent file
        uri: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Create a .torrent file for local content
    Create {
        /// File to describe
        input: PathBuf,
        /// Where to write the .torrent (defaults next to the input)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Piece size in bytes
        #[arg(long, default_value_t = DEFAULT_PIECE_SIZE)]
        piece_size: u32,
        /// Announce URL, repeatable
        #[arg(long = "tracker")]
        trackers: Vec<String>,
    },
    /// Stream a file through the pipeline against a simulated swarm
    Play {
        /// torrent:// URI of a .torrent file, optionally with #file_at=<index>
        uri: String,
        /// Content the simulated swarm serves (file, or directory for multi-file torrents)
        #[arg(long)]
        content: PathBuf,
        /// Where to write the streamed bytes
        #[arg(short, long)]
        output: PathBuf,
        /// File to stream when the URI selects none
        #[arg(long)]
        file_index: Option<usize>,
        /// Byte offset to start streaming from
        #[arg(long, default_value_t = 0)]
        seek: u64,
        /// Deliver pieces out of order, shuffled with this seed
        #[arg(long)]
        shuffle_seed: Option<u64>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Files { uri, json } => list_files(&uri, json),
        Commands::Create {
            input,
            output,
            piece_size,
            trackers,
        } => create_torrent(&input, output, piece_size, trackers),
        Commands::Play {
            uri,
            content,
            output,
            file_index,
            seek,
            shuffle_seed,
        } => {
            let mut config = UndertowConfig::from_env()?;
            if file_index.is_some() {
                config.access.file_index = file_index;
            }
            if shuffle_seed.is_some() {
                config.simulation.deterministic_seed = shuffle_seed;
                config.simulation.hold_reads = true;
            }
            play(&uri, &content, &output, seek, &config)
        }
    }
}

/// List the files of a torrent
///
/// # Errors
/// - `UndertowError::Torrent` - URI or .torrent file invalid
pub fn list_files(uri: &str, json: bool) -> anyhow::Result<()> {
    let params = parse_access_uri(uri).map_err(UndertowError::from)?;
    let metadata = local_metadata(&params)?;
    let entries = file_entries(metadata);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("{} ({})", metadata.name, metadata.info_hash);
    println!("{:-<60}", "");
    for entry in &entries {
        println!("{:>4}  {:>14}  {}", entry.index, entry.length, entry.path);
    }
    if entries.len() > 1 {
        println!("\nStream one with: undertow play '{}' ...", params.file_uri(0));
    }
    Ok(())
}

/// Create a .torrent file for local content
///
/// # Errors
/// - `UndertowError::Torrent` - Input unreadable or empty
/// - `std::io::Error` - Output cannot be written
pub fn create_torrent(
    input: &Path,
    output: Option<PathBuf>,
    piece_size: u32,
    trackers: Vec<String>,
) -> anyhow::Result<()> {
    let metadata = TorrentCreator::with_piece_size(piece_size)
        .create_from_file(input, trackers)
        .map_err(UndertowError::from)?;
    let output = output.unwrap_or_else(|| input.with_extension("torrent"));

    std::fs::write(&output, encode_torrent(&metadata))
        .with_context(|| format!("writing {}", output.display()))?;

    println!("Created {}", output.display());
    println!("  Info hash: {}", metadata.info_hash);
    println!(
        "  Pieces: {} x {} bytes",
        metadata.piece_count(),
        metadata.piece_length
    );
    Ok(())
}

/// Stream a file of the torrent into `output`
///
/// # Errors
/// - `UndertowError` - Open, metadata or piece failures of the pipeline
/// - `std::io::Error` - Content unreadable or output unwritable
pub fn play(
    uri: &str,
    content: &Path,
    output: &Path,
    seek: u64,
    config: &UndertowConfig,
) -> anyhow::Result<()> {
    let params = parse_access_uri(uri).map_err(UndertowError::from)?;
    let metadata = local_metadata(&params)?.clone();
    let payload = load_content(&metadata, content)?;

    let mut backend = SimulatedBackend::new(metadata, payload).map_err(UndertowError::from)?;
    if config.simulation.hold_reads {
        backend = backend.with_held_reads();
    }
    if let Some(seed) = config.simulation.deterministic_seed {
        backend = backend.with_seed(seed);
    }
    let backend = Arc::new(backend);

    let started = Instant::now();
    let done = AtomicBool::new(false);
    let copied = thread::scope(|scope| {
        if config.simulation.hold_reads {
            scope.spawn(|| deliver_until_done(&backend, &done));
        }
        let result = stream_to_file(uri, backend.clone(), config, seek, output);
        done.store(true, Ordering::SeqCst);
        result
    })?;

    println!(
        "Streamed {copied} bytes to {} in {:.2?}",
        output.display(),
        started.elapsed()
    );
    Ok(())
}

fn stream_to_file(
    uri: &str,
    backend: Arc<dyn TorrentBackend>,
    config: &UndertowConfig,
    seek: u64,
    output: &Path,
) -> anyhow::Result<u64> {
    let mut stream =
        TorrentStream::open(uri, backend, config.access.clone()).map_err(UndertowError::from)?;
    if seek > 0 {
        stream
            .seek(SeekFrom::Start(seek))
            .with_context(|| format!("seeking to byte {seek}"))?;
    }

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let copied = io::copy(&mut stream, &mut writer).context("streaming torrent content")?;
    writer.flush()?;
    stream.close();
    Ok(copied)
}

/// Plays the swarm: hands out held piece reads in shuffled batches.
fn deliver_until_done(backend: &SimulatedBackend, done: &AtomicBool) {
    while !done.load(Ordering::SeqCst) {
        let delivered = backend.deliver_held();
        if delivered > 0 {
            tracing::trace!("Delivered {delivered} held pieces");
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn local_metadata(params: &AddTorrentParams) -> anyhow::Result<&TorrentMetadata> {
    params.metadata().ok_or_else(|| {
        anyhow!(
            "{} carries no metadata; use a torrent:// URI naming a .torrent file",
            params.uri
        )
    })
}

fn file_entries(metadata: &TorrentMetadata) -> Vec<FileEntry> {
    metadata
        .files
        .iter()
        .enumerate()
        .map(|(index, file)| FileEntry {
            index,
            path: file.display_path(),
            length: file.length,
        })
        .collect()
}

/// Reads the torrent's content from a single file, or from a directory
/// laid out like the torrent's file list.
fn load_content(metadata: &TorrentMetadata, path: &Path) -> anyhow::Result<Vec<u8>> {
    if !path.is_dir() {
        return std::fs::read(path).with_context(|| format!("reading {}", path.display()));
    }

    let mut content = Vec::with_capacity(metadata.total_length as usize);
    for file in &metadata.files {
        let file_path = file.path.iter().fold(path.to_path_buf(), |p, c| p.join(c));
        let bytes =
            std::fs::read(&file_path).with_context(|| format!("reading {}", file_path.display()))?;
        content.extend_from_slice(&bytes);
    }
    Ok(content)
}
