//! `.torrent` file and magnet link parsing.
//!
//! Metadata extraction using bencode-rs and magnet-url.

pub mod bencode;
pub mod magnet;
pub mod types;

use std::path::Path;

pub use bencode::BencodeParser;
pub use magnet::MagnetParser;
pub use types::{MagnetLink, PieceSpan, TorrentFile, TorrentMetadata};

use super::TorrentError;

/// Reads and parses a `.torrent` file from disk.
///
/// # Errors
/// - `TorrentError::Io` - File could not be read
/// - `TorrentError::InvalidTorrentFile` - Parsing failure
pub fn parse_torrent_file(path: &Path) -> Result<TorrentMetadata, TorrentError> {
    let file_contents = std::fs::read(path)?;
    BencodeParser::parse_torrent_bytes(&file_contents)
}
