//! Torrent creation from local content with piece splitting and hashing
//!
//! Produces metadata and bencoded `.torrent` documents for content served by
//! the simulated engine.

use std::path::Path;

use sha1::{Digest, Sha1};

use super::parsing::{TorrentFile, TorrentMetadata};
use super::{InfoHash, TorrentError};

/// Standard BitTorrent piece size (256KB)
pub const DEFAULT_PIECE_SIZE: u32 = 262_144;

/// Torrent creator for converting local content to torrent format
pub struct TorrentCreator {
    piece_size: u32,
}

impl Default for TorrentCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl TorrentCreator {
    /// Creates torrent creator with default piece size (256KB)
    pub fn new() -> Self {
        Self {
            piece_size: DEFAULT_PIECE_SIZE,
        }
    }

    /// Creates torrent creator with custom piece size
    pub fn with_piece_size(piece_size: u32) -> Self {
        Self { piece_size }
    }

    /// Creates single-file torrent metadata from in-memory content.
    ///
    /// # Errors
    /// - `TorrentError::InvalidTorrentFile` - Empty content or zero piece size
    pub fn create_from_bytes(
        &self,
        name: &str,
        content: &[u8],
        announce_urls: Vec<String>,
    ) -> Result<TorrentMetadata, TorrentError> {
        if content.is_empty() {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Cannot create torrent from empty content".to_string(),
            });
        }
        if self.piece_size == 0 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Piece size must be positive".to_string(),
            });
        }

        let piece_hashes = content
            .chunks(self.piece_size as usize)
            .map(|piece| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&Sha1::digest(piece));
                hash
            })
            .collect();

        let mut metadata = TorrentMetadata {
            info_hash: InfoHash::new([0u8; 20]),
            name: name.to_string(),
            piece_length: self.piece_size,
            piece_hashes,
            total_length: content.len() as u64,
            files: vec![TorrentFile {
                path: vec![name.to_string()],
                length: content.len() as u64,
            }],
            announce_urls,
        };
        let digest = Sha1::digest(encode_info_dictionary(&metadata));
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);
        metadata.info_hash = InfoHash::new(hash);

        Ok(metadata)
    }

    /// Creates single-file torrent metadata from a file on disk.
    ///
    /// # Errors
    /// - `TorrentError::Io` - File read error or access denied
    /// - `TorrentError::InvalidTorrentFile` - Empty file or invalid filename
    pub fn create_from_file(
        &self,
        file_path: &Path,
        announce_urls: Vec<String>,
    ) -> Result<TorrentMetadata, TorrentError> {
        let file_name = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| TorrentError::InvalidTorrentFile {
                reason: format!("Invalid filename: {}", file_path.display()),
            })?
            .to_string();

        let content = std::fs::read(file_path)?;
        self.create_from_bytes(&file_name, &content, announce_urls)
    }
}

/// Encodes metadata as a bencoded `.torrent` document.
pub fn encode_torrent(metadata: &TorrentMetadata) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'd');
    if let Some(announce) = metadata.announce_urls.first() {
        push_string(&mut out, b"announce");
        push_string(&mut out, announce.as_bytes());
    }
    push_string(&mut out, b"info");
    out.extend_from_slice(&encode_info_dictionary(metadata));
    out.push(b'e');
    out
}

/// Encodes the info dictionary with keys in bencode's sorted order.
fn encode_info_dictionary(metadata: &TorrentMetadata) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(b'd');

    let single_file = matches!(
        metadata.files.as_slice(),
        [file] if file.path.len() == 1 && file.path[0] == metadata.name
    );

    if single_file {
        push_string(&mut out, b"length");
        push_integer(&mut out, metadata.total_length);
    } else {
        push_string(&mut out, b"files");
        out.push(b'l');
        for file in &metadata.files {
            out.push(b'd');
            push_string(&mut out, b"length");
            push_integer(&mut out, file.length);
            push_string(&mut out, b"path");
            out.push(b'l');
            for component in &file.path {
                push_string(&mut out, component.as_bytes());
            }
            out.push(b'e');
            out.push(b'e');
        }
        out.push(b'e');
    }

    push_string(&mut out, b"name");
    push_string(&mut out, metadata.name.as_bytes());
    push_string(&mut out, b"piece length");
    push_integer(&mut out, u64::from(metadata.piece_length));
    push_string(&mut out, b"pieces");
    push_string(&mut out, &metadata.piece_hashes.concat());

    out.push(b'e');
    out
}

fn push_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

fn push_integer(out: &mut Vec<u8>, value: u64) {
    out.push(b'i');
    out.extend_from_slice(value.to_string().as_bytes());
    out.push(b'e');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::parsing::BencodeParser;

    #[test]
    fn test_create_splits_content_into_pieces() {
        let content = vec![0xabu8; 40_000];
        let metadata = TorrentCreator::with_piece_size(16_384)
            .create_from_bytes("movie.mp4", &content, vec![])
            .unwrap();

        assert_eq!(metadata.piece_count(), 3);
        assert_eq!(metadata.total_length, 40_000);
        assert_eq!(
            metadata.piece_hashes[2].as_slice(),
            Sha1::digest(&content[32_768..]).as_slice()
        );
    }

    #[test]
    fn test_encoded_torrent_parses_to_same_metadata() {
        let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let metadata = TorrentCreator::with_piece_size(16_384)
            .create_from_bytes(
                "clip.webm",
                &content,
                vec!["http://tracker.example.com/announce".to_string()],
            )
            .unwrap();

        let parsed = BencodeParser::parse_torrent_bytes(&encode_torrent(&metadata)).unwrap();
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn test_multi_file_encoding_round_trips_file_list() {
        let mut metadata = TorrentCreator::with_piece_size(1000)
            .create_from_bytes("bundle", &[1u8; 2500], vec![])
            .unwrap();
        metadata.files = vec![
            TorrentFile {
                path: vec!["a".to_string(), "intro.mkv".to_string()],
                length: 1500,
            },
            TorrentFile {
                path: vec!["b.srt".to_string()],
                length: 1000,
            },
        ];

        let parsed = BencodeParser::parse_torrent_bytes(&encode_torrent(&metadata)).unwrap();
        assert_eq!(parsed.files, metadata.files);
    }

    #[test]
    fn test_create_rejects_empty_content() {
        let result = TorrentCreator::new().create_from_bytes("empty", &[], vec![]);
        assert!(matches!(
            result,
            Err(TorrentError::InvalidTorrentFile { .. })
        ));
    }
}
