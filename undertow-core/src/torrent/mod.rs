//! Torrent identities, metadata parsing and access URI handling

pub mod creation;
pub mod parsing;
pub mod uri;

use std::fmt;

pub use creation::{DEFAULT_PIECE_SIZE, TorrentCreator, encode_torrent};
pub use parsing::{MagnetLink, PieceSpan, TorrentFile, TorrentMetadata};
pub use uri::{AddTorrentParams, TorrentSource, parse_access_uri};

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used to uniquely identify torrents across the BitTorrent network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Parses a 40 character hex encoded info hash.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidInfoHash` - Wrong length or non-hex characters
    pub fn from_hex(hex_str: &str) -> Result<Self, TorrentError> {
        if hex_str.len() != 40 {
            return Err(TorrentError::InvalidInfoHash {
                reason: format!("Invalid hash length: {} (expected 40)", hex_str.len()),
            });
        }

        let bytes = hex::decode(hex_str).map_err(|e| TorrentError::InvalidInfoHash {
            reason: format!("Invalid hex in hash {hex_str}: {e}"),
        })?;

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }

    /// Parses a 32 character RFC 4648 base32 info hash, as found in older
    /// magnet links. Case-insensitive, no padding.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidInfoHash` - Wrong length or characters outside the alphabet
    pub fn from_base32(encoded: &str) -> Result<Self, TorrentError> {
        const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

        if encoded.len() != 32 {
            return Err(TorrentError::InvalidInfoHash {
                reason: format!("Invalid hash length: {} (expected 32)", encoded.len()),
            });
        }

        let mut hash = [0u8; 20];
        let mut written = 0;
        let mut bits = 0u64;
        let mut bit_count = 0u32;
        for c in encoded.bytes() {
            let value = ALPHABET
                .iter()
                .position(|&x| x == c.to_ascii_uppercase())
                .ok_or_else(|| TorrentError::InvalidInfoHash {
                    reason: format!("Invalid base32 in hash {encoded}"),
                })?;
            bits = (bits << 5) | value as u64;
            bit_count += 5;

            if bit_count >= 8 {
                bit_count -= 8;
                hash[written] = (bits >> bit_count) as u8;
                written += 1;
                bits &= (1 << bit_count) - 1;
            }
        }
        Ok(Self(hash))
    }

    /// Parses either encoding used in `xt=urn:btih:` topics.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidInfoHash` - Neither 40 hex nor 32 base32 characters
    pub fn from_btih(encoded: &str) -> Result<Self, TorrentError> {
        match encoded.len() {
            32 => Self::from_base32(encoded),
            _ => Self::from_hex(encoded),
        }
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors raised while parsing torrents, magnet links and access URIs.
///
/// All of these surface at open time; nothing here is retried.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Invalid magnet link: {reason}")]
    InvalidMagnetLink { reason: String },

    #[error("Invalid info hash: {reason}")]
    InvalidInfoHash { reason: String },

    #[error("Unsupported access URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("File index {index} out of range (torrent has {file_count} files)")]
    FileIndexOutOfRange { index: usize, file_count: usize },

    #[error("Offset {offset} beyond end of file ({file_length} bytes)")]
    OffsetOutOfRange { offset: u64, file_length: u64 },

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("URL parsing error")]
    UrlParsing(#[from] url::ParseError),
}
