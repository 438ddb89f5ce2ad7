//! Narrow capability interface to the torrent engine.
//!
//! The peer wire protocol, trackers, DHT and disk I/O all live behind
//! `TorrentBackend`. The access only adds a torrent, adjusts piece
//! priorities, requests piece reads and drains the alert queue.

pub mod alerts;
pub mod identity;
pub mod simulated;

use std::path::PathBuf;
use std::time::Duration;

pub use alerts::{Alert, TorrentState};
pub use identity::{ClientFingerprint, SessionIdentity};
pub use simulated::SimulatedBackend;

use crate::torrent::{AddTorrentParams, PieceIndex, TorrentMetadata};

/// Download priority of a single piece.
///
/// Values follow the common 0-7 engine scale where 0 disables the piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PiecePriority {
    /// Do not download
    Skip = 0,
    /// Background download
    Low = 1,
    /// Engine default
    Normal = 4,
    /// Needed for playback now
    Top = 7,
}

impl PiecePriority {
    /// Numeric engine level.
    pub fn level(self) -> u8 {
        self as u8
    }
}

/// Everything the engine needs to start a torrent session.
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    pub params: AddTorrentParams,
    /// Directory downloaded pieces are written to
    pub save_path: PathBuf,
    pub identity: SessionIdentity,
}

/// Errors reported by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine session failed: {reason}")]
    SessionFailed { reason: String },

    #[error("No torrent has been added to the engine")]
    NoTorrent,

    #[error("Piece {piece} is out of range")]
    InvalidPiece { piece: PieceIndex },

    #[error("Alert polling failed: {reason}")]
    AlertPoll { reason: String },

    #[error("Engine has shut down")]
    Shutdown,
}

/// Opaque torrent engine handle for a single torrent.
///
/// Implementations must be safe to call from the caller's I/O thread and
/// the alert dispatcher thread concurrently.
pub trait TorrentBackend: Send + Sync {
    /// Adds the torrent and starts the session.
    ///
    /// # Errors
    ///
    /// - `EngineError::SessionFailed` - The engine rejected the torrent
    fn add_torrent(&self, request: &AddTorrentRequest) -> Result<(), EngineError>;

    /// Metadata of the added torrent, once known.
    fn metadata(&self) -> Option<TorrentMetadata>;

    /// Switches between sequential and rarest-first piece picking.
    ///
    /// # Errors
    ///
    /// - `EngineError::NoTorrent` - No torrent added
    fn set_sequential_download(&self, enabled: bool) -> Result<(), EngineError>;

    /// Sets the download priority of one piece.
    ///
    /// # Errors
    ///
    /// - `EngineError::NoTorrent` - No torrent added
    /// - `EngineError::InvalidPiece` - Piece index out of range
    fn set_piece_priority(&self, piece: PieceIndex, priority: PiecePriority)
    -> Result<(), EngineError>;

    /// Asks for the piece to be read once it is available.
    ///
    /// The payload arrives later as `Alert::PieceRead`. `deadline` is a
    /// scheduling hint: the engine should try to have the piece within it.
    ///
    /// # Errors
    ///
    /// - `EngineError::NoTorrent` - No torrent added
    /// - `EngineError::InvalidPiece` - Piece index out of range
    fn read_piece(&self, piece: PieceIndex, deadline: Duration) -> Result<(), EngineError>;

    /// Waits up to `timeout` for alerts and drains the queue.
    ///
    /// Returns an empty batch when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// - `EngineError::AlertPoll` - The alert queue could not be read
    fn poll_alerts(&self, timeout: Duration) -> Result<Vec<Alert>, EngineError>;

    /// Removes the torrent and tears the session down.
    ///
    /// # Errors
    ///
    /// - `EngineError::NoTorrent` - No torrent added
    fn remove_torrent(&self) -> Result<(), EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_levels() {
        assert_eq!(PiecePriority::Skip.level(), 0);
        assert_eq!(PiecePriority::Top.level(), 7);
        assert!(PiecePriority::Top > PiecePriority::Low);
    }
}
