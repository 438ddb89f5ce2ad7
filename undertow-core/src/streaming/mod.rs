//! Piece acquisition pipeline turning torrent pieces into an ordered,
//! blocking byte stream.
//!
//! The engine delivers pieces asynchronously and in any order. An
//! `EventDispatcher` thread drains its alerts into a `PieceBuffer` and a
//! `SwarmStateTracker`; the caller's thread drives `TorrentAccess`, which
//! asks the `PieceSelector` for the pieces ahead of the playback position
//! and blocks on the buffer front. `TorrentStream` wraps the access as
//! `std::io::Read + Seek`.

pub mod access;
pub mod dispatcher;
pub mod piece_buffer;
pub mod piece_selector;
pub mod stream;
pub mod swarm_state;

use std::time::Duration;

pub use access::{AccessCapabilities, AccessPhase, FileEntry, NextPiece, TorrentAccess};
pub use dispatcher::EventDispatcher;
pub use piece_buffer::{Piece, PieceBuffer};
pub use piece_selector::PieceSelector;
pub use stream::TorrentStream;
pub use swarm_state::{SwarmState, SwarmStateTracker};

use crate::engine::EngineError;
use crate::torrent::{PieceIndex, TorrentError};

/// Errors raised by the streaming pipeline.
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("Timed out after {waited:?} waiting for torrent metadata")]
    MetadataTimeout { waited: Duration },

    #[error("Engine reached a metadata state but returned no metadata")]
    MetadataUnavailable,

    #[error("Timed out after {waited:?} waiting for piece {piece}")]
    PieceTimeout { piece: PieceIndex, waited: Duration },

    #[error("Engine failed to read piece {piece}: {reason}")]
    PieceReadFailed { piece: PieceIndex, reason: String },

    #[error("Piece {piece} holds {actual} bytes, window needs {needed}")]
    PieceTooSmall {
        piece: PieceIndex,
        needed: u64,
        actual: usize,
    },

    #[error("No piece queued for reading")]
    BufferEmpty,

    #[error("Torrent has {file_count} files; select one with #file_at=<index>")]
    NoFileSelected { file_count: usize },

    #[error("Cannot {operation} while access is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: AccessPhase,
    },

    #[error("Seek to {offset} beyond end of file ({file_length} bytes)")]
    SeekOutOfRange { offset: u64, file_length: u64 },

    #[error("Access has been stopped")]
    Stopped,

    #[error("Engine reported an error: {message}")]
    TorrentFailed { message: String },

    #[error("Failed to start alert dispatcher: {0}")]
    DispatcherSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Torrent(#[from] TorrentError),
}

impl From<StreamingError> for std::io::Error {
    fn from(error: StreamingError) -> Self {
        use std::io::ErrorKind;

        let kind = match &error {
            StreamingError::PieceTimeout { .. } | StreamingError::MetadataTimeout { .. } => {
                ErrorKind::TimedOut
            }
            StreamingError::SeekOutOfRange { .. }
            | StreamingError::InvalidPhase { .. }
            | StreamingError::NoFileSelected { .. } => ErrorKind::InvalidInput,
            StreamingError::Stopped => ErrorKind::BrokenPipe,
            _ => ErrorKind::Other,
        };
        std::io::Error::new(kind, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_kinds() {
        let timeout: std::io::Error = StreamingError::PieceTimeout {
            piece: PieceIndex::new(1),
            waited: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.kind(), std::io::ErrorKind::TimedOut);

        let seek: std::io::Error = StreamingError::SeekOutOfRange {
            offset: 10,
            file_length: 5,
        }
        .into();
        assert_eq!(seek.kind(), std::io::ErrorKind::InvalidInput);

        let failed: std::io::Error = StreamingError::BufferEmpty.into();
        assert_eq!(failed.kind(), std::io::ErrorKind::Other);
    }
}
