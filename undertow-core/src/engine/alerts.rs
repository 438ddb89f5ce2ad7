//! Alerts emitted by the torrent engine and the torrent lifecycle states
//! they report.

use std::fmt;

use bytes::Bytes;

use crate::torrent::PieceIndex;

/// Lifecycle state of a torrent as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TorrentState {
    QueuedForChecking,
    CheckingFiles,
    DownloadingMetadata,
    Downloading,
    Finished,
    Seeding,
    Allocating,
    CheckingResumeData,
}

impl TorrentState {
    /// Whether the engine holds the torrent's metadata in this state.
    ///
    /// Resume-data checks and queueing happen before a magnet link's
    /// metadata is known, so only states that operate on the piece layout
    /// count.
    pub fn has_metadata(self) -> bool {
        matches!(
            self,
            TorrentState::CheckingFiles
                | TorrentState::Allocating
                | TorrentState::Downloading
                | TorrentState::Finished
                | TorrentState::Seeding
        )
    }

    /// Human readable label used in logs.
    pub fn label(self) -> &'static str {
        match self {
            TorrentState::QueuedForChecking => "Queued for checking",
            TorrentState::CheckingFiles => "Checking files",
            TorrentState::DownloadingMetadata => "Downloading metadata",
            TorrentState::Downloading => "Downloading",
            TorrentState::Finished => "Finished",
            TorrentState::Seeding => "Seeding",
            TorrentState::Allocating => "Allocating space",
            TorrentState::CheckingResumeData => "Resuming",
        }
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Asynchronous event popped from the engine's alert queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    /// Torrent moved to a new lifecycle state
    StateChanged {
        previous: Option<TorrentState>,
        current: TorrentState,
    },
    /// Full payload of a piece requested with `read_piece`
    PieceRead { piece: PieceIndex, data: Bytes },
    /// A requested piece could not be read back from storage
    PieceReadFailed { piece: PieceIndex, reason: String },
    /// A piece finished downloading and passed its hash check
    PieceFinished { piece: PieceIndex },
    /// Torrent-level failure reported by the engine
    TorrentError { message: String },
    /// Any alert kind the access does not act on
    Other { kind: String },
}

impl Alert {
    /// Short name of the alert kind for logging.
    pub fn kind(&self) -> &str {
        match self {
            Alert::StateChanged { .. } => "state_changed",
            Alert::PieceRead { .. } => "read_piece",
            Alert::PieceReadFailed { .. } => "read_piece_failed",
            Alert::PieceFinished { .. } => "piece_finished",
            Alert::TorrentError { .. } => "torrent_error",
            Alert::Other { kind } => kind,
        }
    }
}
