//! Undertow Core - seekable byte streams out of a BitTorrent swarm
//!
//! Turns a piece-based, availability-driven torrent download into an
//! ordered, blocking byte stream for sequential playback. The torrent
//! engine itself sits behind the `TorrentBackend` trait; this crate owns
//! URI parsing, piece selection around the playback position, the alert
//! dispatcher and the read/seek surface.

pub mod config;
pub mod engine;
pub mod streaming;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::UndertowConfig;
pub use engine::{EngineError, SimulatedBackend, TorrentBackend};
pub use streaming::{StreamingError, TorrentAccess, TorrentStream};
pub use torrent::{TorrentError, TorrentMetadata};

/// Errors that can bubble up from any Undertow subsystem.
#[derive(Debug, thiserror::Error)]
pub enum UndertowError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Streaming error: {0}")]
    Streaming(#[from] StreamingError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UndertowError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            UndertowError::Torrent(e) | UndertowError::Streaming(StreamingError::Torrent(e)) => {
                match e {
                    TorrentError::InvalidTorrentFile { reason } => {
                        format!("Invalid torrent file: {reason}")
                    }
                    TorrentError::InvalidUri { uri, .. } => format!("Cannot open {uri}"),
                    TorrentError::FileIndexOutOfRange { index, file_count } => {
                        format!("No file {index}; the torrent has {file_count} files")
                    }
                    TorrentError::Io(_) => "Could not read the torrent file".to_string(),
                    _ => "Invalid torrent reference".to_string(),
                }
            }
            UndertowError::Streaming(e) => match e {
                StreamingError::MetadataTimeout { .. } => {
                    "No peer provided the torrent metadata in time".to_string()
                }
                StreamingError::PieceTimeout { .. } => {
                    "The swarm is too slow to keep up with playback".to_string()
                }
                StreamingError::NoFileSelected { file_count } => {
                    format!("The torrent has {file_count} files; choose one")
                }
                _ => "Streaming error occurred".to_string(),
            },
            UndertowError::Engine(_) => "Torrent engine error occurred".to_string(),
            UndertowError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            UndertowError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            UndertowError::Configuration { .. }
                | UndertowError::Torrent(_)
                | UndertowError::Streaming(
                    StreamingError::Torrent(_)
                        | StreamingError::NoFileSelected { .. }
                        | StreamingError::SeekOutOfRange { .. }
                )
        )
    }
}

pub type Result<T> = std::result::Result<T, UndertowError>;
