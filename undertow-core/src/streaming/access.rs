//! Torrent access state machine.
//!
//! Drives one torrent from URI to ordered file bytes:
//! `retrieve_metadata` adds the torrent and waits for its metadata,
//! `start_download` picks the file and primes the playback window, and
//! `read_next_piece` / `seek` move through the file. Without a selected
//! file the access stays browsable through `files` and `file_uri`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use super::{
    EventDispatcher, Piece, PieceBuffer, PieceSelector, StreamingError, SwarmState,
    SwarmStateTracker,
};
use crate::config::AccessConfig;
use crate::engine::{AddTorrentRequest, SessionIdentity, TorrentBackend};
use crate::torrent::{AddTorrentParams, TorrentMetadata, parse_access_uri};

/// Lifecycle phase of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPhase {
    Uninitialized,
    MetadataReady,
    Failed,
    Active,
    Stopped,
}

impl fmt::Display for AccessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessPhase::Uninitialized => "uninitialized",
            AccessPhase::MetadataReady => "waiting for a file selection",
            AccessPhase::Failed => "failed",
            AccessPhase::Active => "streaming",
            AccessPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Result of reading the next piece of the selected file.
#[derive(Debug, Clone, PartialEq)]
pub enum NextPiece {
    /// Piece whose `data` holds exactly the bytes at the read position
    Data(Piece),
    Eof,
}

/// One file of the torrent, as offered for browsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub index: usize,
    pub path: String,
    pub length: u64,
}

/// What the host player may do with this access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCapabilities {
    pub can_seek: bool,
    /// Seeks re-request pieces from the swarm, so they are never instant
    pub can_fast_seek: bool,
    pub can_pause: bool,
    pub can_control_pace: bool,
    /// Caching delay the player should apply before presenting data
    pub pts_delay: Duration,
}

/// Streaming access to a single torrent.
pub struct TorrentAccess {
    params: AddTorrentParams,
    config: AccessConfig,
    backend: Arc<dyn TorrentBackend>,
    identity: SessionIdentity,
    buffer: Arc<PieceBuffer>,
    tracker: Arc<SwarmStateTracker>,
    dispatcher: Option<EventDispatcher>,
    metadata: Option<Arc<TorrentMetadata>>,
    selector: Option<PieceSelector>,
    file_index: Option<usize>,
    file_length: u64,
    position: u64,
    torrent_added: bool,
    phase: AccessPhase,
}

impl TorrentAccess {
    /// Creates an access with a fresh session identity. Nothing is started.
    pub fn new(
        params: AddTorrentParams,
        backend: Arc<dyn TorrentBackend>,
        config: AccessConfig,
    ) -> Self {
        let identity = SessionIdentity::generate(&config.fingerprint);
        Self {
            params,
            config,
            backend,
            identity,
            buffer: Arc::new(PieceBuffer::new()),
            tracker: Arc::new(SwarmStateTracker::new()),
            dispatcher: None,
            metadata: None,
            selector: None,
            file_index: None,
            file_length: 0,
            position: 0,
            torrent_added: false,
            phase: AccessPhase::Uninitialized,
        }
    }

    /// Parses `uri`, retrieves metadata and, when a file is selected by the
    /// URI or the configuration, starts streaming it.
    ///
    /// Without a selection the access is left browsable.
    ///
    /// # Errors
    ///
    /// - `StreamingError::Torrent` - Malformed URI, unreadable `.torrent` or bad file index
    /// - `StreamingError::MetadataTimeout` - Swarm did not deliver metadata in time
    /// - `StreamingError::Engine` - Engine refused the torrent
    pub fn open(
        uri: &str,
        backend: Arc<dyn TorrentBackend>,
        config: AccessConfig,
    ) -> Result<Self, StreamingError> {
        let params = parse_access_uri(uri)?;
        let file_index = params.file_index.or(config.file_index);

        let mut access = Self::new(params, backend, config);
        access.retrieve_metadata()?;
        if let Some(index) = file_index {
            access.start_download(index)?;
        }
        Ok(access)
    }

    /// Adds the torrent to the engine and waits for its metadata.
    ///
    /// Parameters parsed from a `.torrent` file already carry metadata and
    /// skip the wait. On failure the session is torn down and the access
    /// is left `Failed`.
    ///
    /// # Errors
    ///
    /// - `StreamingError::MetadataTimeout` - No metadata state before `metadata_timeout`
    /// - `StreamingError::TorrentFailed` - Engine reported an error while fetching metadata
    /// - `StreamingError::MetadataUnavailable` - Engine claims metadata but returns none
    /// - `StreamingError::Engine` - Engine refused the torrent
    /// - `StreamingError::InvalidPhase` - Metadata was already retrieved
    pub fn retrieve_metadata(&mut self) -> Result<(), StreamingError> {
        self.expect_phase(AccessPhase::Uninitialized, "retrieve metadata")?;

        match self.load_metadata() {
            Ok(metadata) => {
                tracing::info!(
                    "Metadata ready for {}: {} pieces of {} bytes, {} files",
                    metadata.name,
                    metadata.piece_count(),
                    metadata.piece_length,
                    metadata.files.len()
                );
                self.metadata = Some(Arc::new(metadata));
                self.phase = AccessPhase::MetadataReady;
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to retrieve metadata: {e}");
                self.teardown();
                self.phase = AccessPhase::Failed;
                Err(e)
            }
        }
    }

    fn load_metadata(&mut self) -> Result<TorrentMetadata, StreamingError> {
        let request = AddTorrentRequest {
            params: self.params.clone(),
            save_path: self.config.download_dir.clone(),
            identity: self.identity.clone(),
        };
        tracing::info!(
            "Adding torrent {} to {} (session {})",
            self.params.info_hash(),
            request.save_path.display(),
            self.identity
        );

        self.backend.add_torrent(&request)?;
        self.torrent_added = true;
        self.dispatcher = Some(EventDispatcher::spawn(
            Arc::clone(&self.backend),
            Arc::clone(&self.buffer),
            Arc::clone(&self.tracker),
            self.config.alert_poll_interval,
        )?);

        if let Some(metadata) = self.params.metadata() {
            return Ok(metadata.clone());
        }

        let started = Instant::now();
        let ready = self.tracker.wait_until(
            |state| state.has_metadata() || state.last_error.is_some(),
            started + self.config.metadata_timeout,
        );
        if !ready {
            return Err(StreamingError::MetadataTimeout {
                waited: started.elapsed(),
            });
        }

        let state = self.tracker.observe_state();
        if !state.has_metadata()
            && let Some(message) = state.last_error
        {
            return Err(StreamingError::TorrentFailed { message });
        }
        self.backend
            .metadata()
            .ok_or(StreamingError::MetadataUnavailable)
    }

    /// Selects the file to stream and primes the playback window.
    ///
    /// # Errors
    ///
    /// - `StreamingError::Torrent` - File index out of range
    /// - `StreamingError::Engine` - Engine rejected sequential mode or a piece request
    /// - `StreamingError::InvalidPhase` - Metadata not retrieved or download already started
    pub fn start_download(&mut self, file_index: usize) -> Result<(), StreamingError> {
        self.expect_phase(AccessPhase::MetadataReady, "start download")?;
        let metadata = Arc::clone(
            self.metadata
                .as_ref()
                .ok_or(StreamingError::MetadataUnavailable)?,
        );

        let file = metadata.file(file_index)?;
        tracing::info!(
            "Streaming file {file_index}: {} ({} bytes)",
            file.display_path(),
            file.length
        );
        let file_length = file.length;

        self.backend.set_sequential_download(true)?;

        let mut selector = PieceSelector::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.buffer),
            metadata,
            file_index,
        )
        .with_forward_window(self.config.forward_window)
        .with_demotion(self.config.demotion_priority)
        .with_deadline_step(self.config.read_deadline_step);
        selector.select_pieces(0)?;

        self.selector = Some(selector);
        self.file_index = Some(file_index);
        self.file_length = file_length;
        self.position = 0;
        self.phase = AccessPhase::Active;
        Ok(())
    }

    /// Blocks until the piece at the read position has arrived and returns
    /// its bytes, advancing the position past them.
    ///
    /// # Errors
    ///
    /// - `StreamingError::PieceTimeout` - Piece missing after `piece_timeout`
    /// - `StreamingError::PieceReadFailed` - Engine could not read the piece
    /// - `StreamingError::Stopped` - Access stopped
    /// - `StreamingError::InvalidPhase` - Download not started
    pub fn read_next_piece(&mut self) -> Result<NextPiece, StreamingError> {
        self.expect_phase(AccessPhase::Active, "read")?;
        if self.position >= self.file_length {
            return Ok(NextPiece::Eof);
        }

        let selector = self.selector.as_mut().ok_or(StreamingError::InvalidPhase {
            operation: "read",
            phase: self.phase,
        })?;
        selector.select_pieces(self.position)?;

        let mut piece = self
            .buffer
            .fetch_next(Instant::now() + self.config.piece_timeout)?;
        piece.data = Some(piece.window()?);
        self.position += u64::from(piece.length);
        tracing::trace!(
            "Read piece {} window {}+{}, position {}",
            piece.id,
            piece.offset,
            piece.length,
            self.position
        );
        Ok(NextPiece::Data(piece))
    }

    /// Moves the read position and reselects the playback window.
    ///
    /// Queued pieces outside the new window are evicted; nothing already
    /// in flight is waited for.
    ///
    /// # Errors
    ///
    /// - `StreamingError::SeekOutOfRange` - Offset beyond the end of the file
    /// - `StreamingError::Engine` - Engine rejected a piece request
    /// - `StreamingError::InvalidPhase` - Download not started
    pub fn seek(&mut self, offset: u64) -> Result<(), StreamingError> {
        self.expect_phase(AccessPhase::Active, "seek")?;
        if offset > self.file_length {
            return Err(StreamingError::SeekOutOfRange {
                offset,
                file_length: self.file_length,
            });
        }

        tracing::debug!("Seeking from {} to {offset}", self.position);
        self.position = offset;
        if let Some(selector) = self.selector.as_mut() {
            selector.select_pieces(offset)?;
        }
        Ok(())
    }

    /// Stops the access: wakes blocked waits, joins the dispatcher and
    /// removes the torrent. Idempotent; teardown errors are only logged.
    pub fn stop(&mut self) {
        if self.phase == AccessPhase::Stopped {
            return;
        }
        tracing::info!("Stopping torrent access (session {})", self.identity.session_id);
        self.teardown();
        self.phase = AccessPhase::Stopped;
    }

    fn teardown(&mut self) {
        self.tracker.mark_stopped();
        self.buffer.close();
        if let Some(mut dispatcher) = self.dispatcher.take() {
            dispatcher.stop();
        }
        if std::mem::take(&mut self.torrent_added)
            && let Err(e) = self.backend.remove_torrent()
        {
            tracing::debug!("Ignoring error while removing torrent: {e}");
        }
    }

    /// Files of the torrent with their indexes.
    ///
    /// # Errors
    ///
    /// - `StreamingError::MetadataUnavailable` - Metadata not retrieved yet
    pub fn files(&self) -> Result<Vec<FileEntry>, StreamingError> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or(StreamingError::MetadataUnavailable)?;
        Ok(metadata
            .files
            .iter()
            .enumerate()
            .map(|(index, file)| FileEntry {
                index,
                path: file.display_path(),
                length: file.length,
            })
            .collect())
    }

    /// URI that opens this torrent streaming the file at `index`.
    ///
    /// # Errors
    ///
    /// - `StreamingError::MetadataUnavailable` - Metadata not retrieved yet
    /// - `StreamingError::Torrent` - File index out of range
    pub fn file_uri(&self, index: usize) -> Result<String, StreamingError> {
        let metadata = self
            .metadata
            .as_ref()
            .ok_or(StreamingError::MetadataUnavailable)?;
        metadata.file(index)?;
        Ok(self.params.file_uri(index))
    }

    pub fn capabilities(&self) -> AccessCapabilities {
        AccessCapabilities {
            can_seek: true,
            can_fast_seek: false,
            can_pause: true,
            can_control_pace: true,
            pts_delay: self.config.pts_delay,
        }
    }

    pub fn phase(&self) -> AccessPhase {
        self.phase
    }

    /// Byte offset of the next read within the selected file.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Length of the selected file; zero before `start_download`.
    pub fn file_length(&self) -> u64 {
        self.file_length
    }

    pub fn file_index(&self) -> Option<usize> {
        self.file_index
    }

    pub fn metadata(&self) -> Option<&TorrentMetadata> {
        self.metadata.as_deref()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn swarm_state(&self) -> SwarmState {
        self.tracker.observe_state()
    }

    /// Whether the alert dispatcher thread is alive.
    pub fn is_dispatching(&self) -> bool {
        self.dispatcher
            .as_ref()
            .is_some_and(EventDispatcher::is_running)
    }

    fn expect_phase(
        &self,
        expected: AccessPhase,
        operation: &'static str,
    ) -> Result<(), StreamingError> {
        match self.phase {
            phase if phase == expected => Ok(()),
            AccessPhase::Stopped => Err(StreamingError::Stopped),
            phase => Err(StreamingError::InvalidPhase { operation, phase }),
        }
    }
}

impl Drop for TorrentAccess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UndertowConfig;
    use crate::engine::SimulatedBackend;
    use crate::torrent::TorrentSource;

    fn backend() -> Arc<SimulatedBackend> {
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        Arc::new(SimulatedBackend::from_content("song.flac", content, 4096).unwrap())
    }

    fn params(backend: &SimulatedBackend) -> AddTorrentParams {
        AddTorrentParams {
            uri: "torrent://song".to_string(),
            source: TorrentSource::Metadata(Box::new(backend.torrent_metadata().clone())),
            file_index: None,
        }
    }

    #[test]
    fn test_operations_require_the_right_phase() {
        let backend = backend();
        let mut access = TorrentAccess::new(
            params(&backend),
            backend.clone(),
            UndertowConfig::for_testing().access,
        );

        assert!(matches!(
            access.start_download(0),
            Err(StreamingError::InvalidPhase {
                phase: AccessPhase::Uninitialized,
                ..
            })
        ));
        assert!(matches!(
            access.read_next_piece(),
            Err(StreamingError::InvalidPhase { .. })
        ));

        access.retrieve_metadata().unwrap();
        assert!(matches!(
            access.retrieve_metadata(),
            Err(StreamingError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn test_full_read_and_eof() {
        let backend = backend();
        let mut access = TorrentAccess::new(
            params(&backend),
            backend.clone(),
            UndertowConfig::for_testing().access,
        );
        access.retrieve_metadata().unwrap();
        access.start_download(0).unwrap();
        assert!(backend.is_sequential());

        let mut lengths = Vec::new();
        while let NextPiece::Data(piece) = access.read_next_piece().unwrap() {
            lengths.push(piece.data.map_or(0, |d| d.len()));
        }
        assert_eq!(lengths, vec![4096, 4096, 1808]);
        assert_eq!(access.position(), 10_000);
    }

    #[test]
    fn test_mid_piece_seek_returns_window_only() {
        let backend = backend();
        let mut access = TorrentAccess::new(
            params(&backend),
            backend.clone(),
            UndertowConfig::for_testing().access,
        );
        access.retrieve_metadata().unwrap();
        access.start_download(0).unwrap();

        access.seek(5000).unwrap();
        let NextPiece::Data(piece) = access.read_next_piece().unwrap() else {
            panic!("expected data after seek");
        };

        assert_eq!(piece.offset, 904);
        let data = piece.data.unwrap();
        assert_eq!(data.len(), 4096 - 904);
        assert_eq!(data[0], (5000u32 % 251) as u8);
        assert!(matches!(
            access.seek(10_001),
            Err(StreamingError::SeekOutOfRange { .. })
        ));
    }

    #[test]
    fn test_browsing_files_and_capabilities() {
        let backend = backend();
        let mut access = TorrentAccess::new(
            params(&backend),
            backend.clone(),
            UndertowConfig::for_testing().access,
        );
        assert!(access.files().is_err());
        access.retrieve_metadata().unwrap();

        let files = access.files().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "song.flac");
        assert_eq!(access.file_uri(0).unwrap(), "torrent://song#file_at=0");
        assert!(access.file_uri(1).is_err());

        let capabilities = access.capabilities();
        assert!(capabilities.can_seek);
        assert!(!capabilities.can_fast_seek);
    }

    #[test]
    fn test_stop_is_idempotent_and_removes_torrent() {
        let backend = backend();
        let mut access = TorrentAccess::new(
            params(&backend),
            backend.clone(),
            UndertowConfig::for_testing().access,
        );
        access.retrieve_metadata().unwrap();
        assert!(access.is_dispatching());

        access.stop();
        access.stop();

        assert_eq!(access.phase(), AccessPhase::Stopped);
        assert!(!access.is_dispatching());
        assert!(backend.is_removed());
        assert!(matches!(
            access.read_next_piece(),
            Err(StreamingError::Stopped)
        ));
    }
}
