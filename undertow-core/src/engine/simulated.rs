//! In-process torrent engine serving pieces from memory.
//!
//! Behaves like a swarm that already holds the whole content: state changes
//! and piece reads are turned into alerts on an internal queue. Knobs allow
//! stalling metadata retrieval, holding reads for out-of-order delivery,
//! failing specific reads and going completely silent.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;

use super::{
    AddTorrentRequest, Alert, EngineError, PiecePriority, SessionIdentity, TorrentBackend,
    TorrentState,
};
use crate::torrent::{PieceIndex, TorrentCreator, TorrentError, TorrentMetadata};

/// Simulated engine holding one torrent's content.
pub struct SimulatedBackend {
    metadata: TorrentMetadata,
    content: Bytes,
    stall_metadata: bool,
    hold_reads: bool,
    silent: bool,
    failing_pieces: HashSet<PieceIndex>,
    state: Mutex<SimulationState>,
    alerts_ready: Condvar,
}

struct SimulationState {
    added: bool,
    removed: bool,
    metadata_known: bool,
    torrent_state: Option<TorrentState>,
    alerts: VecDeque<Alert>,
    held_reads: Vec<PieceIndex>,
    read_requests: Vec<PieceIndex>,
    priorities: HashMap<PieceIndex, PiecePriority>,
    sequential: bool,
    identity: Option<SessionIdentity>,
    poll_failures: u32,
    rng: Option<ChaCha8Rng>,
}

impl SimulatedBackend {
    /// Creates a backend serving `content` under the given metadata.
    ///
    /// # Errors
    ///
    /// - `EngineError::SessionFailed` - Content length does not match the metadata
    pub fn new(metadata: TorrentMetadata, content: impl Into<Bytes>) -> Result<Self, EngineError> {
        let content = content.into();
        if content.len() as u64 != metadata.total_length {
            return Err(EngineError::SessionFailed {
                reason: format!(
                    "content is {} bytes but metadata describes {}",
                    content.len(),
                    metadata.total_length
                ),
            });
        }

        Ok(Self {
            metadata,
            content,
            stall_metadata: false,
            hold_reads: false,
            silent: false,
            failing_pieces: HashSet::new(),
            state: Mutex::new(SimulationState {
                added: false,
                removed: false,
                metadata_known: false,
                torrent_state: None,
                alerts: VecDeque::new(),
                held_reads: Vec::new(),
                read_requests: Vec::new(),
                priorities: HashMap::new(),
                sequential: false,
                identity: None,
                poll_failures: 0,
                rng: None,
            }),
            alerts_ready: Condvar::new(),
        })
    }

    /// Builds single-file metadata for `content` and serves it.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Empty content or zero piece size
    pub fn from_content(
        name: &str,
        content: impl Into<Bytes>,
        piece_size: u32,
    ) -> Result<Self, TorrentError> {
        let content = content.into();
        let metadata =
            TorrentCreator::with_piece_size(piece_size).create_from_bytes(name, &content, vec![])?;
        Self::new(metadata, content).map_err(|e| TorrentError::InvalidTorrentFile {
            reason: e.to_string(),
        })
    }

    /// Never leaves the metadata download state.
    pub fn with_stalled_metadata(mut self) -> Self {
        self.stall_metadata = true;
        self
    }

    /// Holds read requests until they are delivered explicitly.
    pub fn with_held_reads(mut self) -> Self {
        self.hold_reads = true;
        self
    }

    /// Emits no alerts at all.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    /// Reads of this piece fail.
    pub fn with_failing_piece(mut self, piece: PieceIndex) -> Self {
        self.failing_pieces.insert(piece);
        self
    }

    /// Shuffles batch deliveries with a deterministic seed.
    pub fn with_seed(self, seed: u64) -> Self {
        self.state.lock().rng = Some(ChaCha8Rng::seed_from_u64(seed));
        self
    }

    /// Metadata of the served torrent.
    pub fn torrent_metadata(&self) -> &TorrentMetadata {
        &self.metadata
    }

    /// Read requests currently held back.
    pub fn held_reads(&self) -> Vec<PieceIndex> {
        self.state.lock().held_reads.clone()
    }

    /// Every read request received, in order.
    pub fn read_requests(&self) -> Vec<PieceIndex> {
        self.state.lock().read_requests.clone()
    }

    /// Last priority set for a piece.
    pub fn priority(&self, piece: PieceIndex) -> Option<PiecePriority> {
        self.state.lock().priorities.get(&piece).copied()
    }

    /// Whether sequential download was enabled.
    pub fn is_sequential(&self) -> bool {
        self.state.lock().sequential
    }

    /// Whether the torrent has been removed.
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Identity the torrent was added with.
    pub fn identity(&self) -> Option<SessionIdentity> {
        self.state.lock().identity.clone()
    }

    /// Delivers one held read. Returns false if it was not held.
    pub fn deliver(&self, piece: PieceIndex) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state.held_reads.iter().position(|p| *p == piece) else {
            return false;
        };
        state.held_reads.remove(position);
        let alert = self.read_alert(piece);
        state.alerts.push_back(alert);
        self.alerts_ready.notify_all();
        true
    }

    /// Delivers every held read, shuffled when a seed was configured.
    pub fn deliver_held(&self) -> usize {
        let mut state = self.state.lock();
        let mut pieces = std::mem::take(&mut state.held_reads);
        if let Some(rng) = state.rng.as_mut() {
            pieces.shuffle(rng);
        }
        let count = pieces.len();
        for piece in pieces {
            let alert = self.read_alert(piece);
            state.alerts.push_back(alert);
        }
        self.alerts_ready.notify_all();
        count
    }

    /// Queues an arbitrary alert.
    pub fn push_alert(&self, alert: Alert) {
        self.state.lock().alerts.push_back(alert);
        self.alerts_ready.notify_all();
    }

    /// Makes the next `count` polls fail.
    pub fn fail_next_polls(&self, count: u32) {
        self.state.lock().poll_failures = count;
    }

    fn read_alert(&self, piece: PieceIndex) -> Alert {
        if self.failing_pieces.contains(&piece) {
            return Alert::PieceReadFailed {
                piece,
                reason: "simulated read failure".to_string(),
            };
        }

        let piece_length = u64::from(self.metadata.piece_length);
        let start = u64::from(piece.as_u32()) * piece_length;
        let end = (start + piece_length).min(self.metadata.total_length);
        Alert::PieceRead {
            piece,
            data: self.content.slice(start as usize..end as usize),
        }
    }

    fn transition(&self, state: &mut SimulationState, next: TorrentState) {
        let previous = state.torrent_state.replace(next);
        if !self.silent {
            state.alerts.push_back(Alert::StateChanged {
                previous,
                current: next,
            });
        }
    }

    fn check_piece(&self, state: &SimulationState, piece: PieceIndex) -> Result<(), EngineError> {
        if !state.added || state.removed {
            return Err(EngineError::NoTorrent);
        }
        if piece.as_u32() >= self.metadata.piece_count() {
            return Err(EngineError::InvalidPiece { piece });
        }
        Ok(())
    }
}

impl TorrentBackend for SimulatedBackend {
    fn add_torrent(&self, request: &AddTorrentRequest) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if state.removed {
            return Err(EngineError::Shutdown);
        }
        if request.params.info_hash() != self.metadata.info_hash {
            return Err(EngineError::SessionFailed {
                reason: format!(
                    "swarm serves {} but {} was requested",
                    self.metadata.info_hash,
                    request.params.info_hash()
                ),
            });
        }

        state.added = true;
        state.identity = Some(request.identity.clone());
        state.metadata_known = request.params.has_metadata();

        self.transition(&mut state, TorrentState::CheckingResumeData);
        if !state.metadata_known {
            self.transition(&mut state, TorrentState::DownloadingMetadata);
            if self.stall_metadata {
                self.alerts_ready.notify_all();
                return Ok(());
            }
            state.metadata_known = true;
        }
        self.transition(&mut state, TorrentState::Downloading);
        self.alerts_ready.notify_all();
        Ok(())
    }

    fn metadata(&self) -> Option<TorrentMetadata> {
        let state = self.state.lock();
        state.metadata_known.then(|| self.metadata.clone())
    }

    fn set_sequential_download(&self, enabled: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.added || state.removed {
            return Err(EngineError::NoTorrent);
        }
        state.sequential = enabled;
        Ok(())
    }

    fn set_piece_priority(
        &self,
        piece: PieceIndex,
        priority: PiecePriority,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        self.check_piece(&state, piece)?;
        state.priorities.insert(piece, priority);
        Ok(())
    }

    fn read_piece(&self, piece: PieceIndex, _deadline: Duration) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        self.check_piece(&state, piece)?;
        state.read_requests.push(piece);

        if self.silent {
            return Ok(());
        }
        if self.hold_reads {
            if !state.held_reads.contains(&piece) {
                state.held_reads.push(piece);
            }
            return Ok(());
        }

        let alert = self.read_alert(piece);
        state.alerts.push_back(alert);
        self.alerts_ready.notify_all();
        Ok(())
    }

    fn poll_alerts(&self, timeout: Duration) -> Result<Vec<Alert>, EngineError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        if state.poll_failures > 0 {
            state.poll_failures -= 1;
            return Err(EngineError::AlertPoll {
                reason: "simulated alert queue failure".to_string(),
            });
        }

        while state.alerts.is_empty() {
            if self.alerts_ready.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }

        Ok(state.alerts.drain(..).collect())
    }

    fn remove_torrent(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock();
        if !state.added || state.removed {
            return Err(EngineError::NoTorrent);
        }
        state.removed = true;
        state.alerts.clear();
        state.held_reads.clear();
        self.alerts_ready.notify_all();
        Ok(())
    }
}
