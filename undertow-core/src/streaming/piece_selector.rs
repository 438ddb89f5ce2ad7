//! Playback-window piece selection.
//!
//! Keeps the pieces covering the next `forward_window` pieces of the
//! selected file queued in the buffer, at top engine priority and with a
//! read outstanding. The piece needed now always gets the shortest read
//! deadline. Pieces that leave the window are evicted from the buffer and
//! demoted in the engine.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use super::{Piece, PieceBuffer, StreamingError};
use crate::engine::{PiecePriority, TorrentBackend};
use crate::torrent::{PieceIndex, PieceSpan, TorrentMetadata};

/// Chooses and requests the pieces ahead of the playback position.
pub struct PieceSelector {
    backend: Arc<dyn TorrentBackend>,
    buffer: Arc<PieceBuffer>,
    metadata: Arc<TorrentMetadata>,
    file_index: usize,
    forward_window: usize,
    demotion: PiecePriority,
    deadline_step: Duration,
    raised: BTreeSet<PieceIndex>,
    initialized: bool,
}

impl PieceSelector {
    pub fn new(
        backend: Arc<dyn TorrentBackend>,
        buffer: Arc<PieceBuffer>,
        metadata: Arc<TorrentMetadata>,
        file_index: usize,
    ) -> Self {
        Self {
            backend,
            buffer,
            metadata,
            file_index,
            forward_window: 4,
            demotion: PiecePriority::Skip,
            deadline_step: Duration::from_millis(500),
            raised: BTreeSet::new(),
            initialized: false,
        }
    }

    /// Number of pieces kept queued ahead, at least one.
    pub fn with_forward_window(mut self, pieces: usize) -> Self {
        self.forward_window = pieces.max(1);
        self
    }

    /// Priority given to pieces leaving the window.
    pub fn with_demotion(mut self, priority: PiecePriority) -> Self {
        self.demotion = priority;
        self
    }

    /// Read deadline added per window slot.
    pub fn with_deadline_step(mut self, step: Duration) -> Self {
        self.deadline_step = step;
        self
    }

    /// Pieces currently held at top priority.
    pub fn raised(&self) -> impl Iterator<Item = PieceIndex> + '_ {
        self.raised.iter().copied()
    }

    /// Selects the window starting at `byte_offset` within the file.
    ///
    /// Returns the window spans, front first; empty at end of file.
    ///
    /// # Errors
    ///
    /// - `StreamingError::Torrent` - Offset beyond the end of the file
    /// - `StreamingError::Engine` - Engine rejected a priority change or read request
    pub fn select_pieces(&mut self, byte_offset: u64) -> Result<Vec<PieceSpan>, StreamingError> {
        let spans = self
            .metadata
            .map_file(self.file_index, byte_offset, self.forward_window)?;

        let window = match (spans.first(), spans.last()) {
            (Some(first), Some(last)) => first.piece..last.piece.next(),
            _ => PieceIndex::new(0)..PieceIndex::new(0),
        };

        let evicted = self.buffer.retain_window(window.clone());
        if !evicted.is_empty() {
            tracing::debug!("Evicted pieces {evicted:?} outside window {window:?}");
        }

        for (slot, span) in spans.iter().enumerate() {
            if self.buffer.contains(span.piece) {
                if self.buffer.reanchor(*span) {
                    tracing::debug!(
                        "Re-anchored piece {} at offset {} length {}",
                        span.piece,
                        span.offset,
                        span.length
                    );
                }
            } else {
                self.request(*span, self.deadline_step * slot as u32)?;
            }

            if self.raised.insert(span.piece) {
                self.backend
                    .set_piece_priority(span.piece, PiecePriority::Top)?;
            }
        }

        self.demote_outside(&window)?;
        Ok(spans)
    }

    fn request(&self, span: PieceSpan, deadline: Duration) -> Result<(), StreamingError> {
        let mut piece = Piece::new(span);
        piece.requested = true;
        if !self.buffer.enqueue(piece) {
            return Err(StreamingError::Stopped);
        }

        tracing::debug!("Requesting piece {} (deadline {deadline:?})", span.piece);
        if let Err(e) = self.backend.read_piece(span.piece, deadline) {
            self.buffer.remove(span.piece);
            return Err(e.into());
        }
        Ok(())
    }

    fn demote_outside(
        &mut self,
        window: &std::ops::Range<PieceIndex>,
    ) -> Result<(), StreamingError> {
        if !self.initialized {
            self.initialized = true;
            for index in 0..self.metadata.piece_count() {
                let piece = PieceIndex::new(index);
                if !window.contains(&piece) {
                    self.backend.set_piece_priority(piece, self.demotion)?;
                }
            }
            return Ok(());
        }

        let leaving: Vec<PieceIndex> = self
            .raised
            .iter()
            .copied()
            .filter(|piece| !window.contains(piece))
            .collect();
        for piece in leaving {
            self.backend.set_piece_priority(piece, self.demotion)?;
            self.raised.remove(&piece);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{
        AddTorrentRequest, ClientFingerprint, SessionIdentity, SimulatedBackend,
    };
    use crate::torrent::{AddTorrentParams, TorrentSource};

    const PIECE: u32 = 1024;

    fn setup(pieces: u32) -> (Arc<SimulatedBackend>, Arc<PieceBuffer>, PieceSelector) {
        let content = vec![0u8; (PIECE * pieces) as usize];
        let backend = Arc::new(
            SimulatedBackend::from_content("video.mkv", content, PIECE)
                .unwrap()
                .with_held_reads(),
        );
        let metadata = backend.torrent_metadata().clone();
        backend
            .add_torrent(&AddTorrentRequest {
                params: AddTorrentParams {
                    uri: "torrent://video".to_string(),
                    source: TorrentSource::Metadata(Box::new(metadata.clone())),
                    file_index: None,
                },
                save_path: std::env::temp_dir(),
                identity: SessionIdentity::generate(&ClientFingerprint::default()),
            })
            .unwrap();

        let buffer = Arc::new(PieceBuffer::new());
        let selector = PieceSelector::new(
            backend.clone(),
            Arc::clone(&buffer),
            Arc::new(metadata),
            0,
        );
        (backend, buffer, selector)
    }

    fn ids(range: std::ops::Range<u32>) -> Vec<PieceIndex> {
        range.map(PieceIndex::new).collect()
    }

    #[test]
    fn test_initial_selection_raises_window_and_demotes_rest() {
        let (backend, buffer, mut selector) = setup(10);

        let spans = selector.select_pieces(0).unwrap();

        assert_eq!(spans.len(), 4);
        assert_eq!(buffer.queued(), ids(0..4));
        assert_eq!(backend.read_requests(), ids(0..4));
        for piece in ids(0..4) {
            assert_eq!(backend.priority(piece), Some(PiecePriority::Top));
        }
        for piece in ids(4..10) {
            assert_eq!(backend.priority(piece), Some(PiecePriority::Skip));
        }
    }

    #[test]
    fn test_repeated_selection_does_not_duplicate() {
        let (backend, buffer, mut selector) = setup(10);

        selector.select_pieces(0).unwrap();
        selector.select_pieces(100).unwrap();
        selector.select_pieces(100).unwrap();

        assert_eq!(buffer.len(), 4);
        assert_eq!(backend.read_requests().len(), 4);
    }

    #[test]
    fn test_advancing_requests_only_the_new_piece() {
        let (backend, buffer, mut selector) = setup(10);
        selector.select_pieces(0).unwrap();

        selector.select_pieces(u64::from(PIECE)).unwrap();

        assert_eq!(buffer.queued(), ids(1..5));
        assert_eq!(backend.read_requests().last(), Some(&PieceIndex::new(4)));
        assert_eq!(backend.priority(PieceIndex::new(0)), Some(PiecePriority::Skip));
        assert_eq!(backend.priority(PieceIndex::new(4)), Some(PiecePriority::Top));
    }

    #[test]
    fn test_seek_reanchors_front_of_queue() {
        let (backend, buffer, mut selector) = setup(10);
        selector.select_pieces(0).unwrap();

        let spans = selector.select_pieces(7 * u64::from(PIECE) + 10).unwrap();

        assert_eq!(spans[0].piece, PieceIndex::new(7));
        assert_eq!(spans[0].offset, 10);
        assert_eq!(buffer.queued(), ids(7..10));
        for piece in ids(7..10) {
            assert_eq!(backend.priority(piece), Some(PiecePriority::Top));
        }
        for piece in ids(0..4) {
            assert_eq!(backend.priority(piece), Some(PiecePriority::Skip));
        }
        assert_eq!(selector.raised().collect::<Vec<_>>(), ids(7..10));
    }

    #[test]
    fn test_custom_window_and_demotion() {
        let (backend, buffer, selector) = setup(10);
        let mut selector = selector
            .with_forward_window(2)
            .with_demotion(PiecePriority::Low);

        selector.select_pieces(0).unwrap();

        assert_eq!(buffer.queued(), ids(0..2));
        assert_eq!(backend.priority(PieceIndex::new(5)), Some(PiecePriority::Low));
    }

    #[test]
    fn test_end_of_file_clears_the_window() {
        let (_backend, buffer, mut selector) = setup(3);
        selector.select_pieces(0).unwrap();

        let spans = selector.select_pieces(3 * u64::from(PIECE)).unwrap();

        assert!(spans.is_empty());
        assert!(buffer.is_empty());
        assert_eq!(selector.raised().count(), 0);
    }

    #[test]
    fn test_offset_past_end_is_an_error() {
        let (_backend, _buffer, mut selector) = setup(3);
        assert!(matches!(
            selector.select_pieces(3 * u64::from(PIECE) + 1),
            Err(StreamingError::Torrent(_))
        ));
    }
}
