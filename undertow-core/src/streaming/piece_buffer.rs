//! Ordered queue of pieces awaiting or holding engine data.
//!
//! Filled by the selector on the caller's thread, completed by the alert
//! dispatcher, and drained front-first by the reader. Out-of-order arrivals
//! wait in place until every piece ahead of them has been consumed.

use std::collections::VecDeque;
use std::ops::Range;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

use super::StreamingError;
use crate::torrent::{PieceIndex, PieceSpan};

/// A piece of the playback window.
///
/// While queued, `data` holds the full piece payload once it has arrived.
/// Pieces returned by `TorrentAccess::read_next_piece` hold only the
/// `offset..offset + length` window.
#[derive(Debug, Clone, PartialEq)]
pub struct Piece {
    pub id: PieceIndex,
    /// Start of the needed window inside the piece
    pub offset: u32,
    /// Length of the needed window
    pub length: u32,
    /// A read is outstanding in the engine
    pub requested: bool,
    pub data: Option<Bytes>,
    failure: Option<String>,
}

impl Piece {
    /// Creates a descriptor for the given window with no read issued yet.
    pub fn new(span: PieceSpan) -> Self {
        Self {
            id: span.piece,
            offset: span.offset,
            length: span.length,
            requested: false,
            data: None,
            failure: None,
        }
    }

    /// Whether the engine answered, with data or with a failure.
    pub fn is_complete(&self) -> bool {
        self.data.is_some() || self.failure.is_some()
    }

    /// Window bytes of the piece payload.
    ///
    /// # Errors
    ///
    /// - `StreamingError::PieceTooSmall` - Payload missing or shorter than the window
    pub fn window(&self) -> Result<Bytes, StreamingError> {
        let start = self.offset as usize;
        let end = start + self.length as usize;
        match &self.data {
            Some(data) if data.len() >= end => Ok(data.slice(start..end)),
            other => Err(StreamingError::PieceTooSmall {
                piece: self.id,
                needed: end as u64,
                actual: other.as_ref().map_or(0, Bytes::len),
            }),
        }
    }
}

struct BufferInner {
    pieces: VecDeque<Piece>,
    closed: bool,
}

/// Piece queue guarded by a mutex and a condition variable.
///
/// Entries are kept in ascending id order and each id appears at most once.
pub struct PieceBuffer {
    inner: Mutex<BufferInner>,
    arrived: Condvar,
}

impl Default for PieceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PieceBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                pieces: VecDeque::new(),
                closed: false,
            }),
            arrived: Condvar::new(),
        }
    }

    /// Inserts the piece unless an entry with the same id is present or the
    /// buffer is closed. Returns whether it was inserted.
    pub fn enqueue(&self, piece: Piece) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }

        match inner.pieces.binary_search_by_key(&piece.id, |p| p.id) {
            Ok(_) => false,
            Err(position) => {
                inner.pieces.insert(position, piece);
                true
            }
        }
    }

    /// Blocks until the front piece is complete, then pops it.
    ///
    /// Only the front entry is ever returned, so pieces leave the buffer in
    /// ascending id order no matter in which order they arrived.
    ///
    /// # Errors
    ///
    /// - `StreamingError::PieceTimeout` - Front piece still missing at `deadline`
    /// - `StreamingError::PieceReadFailed` - Engine reported a read failure for the front piece
    /// - `StreamingError::BufferEmpty` - Nothing queued
    /// - `StreamingError::Stopped` - Buffer closed
    pub fn fetch_next(&self, deadline: Instant) -> Result<Piece, StreamingError> {
        let started = Instant::now();
        let mut inner = self.inner.lock();

        loop {
            if inner.closed {
                return Err(StreamingError::Stopped);
            }

            let front = inner.pieces.front().ok_or(StreamingError::BufferEmpty)?;
            if front.is_complete() {
                break;
            }

            let piece = front.id;
            if self.arrived.wait_until(&mut inner, deadline).timed_out()
                && !inner.pieces.front().is_some_and(Piece::is_complete)
                && !inner.closed
            {
                return Err(StreamingError::PieceTimeout {
                    piece,
                    waited: started.elapsed(),
                });
            }
        }

        let mut piece = inner
            .pieces
            .pop_front()
            .ok_or(StreamingError::BufferEmpty)?;
        match piece.failure.take() {
            Some(reason) => Err(StreamingError::PieceReadFailed {
                piece: piece.id,
                reason,
            }),
            None => Ok(piece),
        }
    }

    /// Attaches the engine payload to the matching entry and wakes fetchers.
    ///
    /// Returns false if no entry with this id is queued.
    pub fn mark_arrived(&self, id: PieceIndex, data: Bytes) -> bool {
        self.complete(id, |piece| {
            piece.data = Some(data);
            piece.failure = None;
        })
    }

    /// Records a read failure on the matching entry and wakes fetchers.
    pub fn mark_failed(&self, id: PieceIndex, reason: String) -> bool {
        self.complete(id, |piece| {
            piece.data = None;
            piece.failure = Some(reason);
        })
    }

    fn complete(&self, id: PieceIndex, update: impl FnOnce(&mut Piece)) -> bool {
        let mut inner = self.inner.lock();
        let Some(piece) = inner.pieces.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        update(piece);
        piece.requested = false;
        self.arrived.notify_all();
        true
    }

    /// Drops every entry whose id falls outside `window`.
    ///
    /// Returns the evicted ids.
    pub fn retain_window(&self, window: Range<PieceIndex>) -> Vec<PieceIndex> {
        let mut inner = self.inner.lock();
        let mut evicted = Vec::new();
        inner.pieces.retain(|piece| {
            let keep = window.contains(&piece.id);
            if !keep {
                evicted.push(piece.id);
            }
            keep
        });
        evicted
    }

    /// Moves the window of an existing entry. Returns true if it changed.
    pub fn reanchor(&self, span: PieceSpan) -> bool {
        let mut inner = self.inner.lock();
        match inner.pieces.iter_mut().find(|p| p.id == span.piece) {
            Some(piece) if piece.offset != span.offset || piece.length != span.length => {
                piece.offset = span.offset;
                piece.length = span.length;
                true
            }
            _ => false,
        }
    }

    /// Removes an entry regardless of its state.
    pub fn remove(&self, id: PieceIndex) -> Option<Piece> {
        let mut inner = self.inner.lock();
        let position = inner.pieces.iter().position(|p| p.id == id)?;
        inner.pieces.remove(position)
    }

    pub fn contains(&self, id: PieceIndex) -> bool {
        self.inner.lock().pieces.iter().any(|p| p.id == id)
    }

    /// Ids currently queued, front first.
    pub fn queued(&self) -> Vec<PieceIndex> {
        self.inner.lock().pieces.iter().map(|p| p.id).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().pieces.is_empty()
    }

    /// Rejects further work and releases every blocked fetcher.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.pieces.clear();
        self.arrived.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}
