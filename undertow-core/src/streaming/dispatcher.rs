//! Alert dispatcher thread.
//!
//! Polls the engine's alert queue with a bounded timeout and routes state
//! changes to the `SwarmStateTracker` and piece reads to the `PieceBuffer`.
//! The bounded poll is what lets `stop` join the thread promptly even when
//! the engine has gone quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{PieceBuffer, StreamingError, SwarmStateTracker};
use crate::engine::{Alert, TorrentBackend};

/// Name of the dispatcher thread, visible in trace logs.
pub const DISPATCHER_THREAD_NAME: &str = "undertow-alerts";

/// Upper bound on the pause after a failed poll.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to the running dispatcher thread.
pub struct EventDispatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Spawns the dispatcher on its own named thread.
    ///
    /// # Errors
    ///
    /// - `StreamingError::DispatcherSpawn` - The OS refused to create the thread
    pub fn spawn(
        backend: Arc<dyn TorrentBackend>,
        buffer: Arc<PieceBuffer>,
        tracker: Arc<SwarmStateTracker>,
        poll_interval: Duration,
    ) -> Result<Self, StreamingError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name(DISPATCHER_THREAD_NAME.to_string())
            .spawn(move || run(&*backend, &buffer, &tracker, &stop_flag, poll_interval))
            .map_err(StreamingError::DispatcherSpawn)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Signals the thread to exit and joins it. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("Alert dispatcher thread panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    backend: &dyn TorrentBackend,
    buffer: &PieceBuffer,
    tracker: &SwarmStateTracker,
    stop: &AtomicBool,
    poll_interval: Duration,
) {
    tracing::debug!("Alert dispatcher started");

    while !stop.load(Ordering::SeqCst) {
        match backend.poll_alerts(poll_interval) {
            Ok(alerts) => {
                for alert in alerts {
                    dispatch_alert(alert, buffer, tracker);
                }
            }
            Err(e) => {
                tracing::warn!("Alert poll failed: {e}");
                thread::sleep(poll_interval.min(POLL_ERROR_BACKOFF));
            }
        }
    }

    tracing::debug!("Alert dispatcher stopped");
}

/// Routes one alert to the structure it updates.
pub fn dispatch_alert(alert: Alert, buffer: &PieceBuffer, tracker: &SwarmStateTracker) {
    match alert {
        Alert::StateChanged { current, .. } => tracker.advance(current),
        Alert::PieceRead { piece, data } => {
            let size = data.len();
            if buffer.mark_arrived(piece, data) {
                tracing::debug!("Piece {piece} arrived ({size} bytes)");
            } else {
                tracing::debug!("Dropping piece {piece}: no longer queued");
            }
        }
        Alert::PieceReadFailed { piece, reason } => {
            tracing::warn!("Read of piece {piece} failed: {reason}");
            buffer.mark_failed(piece, reason);
        }
        Alert::TorrentError { message } => tracker.record_error(message),
        other => tracing::trace!("Ignoring {} alert", other.kind()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use bytes::Bytes;

    use super::*;
    use crate::engine::TorrentState;
    use crate::streaming::Piece;
    use crate::torrent::{PieceIndex, PieceSpan};

    fn queued_buffer(id: u32) -> PieceBuffer {
        let buffer = PieceBuffer::new();
        buffer.enqueue(Piece::new(PieceSpan {
            piece: PieceIndex::new(id),
            offset: 0,
            length: 3,
        }));
        buffer
    }

    #[test]
    fn test_state_change_advances_tracker() {
        let buffer = PieceBuffer::new();
        let tracker = SwarmStateTracker::new();

        dispatch_alert(
            Alert::StateChanged {
                previous: Some(TorrentState::DownloadingMetadata),
                current: TorrentState::Downloading,
            },
            &buffer,
            &tracker,
        );

        assert_eq!(
            tracker.observe_state().torrent_state,
            Some(TorrentState::Downloading)
        );
    }

    #[test]
    fn test_piece_read_completes_buffer_entry() {
        let buffer = queued_buffer(2);
        let tracker = SwarmStateTracker::new();

        dispatch_alert(
            Alert::PieceRead {
                piece: PieceIndex::new(2),
                data: Bytes::from_static(b"abc"),
            },
            &buffer,
            &tracker,
        );

        let piece = buffer.fetch_next(Instant::now()).unwrap();
        assert_eq!(piece.data, Some(Bytes::from_static(b"abc")));
    }

    #[test]
    fn test_read_failure_and_torrent_error_are_recorded() {
        let buffer = queued_buffer(0);
        let tracker = SwarmStateTracker::new();

        dispatch_alert(
            Alert::PieceReadFailed {
                piece: PieceIndex::new(0),
                reason: "hash mismatch".to_string(),
            },
            &buffer,
            &tracker,
        );
        dispatch_alert(
            Alert::TorrentError {
                message: "disk full".to_string(),
            },
            &buffer,
            &tracker,
        );

        assert!(matches!(
            buffer.fetch_next(Instant::now()),
            Err(StreamingError::PieceReadFailed { .. })
        ));
        assert_eq!(tracker.observe_state().last_error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_unknown_alerts_change_nothing() {
        let buffer = queued_buffer(0);
        let tracker = SwarmStateTracker::new();

        dispatch_alert(
            Alert::Other {
                kind: "peer_connect".to_string(),
            },
            &buffer,
            &tracker,
        );
        dispatch_alert(
            Alert::PieceFinished {
                piece: PieceIndex::new(0),
            },
            &buffer,
            &tracker,
        );

        assert_eq!(tracker.observe_state(), Default::default());
        assert_eq!(buffer.len(), 1);
    }
}
