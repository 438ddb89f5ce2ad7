//! Property tests for delivery order and piece selection.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use proptest::collection;
use proptest::prelude::*;
use undertow_core::engine::{
    AddTorrentRequest, ClientFingerprint, SessionIdentity, SimulatedBackend, TorrentBackend,
};
use undertow_core::streaming::{Piece, PieceBuffer, PieceSelector};
use undertow_core::torrent::{AddTorrentParams, PieceIndex, PieceSpan, TorrentSource};

const PIECE: u32 = 512;

fn span(id: u32) -> PieceSpan {
    PieceSpan {
        piece: PieceIndex::new(id),
        offset: 0,
        length: PIECE,
    }
}

fn selector_for(pieces: u32, window: usize) -> (Arc<PieceBuffer>, PieceSelector) {
    let content = vec![3u8; (pieces * PIECE) as usize - 7];
    let backend =
        Arc::new(SimulatedBackend::from_content("feed.ts", content, PIECE).unwrap().with_held_reads());
    let metadata = backend.torrent_metadata().clone();
    backend
        .add_torrent(&AddTorrentRequest {
            params: AddTorrentParams {
                uri: "torrent://feed".to_string(),
                source: TorrentSource::Metadata(Box::new(metadata.clone())),
                file_index: None,
            },
            save_path: std::env::temp_dir(),
            identity: SessionIdentity::generate(&ClientFingerprint::default()),
        })
        .unwrap();

    let buffer = Arc::new(PieceBuffer::new());
    let selector = PieceSelector::new(backend, Arc::clone(&buffer), Arc::new(metadata), 0)
        .with_forward_window(window);
    (buffer, selector)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn fetch_order_matches_enqueue_order_for_any_arrival_order(
        arrivals in Just((0u32..12).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let buffer = Arc::new(PieceBuffer::new());
        for id in 0..12 {
            buffer.enqueue(Piece::new(span(id)));
        }

        let deliverer = {
            let buffer = Arc::clone(&buffer);
            let arrivals = arrivals.clone();
            thread::spawn(move || {
                for id in arrivals {
                    buffer.mark_arrived(PieceIndex::new(id), Bytes::from(vec![id as u8; PIECE as usize]));
                }
            })
        };

        let deadline = Instant::now() + Duration::from_secs(10);
        for expected in 0..12u32 {
            let piece = buffer.fetch_next(deadline).unwrap();
            prop_assert_eq!(piece.id, PieceIndex::new(expected));
            prop_assert_eq!(piece.window().unwrap()[0], expected as u8);
        }
        deliverer.join().unwrap();
        prop_assert!(buffer.is_empty());
    }

    #[test]
    fn selection_never_queues_a_piece_twice(
        offsets in collection::vec(0u64..(20 * u64::from(PIECE) - 7), 1..40),
        window in 1usize..6
    ) {
        let (buffer, mut selector) = selector_for(20, window);

        for offset in offsets {
            let spans = selector.select_pieces(offset).unwrap();
            let queued = buffer.queued();

            prop_assert!(queued.windows(2).all(|pair| pair[0] < pair[1]));
            prop_assert_eq!(queued.len(), spans.len());
            prop_assert_eq!(queued.first().copied(), Some(PieceIndex::new((offset / u64::from(PIECE)) as u32)));
            prop_assert!(spans.len() <= window);
        }
    }
}
