//! Core types for torrent metadata and byte-to-piece mapping

use crate::torrent::{InfoHash, PieceIndex, TorrentError};

/// Complete metadata extracted from a torrent file.
///
/// Contains the piece layout and file structure needed to map byte
/// offsets of a file onto the pieces that carry them.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub piece_length: u32,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub files: Vec<TorrentFile>,
    pub announce_urls: Vec<String>,
}

/// Individual file within a torrent.
///
/// Path components are relative to the torrent root.
#[derive(Debug, Clone, PartialEq)]
pub struct TorrentFile {
    pub path: Vec<String>,
    pub length: u64,
}

impl TorrentFile {
    /// Joins the path components with `/`.
    pub fn display_path(&self) -> String {
        self.path.join("/")
    }
}

/// Magnet link components.
///
/// Parsed magnet URI containing minimal torrent metadata.
/// Contains info hash and optional display name and tracker URLs.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

/// Window of bytes needed from a single piece.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSpan {
    pub piece: PieceIndex,
    /// Offset of the window inside the piece
    pub offset: u32,
    /// Length of the window
    pub length: u32,
}

impl TorrentMetadata {
    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Returns the file at `index`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::FileIndexOutOfRange` - No such file
    pub fn file(&self, index: usize) -> Result<&TorrentFile, TorrentError> {
        self.files
            .get(index)
            .ok_or(TorrentError::FileIndexOutOfRange {
                index,
                file_count: self.files.len(),
            })
    }

    /// Byte offset of the file at `index` within the torrent's content.
    ///
    /// # Errors
    ///
    /// - `TorrentError::FileIndexOutOfRange` - No such file
    pub fn file_offset(&self, index: usize) -> Result<u64, TorrentError> {
        self.file(index)?;
        Ok(self.files[..index].iter().map(|f| f.length).sum())
    }

    /// Maps `[offset, end of file)` onto piece windows, yielding at most
    /// `limit` spans in ascending piece order.
    ///
    /// The first span starts inside its piece at the offset's position;
    /// the following spans start at the piece boundary. The last span is
    /// clipped to the end of the file.
    ///
    /// # Errors
    ///
    /// - `TorrentError::FileIndexOutOfRange` - No such file
    /// - `TorrentError::OffsetOutOfRange` - Offset past the end of the file
    pub fn map_file(
        &self,
        file_index: usize,
        offset: u64,
        limit: usize,
    ) -> Result<Vec<PieceSpan>, TorrentError> {
        let file_length = self.file(file_index)?.length;
        if offset > file_length {
            return Err(TorrentError::OffsetOutOfRange {
                offset,
                file_length,
            });
        }

        let piece_length = u64::from(self.piece_length);
        let absolute = self.file_offset(file_index)? + offset;
        let mut remaining = file_length - offset;
        let mut piece = (absolute / piece_length) as u32;
        let mut start = absolute % piece_length;
        let mut spans = Vec::with_capacity(limit);

        while remaining > 0 && spans.len() < limit {
            let length = remaining.min(piece_length - start);
            spans.push(PieceSpan {
                piece: PieceIndex::new(piece),
                offset: start as u32,
                length: length as u32,
            });
            remaining -= length;
            start = 0;
            piece += 1;
        }

        Ok(spans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(piece_length: u32, files: &[u64]) -> TorrentMetadata {
        let total_length: u64 = files.iter().sum();
        let piece_count = total_length.div_ceil(u64::from(piece_length)) as usize;
        TorrentMetadata {
            info_hash: InfoHash::new([7u8; 20]),
            name: "fixture".to_string(),
            piece_length,
            piece_hashes: vec![[0u8; 20]; piece_count],
            total_length,
            files: files
                .iter()
                .enumerate()
                .map(|(i, length)| TorrentFile {
                    path: vec![format!("file{i}.bin")],
                    length: *length,
                })
                .collect(),
            announce_urls: vec![],
        }
    }

    #[test]
    fn test_map_file_from_start_covers_whole_pieces() {
        let meta = metadata(16_384, &[163_840]);
        let spans = meta.map_file(0, 0, 4).unwrap();

        assert_eq!(spans.len(), 4);
        for (i, span) in spans.iter().enumerate() {
            assert_eq!(span.piece, PieceIndex::new(i as u32));
            assert_eq!(span.offset, 0);
            assert_eq!(span.length, 16_384);
        }
    }

    #[test]
    fn test_map_file_mid_piece_offset() {
        let meta = metadata(1000, &[5000]);
        let spans = meta.map_file(0, 2500, 10).unwrap();

        assert_eq!(
            spans[0],
            PieceSpan {
                piece: PieceIndex::new(2),
                offset: 500,
                length: 500
            }
        );
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[2].piece, PieceIndex::new(4));
    }

    #[test]
    fn test_map_file_clips_last_span_to_file_end() {
        // Second file starts at byte 1500, inside piece 1.
        let meta = metadata(1000, &[1500, 1200]);
        let spans = meta.map_file(1, 0, 10).unwrap();

        assert_eq!(
            spans,
            vec![
                PieceSpan {
                    piece: PieceIndex::new(1),
                    offset: 500,
                    length: 500
                },
                PieceSpan {
                    piece: PieceIndex::new(2),
                    offset: 0,
                    length: 700
                },
            ]
        );
    }

    #[test]
    fn test_map_file_at_end_is_empty() {
        let meta = metadata(1000, &[3000]);
        assert!(meta.map_file(0, 3000, 4).unwrap().is_empty());
        assert!(matches!(
            meta.map_file(0, 3001, 4),
            Err(TorrentError::OffsetOutOfRange { .. })
        ));
    }

    #[test]
    fn test_file_index_out_of_range() {
        let meta = metadata(1000, &[3000]);
        assert!(matches!(
            meta.map_file(1, 0, 4),
            Err(TorrentError::FileIndexOutOfRange {
                index: 1,
                file_count: 1
            })
        ));
    }
}
