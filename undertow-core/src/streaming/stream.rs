//! `std::io::Read + Seek` over a torrent access.

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;

use bytes::{Buf, Bytes};

use super::{AccessPhase, NextPiece, StreamingError, TorrentAccess};
use crate::config::AccessConfig;
use crate::engine::TorrentBackend;

/// Blocking byte stream over one file of a torrent.
///
/// Reads block until the engine has delivered the piece at the current
/// position. Dropping the stream stops the access.
pub struct TorrentStream {
    access: TorrentAccess,
    /// Unread tail of the last piece window
    pending: Bytes,
}

impl TorrentStream {
    /// Opens `uri` and starts streaming the selected file.
    ///
    /// A single-file torrent needs no selection.
    ///
    /// # Errors
    ///
    /// - `StreamingError::NoFileSelected` - Several files and none selected
    /// - Any error of `TorrentAccess::open`
    pub fn open(
        uri: &str,
        backend: Arc<dyn TorrentBackend>,
        config: AccessConfig,
    ) -> Result<Self, StreamingError> {
        let mut access = TorrentAccess::open(uri, backend, config)?;
        if access.phase() == AccessPhase::MetadataReady {
            let file_count = access.metadata().map_or(0, |m| m.files.len());
            if file_count != 1 {
                return Err(StreamingError::NoFileSelected { file_count });
            }
            access.start_download(0)?;
        }
        Self::from_access(access)
    }

    /// Wraps an access whose download has started.
    ///
    /// # Errors
    ///
    /// - `StreamingError::InvalidPhase` - Access is not streaming
    pub fn from_access(access: TorrentAccess) -> Result<Self, StreamingError> {
        if access.phase() != AccessPhase::Active {
            return Err(StreamingError::InvalidPhase {
                operation: "stream",
                phase: access.phase(),
            });
        }
        Ok(Self {
            access,
            pending: Bytes::new(),
        })
    }

    /// Byte offset of the next byte `read` returns.
    pub fn position(&self) -> u64 {
        self.access.position() - self.pending.len() as u64
    }

    /// Length of the streamed file.
    pub fn len(&self) -> u64 {
        self.access.file_length()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn access(&self) -> &TorrentAccess {
        &self.access
    }

    /// Stops the access and releases the engine session.
    pub fn close(mut self) {
        self.access.stop();
    }
}

impl Read for TorrentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        while self.pending.is_empty() {
            match self.access.read_next_piece()? {
                NextPiece::Data(piece) => self.pending = piece.data.unwrap_or_default(),
                NextPiece::Eof => return Ok(0),
            }
        }

        let chunk = self.pending.split_to(buf.len().min(self.pending.len()));
        buf[..chunk.len()].copy_from_slice(&chunk);
        Ok(chunk.len())
    }
}

impl Seek for TorrentStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let current = self.position();
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file")
        })?;

        if target == current {
            return Ok(current);
        }

        // Forward seeks inside the unread window skip bytes without a reselect.
        if target > current && target < self.access.position() {
            self.pending.advance((target - current) as usize);
            return Ok(target);
        }

        self.access.seek(target)?;
        self.pending.clear();
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UndertowConfig;
    use crate::engine::SimulatedBackend;
    use crate::torrent::encode_torrent;

    fn content() -> Vec<u8> {
        (0..20_000u32).map(|i| (i % 253) as u8).collect()
    }

    fn open_stream() -> (tempfile::TempDir, TorrentStream) {
        let backend =
            Arc::new(SimulatedBackend::from_content("clip.webm", content(), 4096).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.torrent");
        std::fs::write(&path, encode_torrent(backend.torrent_metadata())).unwrap();

        let stream = TorrentStream::open(
            &format!("torrent://{}", path.display()),
            backend,
            UndertowConfig::for_testing().access,
        )
        .unwrap();
        (dir, stream)
    }

    #[test]
    fn test_read_to_end_yields_whole_file() {
        let (_dir, mut stream) = open_stream();

        let mut data = Vec::new();
        stream.read_to_end(&mut data).unwrap();

        assert_eq!(data, content());
        assert_eq!(stream.position(), 20_000);
    }

    #[test]
    fn test_seek_variants() {
        let (_dir, mut stream) = open_stream();
        let expected = content();

        let mut byte = [0u8; 1];
        stream.seek(SeekFrom::Start(12_345)).unwrap();
        stream.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], expected[12_345]);

        // Inside the unread window
        let piece_end = stream.access().position();
        stream.seek(SeekFrom::Current(100)).unwrap();
        assert_eq!(stream.position(), 12_446);
        assert_eq!(stream.access().position(), piece_end);
        stream.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], expected[12_446]);

        stream.seek(SeekFrom::End(-1)).unwrap();
        stream.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], expected[19_999]);
        assert_eq!(stream.read(&mut byte).unwrap(), 0);

        // Backwards to an already consumed piece
        stream.seek(SeekFrom::Start(10)).unwrap();
        stream.read_exact(&mut byte).unwrap();
        assert_eq!(byte[0], expected[10]);
    }

    #[test]
    fn test_invalid_seeks_are_rejected() {
        let (_dir, mut stream) = open_stream();

        let before_start = stream.seek(SeekFrom::Current(-1)).unwrap_err();
        assert_eq!(before_start.kind(), io::ErrorKind::InvalidInput);

        let past_end = stream.seek(SeekFrom::End(1)).unwrap_err();
        assert_eq!(past_end.kind(), io::ErrorKind::InvalidInput);
    }
}
