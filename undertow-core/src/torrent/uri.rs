//! Access URI parsing into engine add-parameters.
//!
//! An access URI has the form `torrent://<location>` where the location is a
//! magnet link, a 40 digit hex info hash, or a path to a local `.torrent`
//! file (plain, percent-encoded or as a `file://` URL). Bare `magnet:?`
//! URIs are accepted as well. A trailing `#file_at=<index>` selects the file
//! to stream.

use std::path::PathBuf;

use super::parsing::{MagnetLink, MagnetParser, TorrentMetadata, parse_torrent_file};
use super::{InfoHash, TorrentError};

/// URI scheme handled by the access.
pub const ACCESS_SCHEME: &str = "torrent://";

/// Fragment selecting a file inside the torrent.
pub const FILE_SELECTOR: &str = "#file_at=";

/// Where the torrent's metadata comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TorrentSource {
    /// Metadata already known from a local `.torrent` file
    Metadata(Box<TorrentMetadata>),
    /// Metadata must be fetched from the swarm
    Magnet(MagnetLink),
    /// Metadata must be fetched from the swarm, no tracker hints
    InfoHash(InfoHash),
}

/// Parameters handed to the engine when adding a torrent.
#[derive(Debug, Clone, PartialEq)]
pub struct AddTorrentParams {
    /// Canonical `torrent://` form of the URI that was opened
    pub uri: String,
    pub source: TorrentSource,
    /// File chosen through the URI, if any
    pub file_index: Option<usize>,
}

impl AddTorrentParams {
    /// Info hash of the torrent regardless of source.
    pub fn info_hash(&self) -> InfoHash {
        match &self.source {
            TorrentSource::Metadata(metadata) => metadata.info_hash,
            TorrentSource::Magnet(magnet) => magnet.info_hash,
            TorrentSource::InfoHash(info_hash) => *info_hash,
        }
    }

    /// Metadata carried by the parameters, if any.
    pub fn metadata(&self) -> Option<&TorrentMetadata> {
        match &self.source {
            TorrentSource::Metadata(metadata) => Some(metadata.as_ref()),
            _ => None,
        }
    }

    /// Whether metadata still has to be retrieved from the swarm.
    pub fn has_metadata(&self) -> bool {
        self.metadata().is_some()
    }

    /// URI that reopens this torrent streaming the file at `index`.
    pub fn file_uri(&self, index: usize) -> String {
        format!("{}{FILE_SELECTOR}{index}", self.uri)
    }
}

/// Parses an access URI into add-parameters.
///
/// # Errors
///
/// - `TorrentError::InvalidUri` - Unknown scheme or empty location
/// - `TorrentError::InvalidMagnetLink` - Malformed magnet location
/// - `TorrentError::Io` / `TorrentError::InvalidTorrentFile` - Unreadable `.torrent` file
pub fn parse_access_uri(uri: &str) -> Result<AddTorrentParams, TorrentError> {
    let (uri_without_selector, file_index) = split_file_selector(uri)?;
    let location = if let Some(location) = uri_without_selector.strip_prefix(ACCESS_SCHEME) {
        location
    } else if uri_without_selector.starts_with("magnet:") {
        uri_without_selector
    } else {
        return Err(TorrentError::InvalidUri {
            uri: uri.to_string(),
            reason: format!("expected {ACCESS_SCHEME}<location>"),
        });
    };

    if location.is_empty() {
        return Err(TorrentError::InvalidUri {
            uri: uri.to_string(),
            reason: "empty location".to_string(),
        });
    }

    let source = if location.starts_with("magnet:") {
        TorrentSource::Magnet(MagnetParser::parse_magnet_link(location)?)
    } else if location.len() == 40 && location.bytes().all(|b| b.is_ascii_hexdigit()) {
        TorrentSource::InfoHash(InfoHash::from_hex(location)?)
    } else {
        let path = torrent_file_path(uri, location)?;
        tracing::debug!("Loading torrent metadata from {}", path.display());
        TorrentSource::Metadata(Box::new(parse_torrent_file(&path)?))
    };

    Ok(AddTorrentParams {
        uri: format!("{ACCESS_SCHEME}{location}"),
        source,
        file_index,
    })
}

fn split_file_selector(uri: &str) -> Result<(&str, Option<usize>), TorrentError> {
    let Some((rest, index)) = uri.rsplit_once(FILE_SELECTOR) else {
        return Ok((uri, None));
    };

    let index = index.parse().map_err(|_| TorrentError::InvalidUri {
        uri: uri.to_string(),
        reason: format!("file selector '{index}' is not an index"),
    })?;
    Ok((rest, Some(index)))
}

fn torrent_file_path(uri: &str, location: &str) -> Result<PathBuf, TorrentError> {
    if location.starts_with("file://") {
        let url = url::Url::parse(location)?;
        return url.to_file_path().map_err(|()| TorrentError::InvalidUri {
            uri: uri.to_string(),
            reason: "file URL does not name a local path".to_string(),
        });
    }

    let decoded = urlencoding::decode(location).map_err(|e| TorrentError::InvalidUri {
        uri: uri.to_string(),
        reason: format!("invalid percent-encoding: {e}"),
    })?;
    Ok(PathBuf::from(decoded.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::creation::{TorrentCreator, encode_torrent};

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    fn write_torrent(dir: &std::path::Path, file_name: &str) -> (PathBuf, TorrentMetadata) {
        let metadata = TorrentCreator::with_piece_size(16_384)
            .create_from_bytes("movie.mp4", &[9u8; 40_000], vec![])
            .unwrap();
        let path = dir.join(file_name);
        std::fs::write(&path, encode_torrent(&metadata)).unwrap();
        (path, metadata)
    }

    #[test]
    fn test_parse_magnet_location() {
        let params = parse_access_uri(&format!("torrent://magnet:?xt=urn:btih:{HASH}")).unwrap();

        assert!(!params.has_metadata());
        assert_eq!(params.info_hash().to_string(), HASH);
        assert!(matches!(params.source, TorrentSource::Magnet(_)));
    }

    #[test]
    fn test_parse_magnet_location_with_base32_hash() {
        let params =
            parse_access_uri("torrent://magnet:?xt=urn:btih:AERUKZ4JVPG66AJDIVTYTK6N54ASGRLH")
                .unwrap();
        assert_eq!(params.info_hash().to_string(), HASH);
    }

    #[test]
    fn test_parse_bare_magnet_uri() {
        let params = parse_access_uri(&format!("magnet:?xt=urn:btih:{HASH}")).unwrap();
        assert_eq!(params.uri, format!("torrent://magnet:?xt=urn:btih:{HASH}"));
    }

    #[test]
    fn test_parse_info_hash_location() {
        let params = parse_access_uri(&format!("torrent://{HASH}")).unwrap();
        assert_eq!(params.source, TorrentSource::InfoHash(InfoHash::from_hex(HASH).unwrap()));
    }

    #[test]
    fn test_parse_torrent_file_location() {
        let dir = tempfile::tempdir().unwrap();
        let (path, metadata) = write_torrent(dir.path(), "movie.torrent");

        let params = parse_access_uri(&format!("torrent://{}", path.display())).unwrap();
        assert_eq!(params.metadata(), Some(&metadata));
        assert_eq!(params.info_hash(), metadata.info_hash);
    }

    #[test]
    fn test_parse_percent_encoded_and_file_url_locations() {
        let dir = tempfile::tempdir().unwrap();
        let (path, metadata) = write_torrent(dir.path(), "my movie.torrent");

        let encoded = path.display().to_string().replace(' ', "%20");
        let params = parse_access_uri(&format!("torrent://{encoded}")).unwrap();
        assert_eq!(params.info_hash(), metadata.info_hash);

        let file_url = url::Url::from_file_path(&path).unwrap();
        let params = parse_access_uri(&format!("torrent://{file_url}")).unwrap();
        assert_eq!(params.info_hash(), metadata.info_hash);
    }

    #[test]
    fn test_file_selector_round_trips_through_file_uri() {
        let params = parse_access_uri(&format!("torrent://{HASH}")).unwrap();
        assert_eq!(params.file_index, None);

        let reopened = parse_access_uri(&params.file_uri(3)).unwrap();
        assert_eq!(reopened.file_index, Some(3));
        assert_eq!(reopened.uri, params.uri);

        assert!(matches!(
            parse_access_uri(&format!("torrent://{HASH}#file_at=last")),
            Err(TorrentError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_parse_failures_are_errors() {
        assert!(matches!(
            parse_access_uri("http://example.com/movie.torrent"),
            Err(TorrentError::InvalidUri { .. })
        ));
        assert!(matches!(
            parse_access_uri("torrent://"),
            Err(TorrentError::InvalidUri { .. })
        ));
        assert!(matches!(
            parse_access_uri("torrent:///does/not/exist.torrent"),
            Err(TorrentError::Io(_))
        ));
        assert!(parse_access_uri("torrent://magnet:?dn=no-hash").is_err());
    }
}
