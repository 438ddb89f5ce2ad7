//! Magnet link parsing utilities

use super::types::MagnetLink;
use crate::torrent::{InfoHash, TorrentError};

/// Magnet link parsing utilities.
pub struct MagnetParser;

impl MagnetParser {
    /// Parses magnet link to extract torrent information.
    ///
    /// # Errors
    /// - `TorrentError::InvalidMagnetLink` - Malformed magnet URI or missing btih topic
    pub fn parse_magnet_link(magnet_url: &str) -> Result<MagnetLink, TorrentError> {
        let magnet =
            magnet_url::Magnet::new(magnet_url).map_err(|e| TorrentError::InvalidMagnetLink {
                reason: format!("{e:?}"),
            })?;

        let info_hash = Self::extract_info_hash(magnet_url)?;

        Ok(MagnetLink {
            info_hash,
            display_name: magnet.display_name().map(|s| s.to_string()),
            trackers: magnet.trackers().to_vec(),
        })
    }

    /// Finds the `xt=urn:btih:` topic in the query string. The hash may be
    /// hex or base32.
    fn extract_info_hash(magnet_url: &str) -> Result<InfoHash, TorrentError> {
        let query = magnet_url
            .split_once('?')
            .map(|(_, query)| query)
            .unwrap_or_default();

        query
            .split('&')
            .find_map(|param| param.strip_prefix("xt=urn:btih:"))
            .ok_or_else(|| TorrentError::InvalidMagnetLink {
                reason: format!("Missing btih exact topic in {magnet_url}"),
            })
            .and_then(|hash| {
                InfoHash::from_btih(hash).map_err(|e| TorrentError::InvalidMagnetLink {
                    reason: e.to_string(),
                })
            })
    }
}
