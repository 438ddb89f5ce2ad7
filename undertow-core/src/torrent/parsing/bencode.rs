//! Bencode decoding of `.torrent` files and info hash calculation

use sha1::{Digest, Sha1};

use super::types::{TorrentFile, TorrentMetadata};
use crate::torrent::{InfoHash, TorrentError};

pub(super) type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
pub(super) type ParseResult<T> = Result<T, TorrentError>;

/// Bencode parsing utilities for torrent metadata extraction.
pub struct BencodeParser;

impl BencodeParser {
    /// Parses a bencoded `.torrent` document into metadata.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Malformed bencode or missing fields
    pub fn parse_torrent_bytes(torrent_bytes: &[u8]) -> Result<TorrentMetadata, TorrentError> {
        let parsed = bencode_rs::Value::parse(torrent_bytes).map_err(|e| {
            TorrentError::InvalidTorrentFile {
                reason: format!("Bencode parsing failed: {e:?}"),
            }
        })?;

        let Some(root) = parsed.first() else {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Empty bencode data".to_string(),
            });
        };

        if let bencode_rs::Value::Dictionary(dict) = root {
            Self::read_metadata(dict, torrent_bytes)
        } else {
            Err(TorrentError::InvalidTorrentFile {
                reason: "Root element must be dictionary".to_string(),
            })
        }
    }

    fn read_metadata(dict: &BencodeDict<'_>, original_data: &[u8]) -> ParseResult<TorrentMetadata> {
        let Some(bencode_rs::Value::Dictionary(info)) = dict.get(b"info".as_slice()) else {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Missing or invalid 'info' dictionary".to_string(),
            });
        };

        let info_hash = Self::calculate_info_hash(original_data)?;
        let name = Self::read_string(info, b"name")?;

        let piece_length = Self::read_integer(info, b"piece length")?;
        if piece_length <= 0 || piece_length > i64::from(u32::MAX) {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!("Invalid piece length: {piece_length}"),
            });
        }

        let pieces_bytes = Self::read_bytes(info, b"pieces")?;
        if !pieces_bytes.len().is_multiple_of(20) {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Invalid pieces length".to_string(),
            });
        }
        let piece_hashes: Vec<[u8; 20]> = pieces_bytes
            .chunks(20)
            .map(|chunk| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let files = match (info.get(b"length".as_slice()), info.get(b"files".as_slice())) {
            (Some(bencode_rs::Value::Integer(length)), _) if *length >= 0 => vec![TorrentFile {
                path: vec![name.clone()],
                length: *length as u64,
            }],
            (_, Some(bencode_rs::Value::List(files_list))) => Self::read_files(files_list)?,
            _ => {
                return Err(TorrentError::InvalidTorrentFile {
                    reason: "Missing 'files' or 'length' field".to_string(),
                });
            }
        };
        let total_length: u64 = files.iter().map(|f| f.length).sum();

        let expected_pieces = total_length.div_ceil(piece_length as u64);
        if expected_pieces != piece_hashes.len() as u64 {
            return Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "Piece count mismatch: {} hashes for {expected_pieces} pieces",
                    piece_hashes.len()
                ),
            });
        }

        Ok(TorrentMetadata {
            info_hash,
            name,
            piece_length: piece_length as u32,
            piece_hashes,
            total_length,
            files,
            announce_urls: Self::read_announce_urls(dict),
        })
    }

    /// SHA-1 of the raw bytes of the top-level info dictionary.
    ///
    /// Walks the root dictionary key by key so that `4:info` appearing
    /// inside another value is never mistaken for the info key.
    fn calculate_info_hash(original_data: &[u8]) -> Result<InfoHash, TorrentError> {
        let invalid = |reason: &str| TorrentError::InvalidTorrentFile {
            reason: reason.to_string(),
        };

        if original_data.first() != Some(&b'd') {
            return Err(invalid("Expected dictionary start"));
        }

        let mut pos = 1;
        while pos < original_data.len() && original_data[pos] != b'e' {
            if !original_data[pos].is_ascii_digit() {
                return Err(invalid("Dictionary key must be a string"));
            }
            let key_length = Self::find_value_end(&original_data[pos..])?;
            let key = &original_data[pos..pos + key_length];
            pos += key_length;

            let value_length = Self::find_value_end(&original_data[pos..])?;
            if key == b"4:info" {
                let digest = Sha1::digest(&original_data[pos..pos + value_length]);
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&digest);
                return Ok(InfoHash::new(hash));
            }
            pos += value_length;
        }

        Err(invalid("Could not find info dictionary in data"))
    }

    /// Returns the length of the bencoded dictionary at the start of `data`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - If invalid bencode dictionary format
    pub fn find_dictionary_end(data: &[u8]) -> Result<usize, TorrentError> {
        if data.first() != Some(&b'd') {
            return Err(TorrentError::InvalidTorrentFile {
                reason: "Expected dictionary start".to_string(),
            });
        }
        Self::find_value_end(data)
    }

    /// Returns the length of the bencoded value at the start of `data`.
    ///
    /// # Errors
    ///
    /// - `TorrentError::InvalidTorrentFile` - Malformed or truncated value
    pub fn find_value_end(data: &[u8]) -> Result<usize, TorrentError> {
        let invalid = |reason: &str| TorrentError::InvalidTorrentFile {
            reason: reason.to_string(),
        };

        let mut pos = 0;
        let mut depth = 0;

        loop {
            match data.get(pos) {
                Some(b'd' | b'l') => {
                    depth += 1;
                    pos += 1;
                }
                Some(b'e') if depth > 0 => {
                    depth -= 1;
                    pos += 1;
                }
                Some(b'i') => {
                    let end = data[pos..]
                        .iter()
                        .position(|&b| b == b'e')
                        .ok_or_else(|| invalid("Unterminated integer"))?;
                    pos += end + 1;
                }
                Some(b'0'..=b'9') => {
                    let colon = data[pos..]
                        .iter()
                        .position(|&b| b == b':')
                        .ok_or_else(|| invalid("Invalid string format"))?;
                    let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| invalid("Invalid string length"))?;
                    pos += colon + 1 + length;
                    if pos > data.len() {
                        return Err(invalid("Truncated bencode string"));
                    }
                }
                None if depth > 0 => return Err(invalid("Incomplete bencode dictionary")),
                _ => return Err(invalid("Invalid bencode character")),
            }

            if depth == 0 {
                return Ok(pos);
            }
        }
    }

    fn read_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
        let bytes = Self::read_bytes(dict, key)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| TorrentError::InvalidTorrentFile {
            reason: format!("Invalid UTF-8 in field: {:?}", String::from_utf8_lossy(key)),
        })
    }

    fn read_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
        match dict.get(key) {
            Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
            _ => Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "Missing or invalid field: {:?}",
                    String::from_utf8_lossy(key)
                ),
            }),
        }
    }

    fn read_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
        match dict.get(key) {
            Some(bencode_rs::Value::Integer(value)) => Ok(*value),
            _ => Err(TorrentError::InvalidTorrentFile {
                reason: format!(
                    "Missing or invalid integer field: {:?}",
                    String::from_utf8_lossy(key)
                ),
            }),
        }
    }

    fn read_files(files_list: &[bencode_rs::Value<'_>]) -> ParseResult<Vec<TorrentFile>> {
        let mut files = Vec::with_capacity(files_list.len());

        for file_value in files_list {
            let bencode_rs::Value::Dictionary(file_dict) = file_value else {
                return Err(TorrentError::InvalidTorrentFile {
                    reason: "Invalid file entry type".to_string(),
                });
            };

            let length = Self::read_integer(file_dict, b"length")?;
            if length < 0 {
                return Err(TorrentError::InvalidTorrentFile {
                    reason: format!("Negative file length: {length}"),
                });
            }

            let Some(bencode_rs::Value::List(path_list)) = file_dict.get(b"path".as_slice()) else {
                return Err(TorrentError::InvalidTorrentFile {
                    reason: "Missing or invalid path in file".to_string(),
                });
            };

            let path = path_list
                .iter()
                .map(|component| match component {
                    bencode_rs::Value::Bytes(bytes) => String::from_utf8(bytes.to_vec())
                        .map_err(|_| TorrentError::InvalidTorrentFile {
                            reason: "Invalid UTF-8 in file path".to_string(),
                        }),
                    _ => Err(TorrentError::InvalidTorrentFile {
                        reason: "Invalid path component type".to_string(),
                    }),
                })
                .collect::<ParseResult<Vec<String>>>()?;

            files.push(TorrentFile {
                path,
                length: length as u64,
            });
        }

        Ok(files)
    }

    /// Announce URLs are optional: trackerless torrents rely on DHT.
    fn read_announce_urls(dict: &BencodeDict<'_>) -> Vec<String> {
        let mut announce_urls = Vec::new();

        if let Ok(announce) = Self::read_string(dict, b"announce") {
            announce_urls.push(announce);
        }

        if let Some(bencode_rs::Value::List(tiers)) = dict.get(b"announce-list".as_slice()) {
            for tier in tiers {
                let bencode_rs::Value::List(tier_urls) = tier else {
                    continue;
                };
                for url_value in tier_urls {
                    if let bencode_rs::Value::Bytes(url_bytes) = url_value
                        && let Ok(url) = String::from_utf8(url_bytes.to_vec())
                        && !announce_urls.contains(&url)
                    {
                        announce_urls.push(url);
                    }
                }
            }
        }

        announce_urls
    }
}
