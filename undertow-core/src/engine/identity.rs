//! Client fingerprint and per-access session identity.

use std::fmt;

use uuid::Uuid;

/// Azureus-style client fingerprint, rendered as `-XXvvvv-` at the start of
/// every peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientFingerprint {
    /// Two character client code
    pub code: [u8; 2],
    /// Major, minor, revision and tag version digits
    pub version: [u8; 4],
}

impl Default for ClientFingerprint {
    fn default() -> Self {
        Self {
            code: *b"UT",
            version: [0, 1, 0, 0],
        }
    }
}

impl ClientFingerprint {
    /// Returns the 8-byte peer id prefix.
    pub fn peer_id_prefix(&self) -> [u8; 8] {
        let mut prefix = [b'-'; 8];
        prefix[1..3].copy_from_slice(&self.code);
        for (slot, digit) in prefix[3..7].iter_mut().zip(self.version) {
            *slot = version_char(digit);
        }
        prefix
    }
}

fn version_char(digit: u8) -> u8 {
    match digit {
        0..=9 => b'0' + digit,
        10..=35 => b'A' + (digit - 10),
        _ => b'Z',
    }
}

/// Identity of one access session.
///
/// Created once per opened stream and handed to the engine when the torrent
/// is added; never shared between access instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub session_id: Uuid,
    pub peer_id: [u8; 20],
}

impl SessionIdentity {
    /// Generates a fresh session id and a random peer id carrying the
    /// fingerprint prefix.
    pub fn generate(fingerprint: &ClientFingerprint) -> Self {
        let mut peer_id = [0u8; 20];
        peer_id[..8].copy_from_slice(&fingerprint.peer_id_prefix());
        for byte in &mut peer_id[8..] {
            *byte = rand::random();
        }

        Self {
            session_id: Uuid::new_v4(),
            peer_id,
        }
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}{})",
            self.session_id,
            String::from_utf8_lossy(&self.peer_id[..8]),
            hex::encode(&self.peer_id[8..])
        )
    }
}
