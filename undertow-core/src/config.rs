//! Centralized configuration for Undertow.
//!
//! All tunable parameters of the access are defined here to avoid
//! hard-coded values scattered throughout the pipeline.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::UndertowError;
use crate::engine::{ClientFingerprint, PiecePriority};

/// Central configuration for all Undertow components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct UndertowConfig {
    pub access: AccessConfig,
    pub simulation: SimulationConfig,
}

/// Torrent access configuration.
///
/// Controls where the engine stores content, how long blocking waits may
/// take and how far ahead of the playback position pieces are requested.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// Directory the engine saves downloaded content to
    pub download_dir: PathBuf,
    /// File to stream; `None` lists the torrent's files instead
    pub file_index: Option<usize>,
    /// Upper bound on waiting for the swarm to deliver metadata
    pub metadata_timeout: Duration,
    /// Upper bound on waiting for a single piece
    pub piece_timeout: Duration,
    /// How long one alert poll blocks before the stop flag is checked
    pub alert_poll_interval: Duration,
    /// Pieces kept queued ahead of the playback position
    pub forward_window: usize,
    /// Priority given to pieces that leave the forward window
    pub demotion_priority: PiecePriority,
    /// Added per window slot to the engine read deadline
    pub read_deadline_step: Duration,
    /// Caching delay the host player should apply
    pub pts_delay: Duration,
    /// Peer id prefix announced to the swarm
    pub fingerprint: ClientFingerprint,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            file_index: None,
            metadata_timeout: Duration::from_secs(30),
            piece_timeout: Duration::from_secs(60),
            alert_poll_interval: Duration::from_secs(1),
            forward_window: 4,
            demotion_priority: PiecePriority::Skip,
            read_deadline_step: Duration::from_millis(500),
            pts_delay: Duration::from_millis(1000), // network caching
            fingerprint: ClientFingerprint::default(),
        }
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> crate::Result<Option<T>> {
    let Some(raw) = lookup(key).filter(|value| !value.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| UndertowError::Configuration {
            reason: format!("{key}={raw:?} is not a valid value"),
        })
}

fn default_download_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join("Downloads"))
        .unwrap_or_else(std::env::temp_dir)
}

/// Simulated engine configuration for testing and development.
#[derive(Debug, Clone, Default)]
pub struct SimulationConfig {
    /// Deterministic seed for reproducible out-of-order delivery
    pub deterministic_seed: Option<u64>,
    /// Hold piece reads and deliver them in shuffled batches
    pub hold_reads: bool,
}

impl SimulationConfig {
    /// Creates a configuration for deterministic testing.
    pub fn deterministic_testing() -> Self {
        Self {
            deterministic_seed: Some(42), // Fixed seed for reproducible tests
            hold_reads: false,
        }
    }
}

impl UndertowConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unset or empty variables leave the default in place.
    ///
    /// # Errors
    ///
    /// - `UndertowError::Configuration` - A variable is set to an unparseable value
    pub fn from_env() -> crate::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`, keyed by variable name.
    ///
    /// # Errors
    ///
    /// - `UndertowError::Configuration` - A value is set but unparseable
    pub fn from_lookup<F>(lookup: F) -> crate::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("UNDERTOW_DOWNLOAD_DIR")
            && !dir.is_empty()
        {
            config.access.download_dir = PathBuf::from(dir);
        }

        if let Some(index) = parse_var::<usize>(&lookup, "UNDERTOW_FILE_INDEX")? {
            config.access.file_index = Some(index);
        }

        if let Some(seconds) = parse_var::<u64>(&lookup, "UNDERTOW_METADATA_TIMEOUT")? {
            config.access.metadata_timeout = Duration::from_secs(seconds);
        }

        if let Some(seconds) = parse_var::<u64>(&lookup, "UNDERTOW_PIECE_TIMEOUT")? {
            config.access.piece_timeout = Duration::from_secs(seconds);
        }

        if let Some(count) = parse_var::<usize>(&lookup, "UNDERTOW_FORWARD_WINDOW")? {
            if count == 0 {
                return Err(UndertowError::Configuration {
                    reason: "UNDERTOW_FORWARD_WINDOW must be at least 1".to_string(),
                });
            }
            config.access.forward_window = count;
        }

        if let Some(seed) = parse_var::<u64>(&lookup, "UNDERTOW_SIMULATION_SEED")? {
            config.simulation.deterministic_seed = Some(seed);
        }

        Ok(config)
    }

    /// Creates a configuration optimized for testing.
    ///
    /// Short timeouts keep failing tests fast; content goes to the temp dir.
    pub fn for_testing() -> Self {
        Self {
            access: AccessConfig {
                download_dir: std::env::temp_dir(),
                metadata_timeout: Duration::from_millis(500),
                piece_timeout: Duration::from_secs(5),
                alert_poll_interval: Duration::from_millis(20),
                ..Default::default()
            },
            simulation: SimulationConfig::deterministic_testing(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = UndertowConfig::default();

        assert_eq!(config.access.metadata_timeout, Duration::from_secs(30));
        assert_eq!(config.access.piece_timeout, Duration::from_secs(60));
        assert_eq!(config.access.alert_poll_interval, Duration::from_secs(1));
        assert_eq!(config.access.forward_window, 4);
        assert_eq!(config.access.demotion_priority, PiecePriority::Skip);
        assert_eq!(config.access.file_index, None);
        assert_eq!(config.simulation.deterministic_seed, None);
    }

    #[test]
    fn test_testing_config_is_fast_and_deterministic() {
        let config = UndertowConfig::for_testing();

        assert!(config.access.metadata_timeout < Duration::from_secs(1));
        assert!(config.access.alert_poll_interval < Duration::from_millis(100));
        assert_eq!(config.simulation.deterministic_seed, Some(42));
        assert_eq!(config.access.download_dir, std::env::temp_dir());
    }

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = UndertowConfig::from_lookup(lookup_from(&[
            ("UNDERTOW_DOWNLOAD_DIR", "/srv/media"),
            ("UNDERTOW_FILE_INDEX", "2"),
            ("UNDERTOW_METADATA_TIMEOUT", "5"),
            ("UNDERTOW_FORWARD_WINDOW", " 8 "),
            ("UNDERTOW_SIMULATION_SEED", "7"),
            ("UNDERTOW_PIECE_TIMEOUT", ""),
        ]))
        .unwrap();

        assert_eq!(config.access.download_dir, PathBuf::from("/srv/media"));
        assert_eq!(config.access.file_index, Some(2));
        assert_eq!(config.access.metadata_timeout, Duration::from_secs(5));
        assert_eq!(config.access.piece_timeout, Duration::from_secs(60));
        assert_eq!(config.access.forward_window, 8);
        assert_eq!(config.simulation.deterministic_seed, Some(7));
    }

    #[test]
    fn test_unparseable_override_is_a_configuration_error() {
        let result =
            UndertowConfig::from_lookup(lookup_from(&[("UNDERTOW_PIECE_TIMEOUT", "soon")]));
        match result {
            Err(UndertowError::Configuration { reason }) => {
                assert!(reason.contains("UNDERTOW_PIECE_TIMEOUT"));
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_forward_window_is_rejected() {
        let result =
            UndertowConfig::from_lookup(lookup_from(&[("UNDERTOW_FORWARD_WINDOW", "0")]));
        let error = result.unwrap_err();
        assert!(error.is_user_error());
        assert!(error.user_message().contains("UNDERTOW_FORWARD_WINDOW"));
    }

    #[test]
    fn test_download_dir_is_never_empty() {
        assert!(!default_download_dir().as_os_str().is_empty());
    }
}
