//! Configuration for a sync session.

use crate::error::{SyncError, SyncResult};
use crate::estimator::EstimatorTuning;

/// Configuration for a [`SyncSession`](crate::SyncSession).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Persistent peer addresses (`host` or `host:port`) the engine should
    /// stay connected to. Empty means peer discovery is left to the engine.
    pub persistent_peers: Vec<String>,

    /// Default P2P port appended to persistent peer addresses given without
    /// one.
    pub default_port: u16,

    /// The chain's target seconds per block, used to estimate how many
    /// headers remain from a header timestamp.
    pub target_secs_per_block: i64,

    /// Estimation tuning values.
    pub tuning: EstimatorTuning,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            persistent_peers: vec![],
            default_port: 9108,
            target_secs_per_block: 300,
            tuning: EstimatorTuning::default(),
        }
    }
}

impl SyncConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.target_secs_per_block <= 0 {
            return Err(SyncError::InvalidState(
                "target_secs_per_block must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Normalize and validate the configured persistent peer addresses.
    ///
    /// Malformed addresses are skipped with a warning; if addresses were
    /// configured but none survives, returns
    /// [`SyncError::InvalidPeerAddress`] carrying the first bad address.
    pub fn resolve_persistent_peers(&self) -> SyncResult<Vec<String>> {
        if self.persistent_peers.is_empty() {
            return Ok(vec![]);
        }

        let mut valid = Vec::with_capacity(self.persistent_peers.len());
        for address in &self.persistent_peers {
            match normalize_peer_address(address, self.default_port) {
                Ok(normalized) => valid.push(normalized),
                Err(err) => {
                    tracing::error!("Persistent peer address ({}) is invalid: {}", address, err);
                }
            }
        }

        if valid.is_empty() {
            return Err(SyncError::InvalidPeerAddress(self.persistent_peers[0].clone()));
        }
        Ok(valid)
    }
}

/// Normalize a `host` or `host:port` address, appending the default port
/// when none is present.
pub fn normalize_peer_address(address: &str, default_port: u16) -> SyncResult<String> {
    let trimmed = address.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidPeerAddress(address.to_string()));
    }

    // Bracketed IPv6 literal, with or without a port.
    if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| SyncError::InvalidPeerAddress(address.to_string()))?;
        if host.parse::<std::net::Ipv6Addr>().is_err() {
            return Err(SyncError::InvalidPeerAddress(address.to_string()));
        }
        return match after.strip_prefix(':') {
            Some(port) => {
                port.parse::<u16>()
                    .map_err(|_| SyncError::InvalidPeerAddress(address.to_string()))?;
                Ok(trimmed.to_string())
            }
            None if after.is_empty() => Ok(format!("[{}]:{}", host, default_port)),
            None => Err(SyncError::InvalidPeerAddress(address.to_string())),
        };
    }

    // Bare IPv6 literal.
    if trimmed.parse::<std::net::Ipv6Addr>().is_ok() {
        return Ok(format!("[{}]:{}", trimmed, default_port));
    }

    match trimmed.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(SyncError::InvalidPeerAddress(address.to_string()));
            }
            port.parse::<u16>()
                .map_err(|_| SyncError::InvalidPeerAddress(address.to_string()))?;
            Ok(trimmed.to_string())
        }
        None => Ok(format!("{}:{}", trimmed, default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_appends_default_port() {
        assert_eq!(normalize_peer_address("seed.example.org", 9108).unwrap(), "seed.example.org:9108");
        assert_eq!(normalize_peer_address("10.0.0.2:19108", 9108).unwrap(), "10.0.0.2:19108");
    }

    #[test]
    fn test_normalize_ipv6() {
        assert_eq!(normalize_peer_address("::1", 9108).unwrap(), "[::1]:9108");
        assert_eq!(normalize_peer_address("[::1]:19108", 9108).unwrap(), "[::1]:19108");
        assert_eq!(normalize_peer_address("[::1]", 9108).unwrap(), "[::1]:9108");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_peer_address("", 9108).is_err());
        assert!(normalize_peer_address("host:notaport", 9108).is_err());
        assert!(normalize_peer_address(":9108", 9108).is_err());
    }

    #[test]
    fn test_resolve_skips_bad_keeps_good() {
        let config = SyncConfig {
            persistent_peers: vec!["bad:port".to_string(), "good.example.org".to_string()],
            ..SyncConfig::default()
        };
        let peers = config.resolve_persistent_peers().unwrap();
        assert_eq!(peers, vec!["good.example.org:9108".to_string()]);
    }

    #[test]
    fn test_resolve_fails_when_all_invalid() {
        let config = SyncConfig {
            persistent_peers: vec!["bad:port".to_string()],
            ..SyncConfig::default()
        };
        assert!(matches!(
            config.resolve_persistent_peers(),
            Err(SyncError::InvalidPeerAddress(_))
        ));
    }

    #[test]
    fn test_resolve_empty_config_is_empty() {
        assert!(SyncConfig::default().resolve_persistent_peers().unwrap().is_empty());
    }
}
