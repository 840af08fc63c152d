//! Daemon configuration file management.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Complete daemon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Ring endpoint settings.
    #[serde(default)]
    pub network: NetworkConfig,
    /// LAN rendezvous settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Ring credential settings.
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Advanced settings.
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Ring endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address this node binds and advertises. The node identifier is
    /// derived from `"<bind_ip>:<port>"`, so it must be reachable by peers.
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    /// Ring port; every node of a ring uses the same one.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Identifier bit length `m`. All peers in a ring must agree.
    #[serde(default = "default_id_bitlen")]
    pub id_bitlen: u8,
    /// Optional `ip:port` of a known member to join explicitly. When unset,
    /// the node relies on multicast discovery.
    #[serde(default)]
    pub seed: String,
}

/// LAN rendezvous configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Whether to run the multicast listener and announce on startup.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IPv4 multicast group.
    #[serde(default = "default_group")]
    pub group: String,
    /// Rendezvous port.
    #[serde(default = "default_discovery_port")]
    pub port: u16,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Empty = platform default.
    #[serde(default)]
    pub data_dir: String,
    /// Blob directory. Empty = `$data_dir/blobs`.
    #[serde(default)]
    pub blob_dir: String,
}

/// Ring credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Directory holding `cert.pem`, `key.sealed` and `password`.
    /// Empty = `$data_dir/credentials`.
    #[serde(default)]
    pub dir: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default value functions

fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    4321
}

fn default_id_bitlen() -> u8 {
    ostinato_types::DEFAULT_ID_BITLEN
}

fn default_true() -> bool {
    true
}

fn default_group() -> String {
    ostinato_ring::MULTICAST_GROUP.to_string()
}

fn default_discovery_port() -> u16 {
    ostinato_ring::MULTICAST_PORT
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: default_bind_ip(),
            port: default_port(),
            id_bitlen: default_id_bitlen(),
            seed: String::new(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: default_group(),
            port: default_discovery_port(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: String::new(),
            blob_dir: String::new(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self { dir: String::new() }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location.
    ///
    /// Falls back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Get the data directory path.
    pub fn data_dir(&self) -> PathBuf {
        if self.storage.data_dir.is_empty() {
            Self::default_data_dir()
        } else {
            PathBuf::from(&self.storage.data_dir)
        }
    }

    /// Get the blob directory path.
    pub fn blob_dir(&self) -> PathBuf {
        if self.storage.blob_dir.is_empty() {
            self.data_dir().join("blobs")
        } else {
            PathBuf::from(&self.storage.blob_dir)
        }
    }

    /// Get the ring credentials directory path.
    pub fn credentials_dir(&self) -> PathBuf {
        if self.credentials.dir.is_empty() {
            self.data_dir().join("credentials")
        } else {
            PathBuf::from(&self.credentials.dir)
        }
    }

    /// The configured explicit-join seed, if any.
    pub fn seed_addr(&self) -> anyhow::Result<Option<SocketAddr>> {
        if self.network.seed.is_empty() {
            return Ok(None);
        }
        let addr = self
            .network
            .seed
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid seed address {:?}: {e}", self.network.seed))?;
        Ok(Some(addr))
    }

    /// Get the config file path.
    fn config_path() -> PathBuf {
        if let Ok(dir) = std::env::var("OSTINATO_DATA_DIR") {
            return PathBuf::from(dir).join("config.toml");
        }
        Self::default_data_dir().join("config.toml")
    }

    /// Platform-specific default data directory.
    fn default_data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("OSTINATO_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Ostinato")
        }
        #[cfg(not(target_os = "macos"))]
        {
            dirs_fallback(".ostinato")
        }
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/ostinato"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.port, 4321);
        assert_eq!(config.network.id_bitlen, 32);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.group, "224.0.0.1");
        assert_eq!(config.discovery.port, 2222);
        assert_eq!(config.advanced.log_level, "info");
        assert!(config.seed_addr().expect("parse").is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
    }

    #[test]
    fn test_seed_parsing() {
        let mut config = DaemonConfig::default();
        config.network.seed = "10.0.1.2:4321".to_string();
        let seed = config.seed_addr().expect("parse").expect("some");
        assert_eq!(seed.port(), 4321);

        config.network.seed = "not-an-address".to_string();
        assert!(config.seed_addr().is_err());
    }

    #[test]
    fn test_directory_defaults_derive_from_data_dir() {
        let mut config = DaemonConfig::default();
        config.storage.data_dir = "/var/lib/ostinato".to_string();
        assert_eq!(config.blob_dir(), PathBuf::from("/var/lib/ostinato/blobs"));
        assert_eq!(
            config.credentials_dir(),
            PathBuf::from("/var/lib/ostinato/credentials")
        );
    }
}
