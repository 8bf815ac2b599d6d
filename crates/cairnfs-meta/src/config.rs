//! Startup configuration for the metadata server.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogConfig;

/// Every tunable the control plane reads, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaConfig {
    /// Name this server logs under
    pub node_name: String,
    /// Address the control-message listener binds to
    pub listen_addr: String,
    /// Replicas per newly created file
    pub replication_factor: usize,
    /// Heartbeat silence after which a node is dead
    pub dead_node_threshold_ms: u64,
    /// Period of the recovery scan
    pub recovery_interval_ms: u64,
    /// Period of the background metadata save
    pub save_interval_ms: u64,
    /// Snapshot file for the file table
    pub file_metadata_path: PathBuf,
    /// Snapshot file for the node registry
    pub node_registry_path: PathBuf,
    /// Bound on each connect and request when dispatching replication commands
    pub dispatch_timeout_ms: u64,
    /// Logging settings
    pub log: LogConfig,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            node_name: String::from("cairn-meta"),
            listen_addr: String::from("0.0.0.0:7400"),
            replication_factor: 3,
            dead_node_threshold_ms: 30_000,
            recovery_interval_ms: 10_000,
            save_interval_ms: 60_000,
            file_metadata_path: PathBuf::from("/var/lib/cairnfs/file_metadata.bin"),
            node_registry_path: PathBuf::from("/var/lib/cairnfs/node_registry.bin"),
            dispatch_timeout_ms: 5_000,
            log: LogConfig::default(),
        }
    }
}

impl MetaConfig {
    /// Loads a `.toml` or `.json` file; missing keys take their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: MetaConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the algorithms cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.replication_factor == 0 {
            anyhow::bail!("replication_factor must be at least 1");
        }
        for (name, value) in [
            ("dead_node_threshold_ms", self.dead_node_threshold_ms),
            ("recovery_interval_ms", self.recovery_interval_ms),
            ("save_interval_ms", self.save_interval_ms),
            ("dispatch_timeout_ms", self.dispatch_timeout_ms),
        ] {
            if value == 0 {
                anyhow::bail!("{} must be greater than zero", name);
            }
        }
        Ok(())
    }

    /// Dead-node threshold as a Duration.
    pub fn dead_node_threshold(&self) -> Duration {
        Duration::from_millis(self.dead_node_threshold_ms)
    }

    /// Recovery scan period as a Duration.
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    /// Background save period as a Duration.
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }

    /// Dispatch bound as a Duration.
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let config = MetaConfig::default();
        assert_eq!(config.replication_factor, 3);
        assert_eq!(config.dead_node_threshold(), Duration::from_secs(30));
        assert_eq!(config.recovery_interval(), Duration::from_secs(10));
        assert_eq!(config.save_interval(), Duration::from_secs(60));
        assert_eq!(config.log.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_toml() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
node_name = "meta-a"
listen_addr = "127.0.0.1:7500"
replication_factor = 2
dead_node_threshold_ms = 5000
file_metadata_path = "/tmp/cairn/files.bin"

[log]
level = "debug"
json_format = true
            "#
        )
        .unwrap();

        let config = MetaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.node_name, "meta-a");
        assert_eq!(config.listen_addr, "127.0.0.1:7500");
        assert_eq!(config.replication_factor, 2);
        assert_eq!(config.dead_node_threshold(), Duration::from_secs(5));
        assert_eq!(config.file_metadata_path, PathBuf::from("/tmp/cairn/files.bin"));
        assert_eq!(config.recovery_interval_ms, 10_000);
        assert_eq!(config.log.level, "debug");
        assert!(config.log.json_format);
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(
            file,
            r#"{{
                "replication_factor": 1,
                "recovery_interval_ms": 250,
                "node_registry_path": "/test/nodes.bin"
            }}"#
        )
        .unwrap();

        let config = MetaConfig::from_file(file.path()).unwrap();
        assert_eq!(config.replication_factor, 1);
        assert_eq!(config.recovery_interval(), Duration::from_millis(250));
        assert_eq!(config.node_registry_path, PathBuf::from("/test/nodes.bin"));
        assert_eq!(config.dead_node_threshold_ms, 30_000);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".yaml").unwrap();
        let err = MetaConfig::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported"));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = MetaConfig {
            replication_factor: 0,
            ..MetaConfig::default()
        };
        assert!(config.validate().is_err());

        let config = MetaConfig {
            recovery_interval_ms: 0,
            ..MetaConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("recovery_interval_ms"));
    }

    #[test]
    fn test_invalid_file_rejected_by_validate() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "replication_factor = 0").unwrap();
        assert!(MetaConfig::from_file(file.path()).is_err());
    }
}
