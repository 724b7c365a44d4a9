//! Configuration
//!
//! Loaded from TOML; every field has a default so an empty file is a valid
//! three-node setup (`node1` central, `node2` movies, `node3` non-movies).
//!
//! ```toml
//! [[nodes]]
//! id = "node1"
//! role = "central"
//! capacity = 8
//!
//! [[nodes]]
//! id = "node2"
//! role = "fragment"
//! partition = "movies"
//!
//! [scenario]
//! write_hold_ms = 300
//! blocking_threshold_ms = 50
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::topology::{NodeId, NodeRole, NodeSpec, Partition, Topology};

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that was requested
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The values are inconsistent.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong
        reason: String,
    },
}

/// Node role as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleConfig {
    /// Full dataset
    Central,
    /// Partitioned subset
    Fragment,
}

/// One `[[nodes]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identity
    pub id: String,
    /// Central or fragment
    pub role: RoleConfig,
    /// Required for fragments
    #[serde(default)]
    pub partition: Option<Partition>,
    /// Maximum concurrent sessions
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    8
}

/// `[pool]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// How long `acquire` waits for a permit; 0 fails fast.
    pub acquire_timeout_ms: u64,
    /// Extra connect attempts after the first failure.
    pub connect_retries: u32,
    /// Delay between connect attempts.
    pub connect_retry_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 1_000,
            connect_retries: 2,
            connect_retry_delay_ms: 100,
        }
    }
}

impl PoolConfig {
    /// Permit wait bound; `None` means fail fast.
    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }

    /// Delay between connect attempts.
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

/// `[scenario]` section: timing of runs and classification thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Global deadline for one run.
    pub scenario_timeout_ms: u64,
    /// How long a writer keeps its transaction open after the update.
    pub write_hold_ms: u64,
    /// Offset at which readers begin and issue `read1`.
    pub reader_start_ms: u64,
    /// Offset at which readers issue `read2`.
    pub read2_at_ms: u64,
    /// Time a concurrent-read actor holds its transaction after reading.
    pub concurrent_read_hold_ms: u64,
    /// A read slower than this counts as blocked.
    pub blocking_threshold_ms: u64,
    /// Default readers per node for read-write runs.
    pub readers_per_node: u32,
    /// Default writers per node for read-write runs.
    pub writers_per_node: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            scenario_timeout_ms: 10_000,
            write_hold_ms: 300,
            reader_start_ms: 100,
            read2_at_ms: 400,
            concurrent_read_hold_ms: 100,
            blocking_threshold_ms: 50,
            readers_per_node: 1,
            writers_per_node: 1,
        }
    }
}

impl ScenarioConfig {
    /// Global run deadline.
    pub fn scenario_timeout(&self) -> Duration {
        Duration::from_millis(self.scenario_timeout_ms)
    }

    /// Read latency above which a reader is classified as blocked.
    pub fn blocking_threshold(&self) -> Duration {
        Duration::from_millis(self.blocking_threshold_ms)
    }

    /// Hold time for concurrent-read actors.
    pub fn concurrent_read_hold(&self) -> Duration {
        Duration::from_millis(self.concurrent_read_hold_ms)
    }
}

/// `[engine]` section for the in-process node engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a transaction waits for a row lock before a conflict.
    pub lock_wait_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_wait_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Lock wait bound.
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
    /// Optional JSON array of rows to seed nodes with at startup
    pub seed_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:5000".to_string(),
            seed_file: None,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Cluster layout
    pub nodes: Vec<NodeConfig>,
    /// Session pool behavior
    pub pool: PoolConfig,
    /// Scenario timing and thresholds
    pub scenario: ScenarioConfig,
    /// In-process engine settings
    pub engine: EngineConfig,
    /// HTTP server settings
    pub server: ServerConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            nodes: vec![
                NodeConfig {
                    id: "node1".into(),
                    role: RoleConfig::Central,
                    partition: None,
                    capacity: default_capacity(),
                },
                NodeConfig {
                    id: "node2".into(),
                    role: RoleConfig::Fragment,
                    partition: Some(Partition::Movies),
                    capacity: default_capacity(),
                },
                NodeConfig {
                    id: "node3".into(),
                    role: RoleConfig::Fragment,
                    partition: Some(Partition::NonMovies),
                    capacity: default_capacity(),
                },
            ],
            pool: PoolConfig::default(),
            scenario: ScenarioConfig::default(),
            engine: EngineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ProbeConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ProbeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if self.nodes.is_empty() {
            return invalid("at least one node is required".into());
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.id.trim().is_empty() {
                return invalid("node id must not be empty".into());
            }
            if !seen.insert(node.id.as_str()) {
                return invalid(format!("duplicate node id '{}'", node.id));
            }
            if node.capacity == 0 {
                return invalid(format!("node '{}' has zero capacity", node.id));
            }
            if node.role == RoleConfig::Fragment && node.partition.is_none() {
                return invalid(format!("fragment node '{}' needs a partition", node.id));
            }
        }
        if !self.nodes.iter().any(|n| n.role == RoleConfig::Central) {
            return invalid("a central node is required".into());
        }
        if self.scenario.read2_at_ms < self.scenario.reader_start_ms {
            return invalid("scenario.read2_at_ms must not precede reader_start_ms".into());
        }
        if self.scenario.readers_per_node == 0 || self.scenario.writers_per_node == 0 {
            return invalid("default reader and writer counts must be positive".into());
        }
        if self.scenario.scenario_timeout_ms == 0 {
            return invalid("scenario_timeout_ms must be positive".into());
        }
        Ok(())
    }

    /// Cluster topology described by `nodes`.
    pub fn topology(&self) -> Topology {
        Topology::new(
            self.nodes
                .iter()
                .map(|n| NodeSpec {
                    id: NodeId::new(n.id.clone()),
                    role: match (n.role, n.partition) {
                        (RoleConfig::Fragment, Some(p)) => NodeRole::Fragment(p),
                        _ => NodeRole::Central,
                    },
                    capacity: n.capacity,
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_is_default_cluster() {
        let config = ProbeConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProbeConfig::default());
        let topo = config.topology();
        assert_eq!(topo.nodes().len(), 3);
        assert_eq!(topo.central().unwrap().id, NodeId::from("node1"));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ProbeConfig::from_toml_str(
            r#"
            [scenario]
            write_hold_ms = 500
            read2_at_ms = 700

            [pool]
            acquire_timeout_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.scenario.write_hold_ms, 500);
        assert_eq!(config.scenario.reader_start_ms, 100);
        assert_eq!(config.pool.acquire_timeout(), None);
        assert_eq!(config.pool.connect_retries, 2);
    }

    #[test]
    fn fragment_without_partition_is_rejected() {
        let err = ProbeConfig::from_toml_str(
            r#"
            [[nodes]]
            id = "a"
            role = "central"

            [[nodes]]
            id = "b"
            role = "fragment"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs a partition"));
    }

    #[test]
    fn duplicate_ids_and_missing_central_are_rejected() {
        let dup = ProbeConfig::from_toml_str(
            r#"
            [[nodes]]
            id = "a"
            role = "central"

            [[nodes]]
            id = "a"
            role = "central"
            "#,
        )
        .unwrap_err();
        assert!(dup.to_string().contains("duplicate node id"));

        let no_central = ProbeConfig::from_toml_str(
            r#"
            [[nodes]]
            id = "b"
            role = "fragment"
            partition = "movies"
            "#,
        )
        .unwrap_err();
        assert!(no_central.to_string().contains("central node is required"));
    }

    #[test]
    fn schedule_order_is_checked() {
        let err = ProbeConfig::from_toml_str(
            r#"
            [scenario]
            reader_start_ms = 500
            read2_at_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [[nodes]]
            id = "central"
            role = "central"
            capacity = 2

            [server]
            listen = "0.0.0.0:8080"
            "#
        )
        .unwrap();
        let config = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].capacity, 2);
        assert_eq!(config.server.listen, "0.0.0.0:8080");
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = ProbeConfig::from_toml_str(include_str!("../../../isoprobe.toml")).unwrap();
        let expected = ProbeConfig {
            server: ServerConfig {
                seed_file: Some(PathBuf::from("data/titles.json")),
                ..ServerConfig::default()
            },
            ..ProbeConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ProbeConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
