use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use std::{fs, str::FromStr};

use yaml_rust::{Yaml, YamlLoader};

use crate::error::ConfigError;
use crate::paxos::proposer::ProposerSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Proposer,
    Acceptor,
    Learner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Proposer => "proposer",
            Role::Acceptor => "acceptor",
            Role::Learner => "learner",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proposer" => Ok(Role::Proposer),
            "acceptor" => Ok(Role::Acceptor),
            "learner" => Ok(Role::Learner),
            other => Err(ConfigError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub node_id: u64,
    pub address: String,
    pub role: Role,
}

impl Node {
    /// Identity used on the wire, e.g. `acceptor-2`.
    pub fn name(&self) -> String {
        format!("{}-{}", self.role, self.node_id)
    }
}

/// Settings shared by every node of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub log_level: String,
    pub prepare_timeout_ms: u64,
    pub accept_timeout_ms: u64,
    pub learn_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_min_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            log_level: "info".to_string(),
            prepare_timeout_ms: 1000,
            accept_timeout_ms: 1000,
            learn_timeout_ms: 500,
            max_retries: 5,
            backoff_min_ms: 10,
            backoff_max_ms: 200,
        }
    }
}

impl RunConfig {
    pub fn proposer_settings(&self) -> ProposerSettings {
        ProposerSettings {
            prepare_timeout: Duration::from_millis(self.prepare_timeout_ms),
            accept_timeout: Duration::from_millis(self.accept_timeout_ms),
            max_retries: self.max_retries,
            backoff_min: Duration::from_millis(self.backoff_min_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
        }
    }

    pub fn learn_timeout(&self) -> Duration {
        Duration::from_millis(self.learn_timeout_ms)
    }

    fn from_yaml(r: &Yaml) -> Result<Self, ConfigError> {
        let defaults = RunConfig::default();
        let log_level = match &r["log_level"] {
            Yaml::BadValue | Yaml::Null => defaults.log_level,
            Yaml::String(level) => match level.as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => level.clone(),
                other => {
                    return Err(ConfigError::Invalid {
                        field: "log_level".to_string(),
                        reason: format!("`{}` is not one of trace, debug, info, warn, error", other),
                    })
                }
            },
            other => return Err(invalid("log_level", "a string", other)),
        };
        let max_retries = optional_u64(r, "max_retries", defaults.max_retries as u64)?;

        let run = RunConfig {
            log_level,
            prepare_timeout_ms: optional_u64(r, "prepare_timeout_ms", defaults.prepare_timeout_ms)?,
            accept_timeout_ms: optional_u64(r, "accept_timeout_ms", defaults.accept_timeout_ms)?,
            learn_timeout_ms: optional_u64(r, "learn_timeout_ms", defaults.learn_timeout_ms)?,
            max_retries: u32::try_from(max_retries).map_err(|_| ConfigError::Invalid {
                field: "max_retries".to_string(),
                reason: format!("{} does not fit in 32 bits", max_retries),
            })?,
            backoff_min_ms: optional_u64(r, "backoff_min_ms", defaults.backoff_min_ms)?,
            backoff_max_ms: optional_u64(r, "backoff_max_ms", defaults.backoff_max_ms)?,
        };

        // An acceptor answers an accept only after its learner fan-out settles.
        if run.learn_timeout_ms >= run.accept_timeout_ms {
            return Err(ConfigError::Invalid {
                field: "learn_timeout_ms".to_string(),
                reason: format!(
                    "{} must be below accept_timeout_ms ({})",
                    run.learn_timeout_ms, run.accept_timeout_ms
                ),
            });
        }
        Ok(run)
    }
}

fn invalid(field: &str, expected: &str, got: &Yaml) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: format!("expected {}, got {:?}", expected, got),
    }
}

fn optional_u64(section: &Yaml, field: &str, default: u64) -> Result<u64, ConfigError> {
    match &section[field] {
        Yaml::BadValue | Yaml::Null => Ok(default),
        Yaml::Integer(v) if *v >= 0 => Ok(*v as u64),
        other => Err(invalid(field, "a non-negative integer", other)),
    }
}

/// The whole, fixed membership of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    pub nodes: Vec<Node>,
    pub run_config: RunConfig,
}

impl ClusterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&s)
    }

    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let docs = YamlLoader::load_from_str(s)?;
        let doc = docs.first().ok_or(ConfigError::Empty)?;

        let raw = doc["nodes"]
            .as_vec()
            .ok_or_else(|| ConfigError::Missing("nodes".to_string()))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(raw.len());
        for e in raw {
            let node_id = match &e["node_id"] {
                Yaml::Integer(id) if *id >= 0 => *id as u64,
                Yaml::BadValue => return Err(ConfigError::Missing("nodes[].node_id".to_string())),
                other => return Err(invalid("node_id", "a non-negative integer", other)),
            };
            let address = e["address"]
                .as_str()
                .filter(|a| !a.is_empty())
                .ok_or_else(|| ConfigError::Missing(format!("address of node {}", node_id)))?
                .to_string();
            let role = e["role"]
                .as_str()
                .ok_or_else(|| ConfigError::Missing(format!("role of node {}", node_id)))?
                .parse::<Role>()?;

            if !seen.insert(node_id) {
                return Err(ConfigError::Invalid {
                    field: "node_id".to_string(),
                    reason: format!("{} appears more than once", node_id),
                });
            }
            nodes.push(Node {
                node_id,
                address,
                role,
            });
        }

        let run_config = RunConfig::from_yaml(&doc["run_config"])?;
        Ok(ClusterConfig { nodes, run_config })
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    /// Splits out the settings of one node.
    pub fn for_node(self, this_id: u64) -> Result<Config, ConfigError> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.node_id == this_id)
            .cloned()
            .ok_or(ConfigError::UnknownNode(this_id))?;
        let remote_nodes = self
            .nodes
            .into_iter()
            .filter(|n| n.node_id != this_id)
            .collect();

        Ok(Config {
            node,
            remote_nodes,
            run_config: self.run_config,
        })
    }
}

/// What a single node needs to run its role.
#[derive(Debug, Clone)]
pub struct Config {
    pub node: Node,
    pub remote_nodes: Vec<Node>,
    pub run_config: RunConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P, this_id: u64) -> Result<Self, ConfigError> {
        ClusterConfig::load(path)?.for_node(this_id)
    }

    pub fn peers(&self, role: Role) -> Vec<&Node> {
        self.remote_nodes.iter().filter(|n| n.role == role).collect()
    }

    /// Acceptors in the cluster, counting this node if it is one.
    pub fn num_acceptors(&self) -> usize {
        let local = usize::from(self.node.role == Role::Acceptor);
        self.peers(Role::Acceptor).len() + local
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CLUSTER: &str = "
nodes:
  - node_id: 1
    address: 127.0.0.1:8881
    role: proposer
  - node_id: 2
    address: 127.0.0.1:8882
    role: acceptor
  - node_id: 3
    address: 127.0.0.1:8883
    role: acceptor
  - node_id: 4
    address: 127.0.0.1:8884
    role: acceptor
  - node_id: 5
    address: 127.0.0.1:8885
    role: learner
run_config:
  log_level: debug
  prepare_timeout_ms: 250
  max_retries: 2
";

    #[test]
    fn loads_nodes_and_run_config_from_file() {
        let mut file = NamedTempFile::new().expect("failed to create temp file");
        file.write_all(CLUSTER.as_bytes()).unwrap();

        let cfg = Config::load(file.path(), 3).expect("config should load");
        assert_eq!(cfg.node.role, Role::Acceptor);
        assert_eq!(cfg.node.name(), "acceptor-3");
        assert_eq!(cfg.remote_nodes.len(), 4);
        assert_eq!(cfg.peers(Role::Acceptor).len(), 2);
        assert_eq!(cfg.num_acceptors(), 3);
        assert_eq!(cfg.peers(Role::Learner)[0].address, "127.0.0.1:8885");

        let run = &cfg.run_config;
        assert_eq!(run.log_level, "debug");
        assert_eq!(run.prepare_timeout_ms, 250);
        assert_eq!(run.max_retries, 2);
        assert_eq!(
            run.accept_timeout_ms,
            RunConfig::default().accept_timeout_ms,
            "unset fields fall back to defaults"
        );
    }

    #[test]
    fn missing_run_config_uses_defaults() {
        let cluster = ClusterConfig::from_yaml_str(
            "nodes:\n  - node_id: 1\n    address: a:1\n    role: learner\n",
        )
        .unwrap();
        assert_eq!(cluster.run_config, RunConfig::default());
        assert_eq!(cluster.with_role(Role::Learner).count(), 1);
    }

    #[test]
    fn rejects_bad_configs() {
        let unknown_role = "nodes:\n  - node_id: 1\n    address: a:1\n    role: leader\n";
        assert!(matches!(
            ClusterConfig::from_yaml_str(unknown_role),
            Err(ConfigError::UnknownRole(r)) if r == "leader"
        ));

        let duplicate = "nodes:\n  - node_id: 1\n    address: a:1\n    role: learner\n  - node_id: 1\n    address: a:2\n    role: acceptor\n";
        assert!(matches!(
            ClusterConfig::from_yaml_str(duplicate),
            Err(ConfigError::Invalid { .. })
        ));

        let bad_timeout = "nodes: []\nrun_config:\n  accept_timeout_ms: soon\n";
        assert!(matches!(
            ClusterConfig::from_yaml_str(bad_timeout),
            Err(ConfigError::Invalid { field, .. }) if field == "accept_timeout_ms"
        ));

        assert!(matches!(
            ClusterConfig::from_yaml_str("run_config: {}\n"),
            Err(ConfigError::Missing(_))
        ));
        assert!(matches!(ClusterConfig::from_yaml_str(""), Err(ConfigError::Empty)));
    }

    #[test]
    fn learn_timeout_must_undercut_accept_timeout() {
        let defaults = RunConfig::default();
        assert!(defaults.learn_timeout_ms < defaults.accept_timeout_ms);

        let equal = "nodes: []\nrun_config:\n  accept_timeout_ms: 800\n  learn_timeout_ms: 800\n";
        assert!(matches!(
            ClusterConfig::from_yaml_str(equal),
            Err(ConfigError::Invalid { field, .. }) if field == "learn_timeout_ms"
        ));

        let lower_accept = "nodes: []\nrun_config:\n  accept_timeout_ms: 400\n";
        assert!(
            ClusterConfig::from_yaml_str(lower_accept).is_err(),
            "the default learn timeout no longer fits under a 400ms accept timeout"
        );

        let ok = "nodes: []\nrun_config:\n  accept_timeout_ms: 800\n  learn_timeout_ms: 300\n";
        let run = ClusterConfig::from_yaml_str(ok).unwrap().run_config;
        assert_eq!(run.learn_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn unknown_node_is_an_error() {
        let cluster = ClusterConfig::from_yaml_str(CLUSTER).unwrap();
        assert!(matches!(cluster.for_node(42), Err(ConfigError::UnknownNode(42))));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ClusterConfig::load("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.yaml"));
    }
}
