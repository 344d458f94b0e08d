//! Data structures shared by the transport, the probes and the reports.
//!
//! Everything that ends up in operator-facing output derives
//! [`Serialize`]; the node maps are [`BTreeMap`]s so that the rendered
//! JSON is stable for a given set of node addresses.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Failure;

fn default_ssh_port() -> u16 {
    22
}

/// Connection parameters for one cluster.
///
/// Supplied by configuration and never mutated afterwards.  Probes of
/// the cluster's nodes reuse the port, username and authentication with
/// each node's own address.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ClusterConnection {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(flatten)]
    pub auth: Auth,
}

/// How to authenticate an SSH session.
#[derive(Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Auth {
    Password {
        password: String,
    },
    PrivateKey {
        private_key: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
}

// Secrets stay out of logs.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Password { .. } => f.write_str("Password(***)"),
            Auth::PrivateKey { private_key, .. } => {
                write!(f, "PrivateKey({})", private_key.display())
            }
        }
    }
}

/// Outcome of one remote command that exited with status zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub stdout: String,
    pub exit_code: u32,
}

/// A cluster member as reported by the node catalog.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct NodeDescriptor {
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
impl NodeDescriptor {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            metadata: Map::new(),
        }
    }
}

/// A service instance running on a node, from local service discovery.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunningService {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

/// One row of the management service's registry listing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RegistryEntry {
    pub alias: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub is_default: bool,
}

/// Load averages and memory statistics of a node.  Memory is in kB.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LoadSample {
    pub average_load_1: f64,
    pub average_load_5: f64,
    pub average_load_15: f64,
    pub total_memory_kb: u64,
    pub free_memory_kb: u64,
    pub used_memory_kb: u64,
    pub available_memory_kb: u64,
    pub buffers_kb: u64,
    pub cached_memory_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
    pub swap_used_kb: u64,
    pub cpu_count: u64,
}

/// Everything learned about one node during an inspection.
///
/// Fields are filled in probe order.  When a step fails the remaining
/// fields stay `None` and `error` records why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeRecord {
    pub node: NodeDescriptor,
    pub services: Option<Vec<RunningService>>,
    pub management_service: Option<RunningService>,
    pub registries: Option<Vec<RegistryEntry>>,
    pub load: Option<LoadSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Failure>,
}

impl NodeRecord {
    /// An empty slot for a node that has not been probed yet.
    pub fn pending(node: NodeDescriptor) -> Self {
        Self {
            node,
            services: None,
            management_service: None,
            registries: None,
            load: None,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Node records of one cluster keyed by node address.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ClusterReport {
    nodes: BTreeMap<String, NodeRecord>,
}

impl ClusterReport {
    pub fn insert(&mut self, record: NodeRecord) {
        self.nodes.insert(record.node.address.clone(), record);
    }

    #[cfg(test)]
    pub fn get(&self, address: &str) -> Option<&NodeRecord> {
        self.nodes.get(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.values()
    }

    pub fn failed(&self) -> impl Iterator<Item = &NodeRecord> {
        self.records().filter(|r| r.is_failed())
    }
}

fn default_instances() -> u32 {
    1
}

/// A declarative request to start instances of a service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub service_name: Option<String>,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub dockyard_alias: Option<String>,
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub memory_swap_limit: Option<String>,
    #[serde(default)]
    pub rename_to: Option<String>,
    #[serde(default = "default_instances")]
    pub instances: u32,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            service_name: None,
            env: None,
            app_id: None,
            dockyard_alias: None,
            memory_limit: None,
            memory_swap_limit: None,
            rename_to: None,
            instances: default_instances(),
        }
    }
}

#[cfg(test)]
impl ServiceSpec {
    pub fn named(service_name: impl Into<String>) -> Self {
        Self {
            service_name: Some(service_name.into()),
            ..Self::default()
        }
    }
}
