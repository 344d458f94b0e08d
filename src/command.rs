//! Remote command strings understood by cluster nodes.

use serde::{Deserialize, Serialize};

/// Consul catalog of cluster members, queried on the cluster entry host.
pub const NODE_CATALOG: &str = "curl http://localhost:8500/v1/catalog/nodes";

/// Services registered with the node-local discovery agent.
pub const LOCAL_SERVICES: &str = "curl http://localhost:8900/list?local=1";

/// Names and paths that locate the fleet tooling on a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FleetLayout {
    /// Fleet-control binary available on every node.
    pub fleet_binary: String,
    /// Name under which the management service registers itself.
    pub management_service: String,
    /// Prefix under which the host's `/proc` is visible inside the
    /// management container.
    pub proc_root: String,
}

impl Default for FleetLayout {
    fn default() -> Self {
        Self {
            fleet_binary: "armada".into(),
            management_service: "armada".into(),
            proc_root: "/host".into(),
        }
    }
}

impl FleetLayout {
    /// Wrap `command` so it runs inside the container `container_id`.
    pub fn containerized(&self, container_id: &str, command: &str) -> String {
        containerized(&self.fleet_binary, container_id, command)
    }

    pub fn registry_listing(&self) -> String {
        format!("{} dockyard list", self.fleet_binary)
    }

    pub fn load_average(&self) -> String {
        format!("cat {}/proc/loadavg", self.proc_root)
    }

    pub fn memory_info(&self) -> String {
        format!("cat {}/proc/meminfo", self.proc_root)
    }

    pub fn cpu_count(&self) -> String {
        format!("grep \"^processor\" {}/proc/cpuinfo | wc -l", self.proc_root)
    }
}

pub fn containerized(fleet_binary: &str, container_id: &str, command: &str) -> String {
    format!("{} ssh {} {}", fleet_binary, container_id, command)
}

/// Quote `word` for a POSIX shell unless it is made of safe characters.
pub fn shell_word(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
