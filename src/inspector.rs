//! Cluster-wide inspection.
//!
//! The node catalog is read through the cluster's entry host, then one
//! [`NodeProber`] per node runs concurrently.  The number of open
//! sessions is bounded by a semaphore and the whole run by a deadline.
//! Completion is tracked by counting finished probes; the report is
//! written only by the collecting task, never by the probes themselves.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use log::{error, info, warn};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};

use crate::command::{FleetLayout, NODE_CATALOG};
use crate::config::ClusterConfigProvider;
use crate::error::{Failure, FailureKind, InspectError};
use crate::parse;
use crate::prober::NodeProber;
use crate::transport::{CommandChannel, SessionTarget};
use crate::types::{ClusterConnection, ClusterReport, NodeDescriptor, NodeRecord};

#[derive(Debug, Clone, Copy)]
pub struct InspectLimits {
    pub max_sessions: usize,
    pub deadline: Duration,
}

pub struct ClusterInspector {
    channel: Arc<dyn CommandChannel>,
    prober: Arc<NodeProber>,
    limits: InspectLimits,
}

/// Result of inspecting one cluster, labelled with the cluster's name.
#[derive(Debug)]
pub struct ClusterOutcome {
    pub cluster: String,
    pub result: Result<ClusterReport, InspectError>,
}

impl Serialize for ClusterOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ClusterOutcome", 2)?;
        state.serialize_field("cluster", &self.cluster)?;
        match &self.result {
            Ok(report) => state.serialize_field("report", report)?,
            Err(e) => state.serialize_field("error", &e.to_string())?,
        }
        state.end()
    }
}

impl ClusterInspector {
    pub fn new(channel: Arc<dyn CommandChannel>, layout: FleetLayout, limits: InspectLimits) -> Self {
        let prober = Arc::new(NodeProber::new(Arc::clone(&channel), layout));
        Self {
            channel,
            prober,
            limits,
        }
    }

    /// Inspect every node reachable through `target`.
    ///
    /// Fails only when the catalog cannot be read or is inconsistent.
    /// Node-level failures are recorded on the node's entry.
    pub async fn inspect(&self, target: &SessionTarget) -> Result<ClusterReport, InspectError> {
        let catalog = self.channel.execute(target, NODE_CATALOG).await?;
        let nodes = parse::node_catalog(&catalog.stdout)?;

        let mut report = ClusterReport::default();
        let mut outstanding: HashMap<String, NodeDescriptor> = HashMap::with_capacity(nodes.len());
        for node in &nodes {
            if outstanding
                .insert(node.address.clone(), node.clone())
                .is_some()
            {
                return Err(InspectError::DuplicateNodeAddress(node.address.clone()));
            }
            report.insert(NodeRecord::pending(node.clone()));
        }

        let deadline = Instant::now() + self.limits.deadline;
        let sessions = Arc::new(Semaphore::new(self.limits.max_sessions));
        let mut probes = JoinSet::new();
        for node in nodes {
            let prober = Arc::clone(&self.prober);
            let sessions = Arc::clone(&sessions);
            let node_target = target.with_host(&node.address);
            probes.spawn(async move {
                // The semaphore is never closed.
                let _permit = sessions.acquire_owned().await.ok();
                prober.probe(&node_target, node).await
            });
        }

        let launched = probes.len();
        let mut finished = 0;
        let mut timed_out = false;
        let mut lost = Vec::new();
        while finished < launched {
            match timeout_at(deadline, probes.join_next()).await {
                Ok(Some(Ok(record))) => {
                    finished += 1;
                    outstanding.remove(&record.node.address);
                    report.insert(record);
                }
                Ok(Some(Err(e))) => {
                    finished += 1;
                    error!("Node probe task on {} aborted: {}", target.host, e);
                    lost.push(e.to_string());
                }
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    probes.abort_all();
                    break;
                }
            }
        }

        for (address, node) in outstanding {
            let failure = if timed_out {
                Failure::new(
                    FailureKind::Timeout,
                    format!(
                        "inspection deadline of {}s passed before the probe finished",
                        self.limits.deadline.as_secs()
                    ),
                )
            } else {
                Failure::new(
                    FailureKind::Aborted,
                    format!("probe task ended without a result: {}", lost.join("; ")),
                )
            };
            warn!("Node {}: {}", address, failure.message);
            let mut record = NodeRecord::pending(node);
            record.error = Some(failure);
            report.insert(record);
        }

        Ok(report)
    }

    /// Resolve credentials for `connection` and inspect it.
    pub async fn inspect_cluster(&self, connection: &ClusterConnection) -> ClusterOutcome {
        info!("Inspecting cluster {} via {}", connection.name, connection.host);
        let result = match SessionTarget::for_cluster(connection) {
            Ok(target) => self.inspect(&target).await,
            Err(e) => Err(InspectError::Credentials(e)),
        };
        match &result {
            Ok(report) if report.is_empty() => {
                warn!("Cluster {}: node catalog is empty", connection.name)
            }
            Ok(report) => info!(
                "Cluster {}: {} node(s), {} failed",
                connection.name,
                report.len(),
                report.failed().count()
            ),
            Err(e) => error!("Cluster {} inspection failed: {}", connection.name, e),
        }
        ClusterOutcome {
            cluster: connection.name.clone(),
            result,
        }
    }

    /// Inspect the named clusters (every configured one when `names` is
    /// empty) concurrently.  Outcomes keep the requested order.
    pub async fn inspect_all(
        &self,
        provider: &dyn ClusterConfigProvider,
        names: &[String],
    ) -> Vec<ClusterOutcome> {
        let selected: Vec<Result<&ClusterConnection, String>> = if names.is_empty() {
            provider.clusters().iter().map(Ok).collect()
        } else {
            names
                .iter()
                .map(|name| provider.cluster(name).ok_or_else(|| name.clone()))
                .collect()
        };

        join_all(selected.into_iter().map(|entry| async move {
            match entry {
                Ok(connection) => self.inspect_cluster(connection).await,
                Err(name) => {
                    error!("Cluster {} is not configured", name);
                    ClusterOutcome {
                        result: Err(InspectError::UnknownCluster(name.clone())),
                        cluster: name,
                    }
                }
            }
        }))
        .await
    }
}
