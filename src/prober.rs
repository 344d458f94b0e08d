//! Per-node probing.
//!
//! A probe walks a fixed sequence of dependent remote commands against a
//! single node:
//!
//! 1. list the services registered with the local discovery agent,
//! 2. find the management service among them,
//! 3. list the dockyards known to the management service,
//! 4. read load averages, memory statistics and the CPU count through
//!    the management container.
//!
//! Each step needs the previous one's output, so the steps run strictly
//! in order.  The first failing step ends the probe; whatever was learned
//! so far stays on the [`NodeRecord`] next to the error.

use std::sync::Arc;

use log::{debug, warn};

use crate::command::{FleetLayout, LOCAL_SERVICES};
use crate::error::{Failure, ParseError, ProbeError};
use crate::parse;
use crate::transport::{CommandChannel, SessionTarget};
use crate::types::{LoadSample, NodeDescriptor, NodeRecord, RegistryEntry, RunningService};

pub struct NodeProber {
    channel: Arc<dyn CommandChannel>,
    layout: FleetLayout,
}

impl NodeProber {
    pub fn new(channel: Arc<dyn CommandChannel>, layout: FleetLayout) -> Self {
        Self { channel, layout }
    }

    /// Probe `node` through `target`.  Never fails: errors end up in the
    /// record's `error` field.
    pub async fn probe(&self, target: &SessionTarget, node: NodeDescriptor) -> NodeRecord {
        let mut record = NodeRecord::pending(node);
        match self.fill(target, &mut record).await {
            Ok(()) => debug!("Probe of {} complete", record.node.address),
            Err(e) => {
                warn!("Probe of {} failed: {}", record.node.address, e);
                record.error = Some(Failure::from(&e));
            }
        }
        record
    }

    async fn fill(&self, target: &SessionTarget, record: &mut NodeRecord) -> Result<(), ProbeError> {
        let services = self.list_services(target).await?;
        let management = self.find_management(&services).cloned();
        record.services = Some(services);

        let management = management.ok_or_else(|| ProbeError::MissingManagementService {
            name: self.layout.management_service.clone(),
        })?;
        let container_id = management
            .container_id
            .clone()
            .ok_or_else(|| ParseError::MissingField {
                service: management.name.clone(),
                field: "container_id",
            })?;
        record.management_service = Some(management);

        record.registries = Some(self.list_registries(target, &container_id).await?);
        record.load = Some(self.collect_load(target, &container_id).await?);
        Ok(())
    }

    fn find_management<'a>(&self, services: &'a [RunningService]) -> Option<&'a RunningService> {
        services
            .iter()
            .find(|s| s.name == self.layout.management_service)
    }

    async fn run(&self, target: &SessionTarget, command: &str) -> Result<String, ProbeError> {
        let result = self.channel.execute(target, command).await?;
        debug!("[{}] {:?} exited {}", target.host, command, result.exit_code);
        Ok(result.stdout)
    }

    async fn run_in_container(
        &self,
        target: &SessionTarget,
        container_id: &str,
        command: &str,
    ) -> Result<String, ProbeError> {
        let wrapped = self.layout.containerized(container_id, command);
        self.run(target, &wrapped).await
    }

    async fn list_services(&self, target: &SessionTarget) -> Result<Vec<RunningService>, ProbeError> {
        let stdout = self.run(target, LOCAL_SERVICES).await?;
        Ok(parse::service_listing(&stdout)?)
    }

    async fn list_registries(
        &self,
        target: &SessionTarget,
        container_id: &str,
    ) -> Result<Vec<RegistryEntry>, ProbeError> {
        let stdout = self
            .run_in_container(target, container_id, &self.layout.registry_listing())
            .await?;
        Ok(parse::registry_listing(&stdout)?)
    }

    async fn collect_load(
        &self,
        target: &SessionTarget,
        container_id: &str,
    ) -> Result<LoadSample, ProbeError> {
        let loadavg = self
            .run_in_container(target, container_id, &self.layout.load_average())
            .await?;
        let averages = parse::load_average(&loadavg)?;

        let meminfo = self
            .run_in_container(target, container_id, &self.layout.memory_info())
            .await?;
        let memory = parse::memory_info(&meminfo)?;

        let cpus = self
            .run_in_container(target, container_id, &self.layout.cpu_count())
            .await?;
        let cpu_count = parse::cpu_count(&cpus)?;

        Ok(LoadSample::from_parts(averages, memory, cpu_count))
    }
}
