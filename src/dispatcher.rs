//! Service deployment.
//!
//! Each [`ServiceSpec`] becomes one `run` command of the fleet-control
//! binary, issued once per requested instance.  Every issued command
//! yields a [`DispatchOutcome`]; nothing is fire-and-forget.

use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use crate::command::shell_word;
use crate::error::{DispatchError, Failure};
use crate::transport::{CommandChannel, SessionTarget};
use crate::types::ServiceSpec;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchStatus {
    Started { output: String },
    Failed { error: Failure },
}

/// What happened to one instance of one spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchOutcome {
    pub service: Option<String>,
    /// 1-based; absent when the spec was rejected before anything ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub status: DispatchStatus,
}

impl DispatchOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self.status, DispatchStatus::Started { .. })
    }
}

/// Build the `run` command for `spec`.  Optional flags appear only when
/// set, always in the order env, app id, dockyard, memory, memory-swap,
/// rename.
pub fn run_command(fleet_binary: &str, spec: &ServiceSpec) -> Result<String, DispatchError> {
    let name = spec
        .service_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| DispatchError::Validation("serviceName is required".into()))?;
    if spec.instances == 0 {
        return Err(DispatchError::Validation(format!(
            "instances for {} must be at least 1",
            name
        )));
    }

    let flags = [
        ("--env", &spec.env),
        ("--app_id", &spec.app_id),
        ("-d", &spec.dockyard_alias),
        ("--memory", &spec.memory_limit),
        ("--memory-swap", &spec.memory_swap_limit),
        ("-r", &spec.rename_to),
    ];
    let mut command = format!("{} run {}", fleet_binary, shell_word(name));
    for (flag, value) in flags {
        if let Some(value) = value {
            command.push(' ');
            command.push_str(flag);
            command.push(' ');
            command.push_str(&shell_word(value));
        }
    }
    Ok(command)
}

pub struct DeploymentDispatcher {
    channel: Arc<dyn CommandChannel>,
    fleet_binary: String,
}

impl DeploymentDispatcher {
    pub fn new(channel: Arc<dyn CommandChannel>, fleet_binary: impl Into<String>) -> Self {
        Self {
            channel,
            fleet_binary: fleet_binary.into(),
        }
    }

    /// Dispatch every spec against `target`.  Invalid specs and failed
    /// instances are reported in the returned outcomes and do not stop
    /// the remaining work.
    pub async fn deploy(&self, target: &SessionTarget, specs: &[ServiceSpec]) -> Vec<DispatchOutcome> {
        let mut outcomes = Vec::new();
        for spec in specs {
            let command = match run_command(&self.fleet_binary, spec) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Skipping service spec: {}", e);
                    outcomes.push(DispatchOutcome {
                        service: spec.service_name.clone(),
                        instance: None,
                        command: None,
                        status: DispatchStatus::Failed {
                            error: Failure::from(&e),
                        },
                    });
                    continue;
                }
            };

            for instance in 1..=spec.instances {
                info!("[{}] dispatching instance {}: {}", target.host, instance, command);
                let status = match self.channel.execute(target, &command).await {
                    Ok(result) => DispatchStatus::Started {
                        output: result.stdout,
                    },
                    Err(e) => {
                        let e = DispatchError::from(e);
                        warn!("[{}] instance {} failed: {}", target.host, instance, e);
                        DispatchStatus::Failed {
                            error: Failure::from(&e),
                        }
                    }
                };
                outcomes.push(DispatchOutcome {
                    service: spec.service_name.clone(),
                    instance: Some(instance),
                    command: Some(command.clone()),
                    status,
                });
            }
        }
        outcomes
    }
}
