use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::command::FleetLayout;
use crate::types::{Auth, ClusterConnection, ServiceSpec};

/// Source of cluster connection parameters.
pub trait ClusterConfigProvider: Send + Sync {
    fn clusters(&self) -> &[ClusterConnection];

    fn cluster(&self, name: &str) -> Option<&ClusterConnection> {
        self.clusters().iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub clusters: Vec<ClusterConnection>,
    pub fleet_binary: String,
    pub management_service: String,
    pub proc_root: String,
    /// Upper bound on SSH sessions open at once during one inspection.
    pub max_sessions: usize,
    pub command_timeout_secs: u64,
    pub inspect_timeout_secs: u64,
    pub verify_host_keys: bool,
}

impl Default for Config {
    fn default() -> Self {
        let layout = FleetLayout::default();
        Self {
            clusters: Vec::new(),
            fleet_binary: layout.fleet_binary,
            management_service: layout.management_service,
            proc_root: layout.proc_root,
            max_sessions: 16,
            command_timeout_secs: 30,
            inspect_timeout_secs: 300,
            verify_host_keys: false,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("lighthouse.toml"))
            .merge(Json::file("lighthouse.json"))
            .merge(Env::prefixed("LIGHTHOUSE_"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(secret_file) = std::env::var("LIGHTHOUSE_SSH_PASSPHRASE_FILE") {
            let passphrase = std::fs::read_to_string(secret_file)?.trim().to_string();
            config.fill_passphrase(&passphrase);
        }

        config.validate()?;
        Ok(config)
    }

    fn fill_passphrase(&mut self, secret: &str) {
        for cluster in &mut self.clusters {
            if let Auth::PrivateKey { passphrase, .. } = &mut cluster.auth {
                if passphrase.is_none() {
                    *passphrase = Some(secret.to_string());
                }
            }
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for cluster in &self.clusters {
            if !seen.insert(cluster.name.as_str()) {
                anyhow::bail!("Cluster {:?} is configured more than once", cluster.name);
            }
        }
        if self.max_sessions == 0 {
            anyhow::bail!("max_sessions must be at least 1");
        }
        if self.command_timeout_secs == 0 || self.inspect_timeout_secs == 0 {
            anyhow::bail!("timeouts must be non-zero");
        }
        Ok(())
    }

    pub fn layout(&self) -> FleetLayout {
        FleetLayout {
            fleet_binary: self.fleet_binary.clone(),
            management_service: self.management_service.clone(),
            proc_root: self.proc_root.clone(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn inspect_timeout(&self) -> Duration {
        Duration::from_secs(self.inspect_timeout_secs)
    }
}

impl ClusterConfigProvider for Config {
    fn clusters(&self) -> &[ClusterConnection] {
        &self.clusters
    }
}

#[derive(Debug, Deserialize)]
struct DeploymentFile {
    #[serde(default)]
    services: Vec<ServiceSpec>,
}

/// Read service specs from a TOML or JSON file with a `services` array.
pub fn load_service_specs(path: &Path) -> anyhow::Result<Vec<ServiceSpec>> {
    let figment = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Figment::from(Json::file(path)),
        Some("toml") => Figment::from(Toml::file(path)),
        _ => anyhow::bail!(
            "Unsupported deployment file {}: expected .toml or .json",
            path.display()
        ),
    };
    if !path.exists() {
        anyhow::bail!("Deployment file {} does not exist", path.display());
    }
    let file: DeploymentFile = figment
        .extract()
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
    Ok(file.services)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_without_files() {
        Jail::expect_with(|_jail| {
            let config = Config::load().expect("load");
            assert!(config.clusters.is_empty());
            assert_eq!(config.fleet_binary, "armada");
            assert_eq!(config.max_sessions, 16);
            assert_eq!(config.command_timeout(), Duration::from_secs(30));
            Ok(())
        });
    }

    #[test]
    fn toml_clusters_and_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lighthouse.toml",
                r#"
                max_sessions = 4

                [[clusters]]
                name = "dev"
                host = "10.0.0.1"
                username = "ops"
                password = "pw"

                [[clusters]]
                name = "prod"
                host = "10.1.0.1"
                port = 2222
                username = "ops"
                private_key = "/keys/prod"
                "#,
            )?;
            jail.set_env("LIGHTHOUSE_PROC_ROOT", "/hostfs");

            let config = Config::load().expect("load");
            assert_eq!(config.max_sessions, 4);
            assert_eq!(config.layout().proc_root, "/hostfs");
            assert_eq!(config.clusters().len(), 2);
            let prod = config.cluster("prod").expect("prod");
            assert_eq!(prod.port, 2222);
            assert!(matches!(prod.auth, Auth::PrivateKey { .. }));
            assert!(config.cluster("staging").is_none());
            Ok(())
        });
    }

    #[test]
    fn passphrase_secret_fills_key_clusters() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lighthouse.toml",
                r#"
                [[clusters]]
                name = "prod"
                host = "10.1.0.1"
                username = "ops"
                private_key = "/keys/prod"
                "#,
            )?;
            jail.create_file("passphrase", "open sesame\n")?;
            jail.set_env("LIGHTHOUSE_SSH_PASSPHRASE_FILE", "passphrase");

            let config = Config::load().expect("load");
            match &config.clusters[0].auth {
                Auth::PrivateKey { passphrase, .. } => {
                    assert_eq!(passphrase.as_deref(), Some("open sesame"))
                }
                other => panic!("unexpected auth {:?}", other),
            }
            Ok(())
        });
    }

    #[test]
    fn duplicate_cluster_names_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "lighthouse.json",
                r#"{"clusters":[
                    {"name":"dev","host":"a","username":"u","password":"p"},
                    {"name":"dev","host":"b","username":"u","password":"p"}
                ]}"#,
            )?;
            assert!(Config::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn service_specs_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "deploy.toml",
                r#"
                [[services]]
                serviceName = "billing"
                env = "production"
                instances = 3

                [[services]]
                memoryLimit = "512M"
                "#,
            )?;
            let specs = load_service_specs(Path::new("deploy.toml")).expect("specs");
            assert_eq!(specs.len(), 2);
            assert_eq!(specs[0].service_name.as_deref(), Some("billing"));
            assert_eq!(specs[0].instances, 3);
            assert_eq!(specs[1].service_name, None);
            assert_eq!(specs[1].instances, 1);
            assert!(load_service_specs(Path::new("deploy.yaml")).is_err());
            Ok(())
        });
    }
}
