use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use russh_keys::key::KeyPair;

use crate::error::ChannelError;
use crate::types::{Auth, ClusterConnection, CommandResult};

#[cfg(test)]
pub mod mock;
pub mod ssh;
pub use ssh::SshChannel;

#[async_trait]
pub trait CommandChannel: Send + Sync {
    /// Run exactly one command in a fresh session on `target`.
    /// Resolves with the captured stdout when the command exits with
    /// status zero.
    async fn execute(
        &self,
        target: &SessionTarget,
        command: &str,
    ) -> Result<CommandResult, ChannelError>;
}

/// Ready-to-use authentication material.  Keys are decrypted once and
/// shared between every session of a cluster.
#[derive(Clone)]
pub enum Credentials {
    Password(String),
    Key(Arc<KeyPair>),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(***)"),
            Credentials::Key(_) => f.write_str("Key(***)"),
        }
    }
}

impl Credentials {
    pub fn load(auth: &Auth, host: &str) -> Result<Self, ChannelError> {
        match auth {
            Auth::Password { password } => Ok(Credentials::Password(password.clone())),
            Auth::PrivateKey {
                private_key,
                passphrase,
            } => {
                let key = russh_keys::load_secret_key(private_key, passphrase.as_deref())
                    .map_err(|e| {
                        ChannelError::connection(
                            host,
                            format!("cannot load key {}: {}", private_key.display(), e),
                        )
                    })?;
                Ok(Credentials::Key(Arc::new(key)))
            }
        }
    }
}

/// Host, port and identity of one SSH endpoint.
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}

impl SessionTarget {
    /// Resolve the cluster's entry point, loading key material if needed.
    pub fn for_cluster(connection: &ClusterConnection) -> Result<Self, ChannelError> {
        Ok(Self {
            host: connection.host.clone(),
            port: connection.port,
            username: connection.username.clone(),
            credentials: Credentials::load(&connection.auth, &connection.host)?,
        })
    }

    /// Same identity and port, different host.
    pub fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            ..self.clone()
        }
    }
}
