use super::{CommandChannel, Credentials, SessionTarget};
use crate::error::ChannelError;
use crate::types::CommandResult;
use async_trait::async_trait;
use log::{debug, warn};
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect};
use russh_keys::key;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Extended-data stream number of stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// One-shot SSH command execution: connect, authenticate, exec, tear down.
pub struct SshChannel {
    config: Arc<client::Config>,
    command_timeout: Duration,
    verify_host_keys: bool,
}

impl SshChannel {
    pub fn new(command_timeout: Duration, verify_host_keys: bool) -> Self {
        let config = client::Config {
            inactivity_timeout: Some(command_timeout),
            ..Default::default()
        };
        Self {
            config: Arc::new(config),
            command_timeout,
            verify_host_keys,
        }
    }

    async fn connect(&self, target: &SessionTarget) -> Result<Handle<HostKeyPolicy>, ChannelError> {
        let policy = HostKeyPolicy {
            host: target.host.clone(),
            port: target.port,
            verify: self.verify_host_keys,
        };
        let mut session = client::connect(
            Arc::clone(&self.config),
            (target.host.as_str(), target.port),
            policy,
        )
        .await
        .map_err(|e| ChannelError::connection(&target.host, e))?;

        let accepted = match &target.credentials {
            Credentials::Password(password) => {
                session
                    .authenticate_password(target.username.as_str(), password.as_str())
                    .await
            }
            Credentials::Key(key) => {
                session
                    .authenticate_publickey(target.username.as_str(), Arc::clone(key))
                    .await
            }
        }
        .map_err(|e| ChannelError::connection(&target.host, e))?;

        if !accepted {
            return Err(ChannelError::connection(
                &target.host,
                format!("authentication rejected for user {}", target.username),
            ));
        }
        Ok(session)
    }

    async fn run(
        session: &Handle<HostKeyPolicy>,
        target: &SessionTarget,
        command: &str,
    ) -> Result<CommandResult, ChannelError> {
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ChannelError::connection(&target.host, e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ChannelError::connection(&target.host, e))?;

        // `wait` yields `None` only once the channel is closed, so the exit
        // status is always seen before we decide on the outcome.
        let mut output = ExecOutput::default();
        while let Some(msg) = channel.wait().await {
            output.push(msg);
        }
        output.finish(&target.host, command)
    }

    async fn execute_once(
        &self,
        target: &SessionTarget,
        command: &str,
    ) -> Result<CommandResult, ChannelError> {
        let session = self.connect(target).await?;
        let result = Self::run(&session, target, command).await;
        if let Err(e) = session
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("[{}] disconnect failed: {}", target.host, e);
        }
        result
    }
}

#[async_trait]
impl CommandChannel for SshChannel {
    async fn execute(
        &self,
        target: &SessionTarget,
        command: &str,
    ) -> Result<CommandResult, ChannelError> {
        debug!("[{}] exec: {}", target.host, command);
        // Dropping the session future on expiry closes the connection.
        match timeout(self.command_timeout, self.execute_once(target, command)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::Timeout {
                after: self.command_timeout,
            }),
        }
    }
}

/// Output of one exec channel, accumulated in arrival order.
#[derive(Debug, Default)]
struct ExecOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl ExecOutput {
    fn push(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Data { ref data } => self.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                self.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => self.exit_status = Some(exit_status),
            _ => {}
        }
    }

    /// Decide the outcome once the channel has closed.  Stderr never
    /// reaches the success value.
    fn finish(self, host: &str, command: &str) -> Result<CommandResult, ChannelError> {
        let stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if !stderr.is_empty() {
            debug!("[{}] stderr of {:?}: {}", host, command, stderr.trim_end());
        }

        match self.exit_status {
            Some(0) => {
                let stdout = match String::from_utf8(self.stdout) {
                    Ok(stdout) => stdout,
                    Err(e) => {
                        warn!(
                            "[{}] output of {:?} is not valid UTF-8; invalid bytes replaced",
                            host, command
                        );
                        String::from_utf8_lossy(e.as_bytes()).into_owned()
                    }
                };
                Ok(CommandResult {
                    stdout,
                    exit_code: 0,
                })
            }
            Some(code) => Err(ChannelError::ExitCode { code, stderr }),
            None => Err(ChannelError::connection(
                host,
                "channel closed without an exit status",
            )),
        }
    }
}

/// Client handler deciding whether to trust the server's host key.
pub struct HostKeyPolicy {
    host: String,
    port: u16,
    verify: bool,
}

#[async_trait]
impl client::Handler for HostKeyPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        if !self.verify {
            return Ok(true);
        }
        match russh_keys::check_known_hosts(&self.host, self.port, server_public_key) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!("Host key of {}:{} is not in known_hosts", self.host, self.port);
                Ok(false)
            }
            Err(e) => {
                warn!("Host key check for {}:{} failed: {}", self.host, self.port, e);
                Ok(false)
            }
        }
    }
}
