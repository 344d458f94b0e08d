//! Scripted in-memory channel for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandChannel, SessionTarget};
use crate::error::ChannelError;
use crate::types::CommandResult;

#[derive(Debug, Clone)]
pub enum Reply {
    Stdout(String),
    Exit(u32),
    Unreachable,
    Hang,
    Panic,
}

/// Answers commands per host (or for any host), records every command
/// issued and how many ran at once.
#[derive(Default)]
pub struct ScriptedChannel {
    replies: Mutex<HashMap<(Option<String>, String), Reply>>,
    latency: Mutex<HashMap<String, Duration>>,
    issued: Mutex<Vec<(String, String)>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, host: &str, command: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert((Some(host.to_string()), command.to_string()), reply);
        self
    }

    pub fn on_any(self, command: &str, reply: Reply) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert((None, command.to_string()), reply);
        self
    }

    pub fn stdout(self, host: &str, command: &str, stdout: &str) -> Self {
        self.on(host, command, Reply::Stdout(stdout.to_string()))
    }

    pub fn stdout_any(self, command: &str, stdout: &str) -> Self {
        self.on_any(command, Reply::Stdout(stdout.to_string()))
    }

    pub fn latency(self, host: &str, delay: Duration) -> Self {
        self.latency.lock().unwrap().insert(host.to_string(), delay);
        self
    }

    /// `(host, command)` pairs in issue order.
    pub fn issued(&self) -> Vec<(String, String)> {
        self.issued.lock().unwrap().clone()
    }

    pub fn issued_to(&self, host: &str) -> Vec<String> {
        self.issued()
            .into_iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c)
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn reply_for(&self, host: &str, command: &str) -> Option<Reply> {
        let replies = self.replies.lock().unwrap();
        replies
            .get(&(Some(host.to_string()), command.to_string()))
            .or_else(|| replies.get(&(None, command.to_string())))
            .cloned()
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn execute(
        &self,
        target: &SessionTarget,
        command: &str,
    ) -> Result<CommandResult, ChannelError> {
        self.issued
            .lock()
            .unwrap()
            .push((target.host.clone(), command.to_string()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = self.latency.lock().unwrap().get(&target.host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let outcome = match self.reply_for(&target.host, command) {
            Some(Reply::Stdout(stdout)) => Ok(CommandResult {
                stdout,
                exit_code: 0,
            }),
            Some(Reply::Exit(code)) => Err(ChannelError::ExitCode {
                code,
                stderr: String::new(),
            }),
            Some(Reply::Unreachable) => Err(ChannelError::connection(
                &target.host,
                "connection refused",
            )),
            Some(Reply::Panic) => panic!("scripted panic on {}", target.host),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Err(ChannelError::ExitCode {
                code: 127,
                stderr: format!("unscripted command: {}", command),
            }),
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}
