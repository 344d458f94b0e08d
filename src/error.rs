//! Error types for remote execution, probing, inspection and deployment.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Failure of a single remote command.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The session could not be established or authenticated.
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// The command ran but exited with a non-zero status.
    #[error("command exited with code {code}")]
    ExitCode { code: u32, stderr: String },

    /// The command did not complete before its deadline.
    #[error("command timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },
}

impl ChannelError {
    pub fn connection(host: impl Into<String>, message: impl ToString) -> Self {
        ChannelError::Connection {
            host: host.into(),
            message: message.to_string(),
        }
    }
}

/// Malformed text or JSON returned by a remote command.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry row {line:?} has {found} fields, expected 4")]
    RegistryRow { line: String, found: usize },

    #[error("expected {expected} fields in {what}, found {found}")]
    MissingFields {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("meminfo has no line {index}")]
    MemInfoLine { index: usize },

    #[error("{what}: {token:?} is not a number")]
    NotNumeric { what: &'static str, token: String },

    #[error("service {service} has no {field}")]
    MissingField {
        service: String,
        field: &'static str,
    },
}

/// Failure of one node probe.  Recorded on the node, never propagated.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("management service {name:?} is not running on this node")]
    MissingManagementService { name: String },
}

/// Failure of a whole cluster inspection.
#[derive(Error, Debug)]
pub enum InspectError {
    #[error("cluster {0:?} is not configured")]
    UnknownCluster(String),

    /// The cluster's private key could not be read or decrypted.
    #[error("cluster credentials are unusable: {0}")]
    Credentials(ChannelError),

    #[error("node catalog query failed: {0}")]
    Catalog(#[from] ChannelError),

    #[error("node catalog is malformed: {0}")]
    CatalogFormat(#[from] ParseError),

    #[error("node catalog lists address {0} more than once")]
    DuplicateNodeAddress(String),
}

/// Failure of one deployment instance.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("invalid service spec: {0}")]
    Validation(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    ExitCode,
    Timeout,
    Parse,
    MissingManagementService,
    Validation,
    /// The probe task panicked or was cancelled.
    Aborted,
}

/// Serializable form of an error attached to a report entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&ChannelError> for Failure {
    fn from(err: &ChannelError) -> Self {
        match err {
            ChannelError::Connection { .. } => Failure::new(FailureKind::Connection, err.to_string()),
            ChannelError::ExitCode { stderr, .. } if !stderr.trim().is_empty() => Failure::new(
                FailureKind::ExitCode,
                format!("{}: {}", err, stderr.trim()),
            ),
            ChannelError::ExitCode { .. } => Failure::new(FailureKind::ExitCode, err.to_string()),
            ChannelError::Timeout { .. } => Failure::new(FailureKind::Timeout, err.to_string()),
        }
    }
}

impl From<&ProbeError> for Failure {
    fn from(err: &ProbeError) -> Self {
        match err {
            ProbeError::Channel(e) => e.into(),
            ProbeError::Parse(e) => Failure::new(FailureKind::Parse, e.to_string()),
            ProbeError::MissingManagementService { .. } => {
                Failure::new(FailureKind::MissingManagementService, err.to_string())
            }
        }
    }
}

impl From<&DispatchError> for Failure {
    fn from(err: &DispatchError) -> Self {
        match err {
            DispatchError::Validation(_) => Failure::new(FailureKind::Validation, err.to_string()),
            DispatchError::Channel(e) => e.into(),
        }
    }
}
