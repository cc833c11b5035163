//! Transport seam
//!
//! The engine does not speak any transfer protocol itself. A `Transport`
//! implementation owns the protocol handles and multiplexes all in-flight
//! operations behind a single non-blocking [`Transport::drive`] call, which
//! the engine invokes once per tick.
//!
//! Every started operation carries the engine-supplied [`TaskId`] token and
//! every event `drive` reports is tagged with it, so no side lookup tables
//! are needed to map completions back to tasks.

use crate::config::EngineConfig;
use crate::error::{Result, TransferError};
use crate::task::{TaskId, TransferKind, TransferSpec};
use std::time::Duration;
use url::Url;

/// Connection target. Credentials go to the transport's auth mechanism and
/// are never embedded in URLs.
#[derive(Debug, Clone)]
pub struct TransferTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

impl TransferTarget {
    pub fn from_spec(spec: &TransferSpec) -> Self {
        Self {
            host: spec.host.clone(),
            port: spec.port,
            username: spec.username.clone(),
            password: spec.password.clone(),
        }
    }
}

/// One operation to run on an established connection
#[derive(Debug, Clone)]
pub struct Operation {
    pub kind: TransferKind,
    /// `scheme://host:port/sourcePath`
    pub url: Url,
    pub source_path: String,
    pub dest_path: String,
}

impl Operation {
    /// Build the operation for a task, constructing the target URL from the
    /// transport's scheme.
    pub fn for_spec(scheme: &str, spec: &TransferSpec) -> Result<Self> {
        let url = transfer_url(scheme, &spec.host, spec.port, &spec.source_path)?;
        Ok(Self {
            kind: spec.kind,
            url,
            source_path: spec.source_path.clone(),
            dest_path: spec.dest_path.clone(),
        })
    }
}

/// Build `scheme://host:port/path`. The path gets a leading slash if the
/// caller omitted one; credentials are never part of the URL.
pub fn transfer_url(scheme: &str, host: &str, port: u16, path: &str) -> Result<Url> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    Url::parse(&format!("{scheme}://{host}:{port}{path}"))
        .map_err(|e| TransferError::protocol(format!("invalid target URL: {e}")))
}

/// Timeout knobs forwarded from the engine configuration
#[derive(Debug, Clone, Copy)]
pub struct TransportTuning {
    pub connect_timeout: Duration,
    pub transfer_timeout: Duration,
    pub dns_cache_timeout: Duration,
}

impl TransportTuning {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            transfer_timeout: Duration::from_millis(config.transfer_timeout_ms),
            dns_cache_timeout: Duration::from_secs(config.dns_cache_timeout_secs),
        }
    }
}

/// What a driven operation reported this tick
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Bytes moved; `total` stays `None` until the transport learns it
    Progress {
        token: TaskId,
        transferred: u64,
        total: Option<u64>,
    },
    /// Operation finished; `payload` is the listing bytes or result path
    Done { token: TaskId, payload: Vec<u8> },
    /// Operation failed; connect/transfer timeouts surface here as
    /// [`TransferError::Timeout`]
    Failed {
        token: TaskId,
        error: TransferError,
    },
}

impl TransportEvent {
    pub fn token(&self) -> TaskId {
        match self {
            Self::Progress { token, .. } | Self::Done { token, .. } | Self::Failed { token, .. } => {
                *token
            }
        }
    }
}

/// Protocol adapter driven by the engine's tick loop.
///
/// Implementations must be non-blocking: `drive` advances all in-flight
/// operations within (approximately) the given budget and returns whatever
/// events occurred; every other method returns promptly.
pub trait Transport: Send + 'static {
    /// Established protocol connection, opaque to the engine
    type Conn: Send + 'static;

    /// URL scheme for target construction (e.g. "ftp", "sftp", "smb")
    fn scheme(&self) -> &str;

    /// Receive timeout configuration before any work starts
    fn tune(&mut self, tuning: &TransportTuning) {
        let _ = tuning;
    }

    /// Establish a connection, authenticating with the target's credentials
    fn connect(&mut self, target: &TransferTarget) -> Result<Self::Conn>;

    /// Start a non-blocking operation on a connection. The `token` must tag
    /// every event the operation later produces.
    fn start(&mut self, conn: &mut Self::Conn, op: &Operation, token: TaskId) -> Result<()>;

    /// Advance all in-flight operations once; never blocks past `budget`
    fn drive(&mut self, budget: Duration) -> Vec<TransportEvent>;

    /// Abort the operation identified by `token`; the connection stays usable
    fn abort(&mut self, conn: &mut Self::Conn, token: TaskId);
}
