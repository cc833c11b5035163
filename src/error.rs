//! Typed error hierarchy for ftmux
//!
//! Every failure the engine sees is classified into one of these variants
//! before any user-visible event is emitted. `is_retryable` is the single
//! source of truth for the retry/terminal split.

use thiserror::Error;

/// Main error type for the transfer engine
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransferError {
    /// Could not establish a connection (refused, unreachable, DNS)
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// Connect or overall-transfer timeout, enforced by the transport
    #[error("timeout: {0}")]
    Timeout(String),

    /// Authentication rejected by the remote
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Protocol-level rejection (not found, permission denied, violation)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// Transfer ended before all bytes arrived
    #[error("partial transfer: {0}")]
    PartialTransfer(String),

    /// Transient receive error mid-transfer
    #[error("receive error: {0}")]
    ReceiveError(String),

    /// Task was cancelled by the caller or by `stop()`
    #[error("cancelled")]
    Cancelled,

    /// Connection pool is at its hard cap with every slot in use
    #[error("connection pool exhausted (cap: {cap})")]
    PoolExhausted { cap: usize },

    /// Handle creation or other local fault (bug or resource exhaustion)
    #[error("internal fault: {0}")]
    InternalFault(String),

    /// No task with the given id exists
    #[error("task not found: {0}")]
    NotFound(u64),

    /// Configuration rejected by `EngineConfig::validate`
    #[error("invalid config for '{field}': {message}")]
    InvalidConfig {
        field: &'static str,
        message: String,
    },

    /// Engine worker is gone (handle dropped or shut down)
    #[error("engine is shut down")]
    Shutdown,
}

impl TransferError {
    /// Check whether this failure is worth retrying.
    ///
    /// Auth failures, protocol violations and local faults never succeed on
    /// a second attempt; everything transient does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_)
                | Self::Timeout(_)
                | Self::PartialTransfer(_)
                | Self::ReceiveError(_)
        )
    }

    /// Create a connect failure
    pub fn connect(message: impl Into<String>) -> Self {
        Self::ConnectFailed(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::ProtocolError(message.into())
    }

    /// Create an internal fault
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalFault(message.into())
    }

    /// Create an invalid-config error
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, TransferError>;
