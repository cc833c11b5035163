//! Transfer events
//!
//! Asynchronous notifications emitted by the engine. Subscribers receive
//! them over a `tokio::sync::broadcast` channel; a slow subscriber may lag
//! and miss events, never block the engine.

use crate::task::TaskId;
use serde::{Deserialize, Serialize};

/// Events emitted by the transfer engine.
///
/// For a given id, `Started` precedes any `Progress` or terminal event, and
/// exactly one terminal event (`Finished` or `Error`) is emitted over the
/// task's lifetime. Events for different ids interleave arbitrarily.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TransferEvent {
    /// Task accepted into the queue
    Submitted { id: TaskId },
    /// Task acquired a connection and its operation is in flight
    Started { id: TaskId, description: String },
    /// Progress update for an active task
    Progress {
        id: TaskId,
        transferred: u64,
        total: Option<u64>,
        speed: u64,
    },
    /// Task completed successfully; terminal
    Finished { id: TaskId, payload: Vec<u8> },
    /// Task failed or was cancelled; terminal. The message names the
    /// underlying cause and, for exhausted retries, the attempt count.
    Error { id: TaskId, message: String },
    /// Queue and active set both drained; fires once per drain episode
    AllDrained,
}

impl TransferEvent {
    /// The task this event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Submitted { id }
            | Self::Started { id, .. }
            | Self::Progress { id, .. }
            | Self::Finished { id, .. }
            | Self::Error { id, .. } => Some(*id),
            Self::AllDrained => None,
        }
    }

    /// Whether this is a terminal event for its task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}
