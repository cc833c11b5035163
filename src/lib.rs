//! # ftmux
//!
//! A parallel file-transfer engine: many concurrent listings, downloads and
//! uploads multiplexed over a bounded pool of reusable connections, driven by
//! a single non-blocking loop.
//!
//! ## Features
//!
//! - **Bounded concurrency**: at most `max_parallel_transfers` operations in
//!   flight, the rest queue FIFO
//! - **Connection pooling**: connections are keyed by `host:port:user`,
//!   reused across tasks and lazily evicted when idle too long
//! - **Classified retry**: transient failures retry with exponential backoff
//!   telemetry, terminal ones surface exactly once
//! - **Protocol-agnostic**: the wire protocol lives behind the [`Transport`]
//!   trait; the engine never speaks FTP/SFTP/SMB itself
//! - **Event driven**: progress and completion arrive over a broadcast
//!   channel, no caller-visible call ever blocks
//!
//! ## Quick Start
//!
//! ```no_run
//! use ftmux::transport::{Operation, Transport, TransferTarget, TransportEvent};
//! use ftmux::{EngineConfig, TaskId, TransferEngine, TransferKind, TransferSpec};
//! use std::time::Duration;
//!
//! struct LoopbackTransport;
//!
//! impl Transport for LoopbackTransport {
//!     type Conn = ();
//!     fn scheme(&self) -> &str {
//!         "ftp"
//!     }
//!     fn connect(&mut self, _target: &TransferTarget) -> ftmux::Result<()> {
//!         Ok(())
//!     }
//!     fn start(&mut self, _conn: &mut (), _op: &Operation, _token: TaskId) -> ftmux::Result<()> {
//!         Ok(())
//!     }
//!     fn drive(&mut self, _budget: Duration) -> Vec<TransportEvent> {
//!         Vec::new()
//!     }
//!     fn abort(&mut self, _conn: &mut (), _token: TaskId) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = TransferEngine::new(EngineConfig::default(), LoopbackTransport)?;
//!     let mut events = engine.subscribe();
//!
//!     let id = engine.submit(TransferSpec {
//!         host: "files.local".into(),
//!         port: 21,
//!         username: "anonymous".into(),
//!         password: String::new(),
//!         source_path: "/pub".into(),
//!         dest_path: String::new(),
//!         kind: TransferKind::List,
//!         max_retries: None,
//!     })?;
//!     engine.start()?;
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("[{id}] {event:?}");
//!     }
//!     Ok(())
//! }
//! ```

// Modules
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod pool;
mod queue;
pub mod retry;
pub mod task;
pub mod transport;

// Re-exports for convenience
pub use config::{EngineConfig, MAX_PARALLEL_CEILING};
pub use engine::TransferEngine;
pub use error::{Result, TransferError};
pub use events::TransferEvent;
pub use pool::{ConnId, ConnectionPool, PoolKey, PoolStats};
pub use retry::RetryPolicy;
pub use task::{
    EngineStats, SpeedCalculator, TaskId, TaskSnapshot, TaskState, TransferKind, TransferProgress,
    TransferSpec,
};
pub use transport::{Operation, Transport, TransferTarget, TransportEvent, TransportTuning};
