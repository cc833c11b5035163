//! Task model
//!
//! A `TransferTask` is one unit of work: a listing, download or upload
//! against a single remote target. Tasks are owned exclusively by the engine
//! worker for their whole life; callers hold a `TaskId` and read cloned
//! `TaskSnapshot`s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Unique identifier for a transfer task.
///
/// Monotonically increasing, assigned at submission, never reused within
/// one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of transfer operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    /// Directory listing; payload is the listing bytes
    List,
    /// Remote-to-local transfer
    Download,
    /// Local-to-remote transfer
    Upload,
}

impl std::fmt::Display for TransferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Download => write!(f, "download"),
            Self::Upload => write!(f, "upload"),
        }
    }
}

/// Submission payload describing one transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote path for List/Download, local path for Upload
    pub source_path: String,
    /// Local destination for Download, remote destination for Upload;
    /// unused for List
    pub dest_path: String,
    pub kind: TransferKind,
    /// Per-task retry budget; engine default when `None`
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Current state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting in the queue (including between retry attempts)
    Queued,
    /// Holding a connection, operation in flight
    Active,
    /// Finished successfully
    Completed,
    /// Retries exhausted or non-retryable failure
    Failed,
    /// Cancelled from Queued or Active
    Cancelled,
}

impl TaskState {
    /// Check if the task has reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Progress counters for one task
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes moved so far
    pub transferred: u64,
    /// Total bytes, if the transport knows it
    pub total: Option<u64>,
    /// Instantaneous speed in bytes/sec (windowed average)
    pub speed: u64,
}

impl TransferProgress {
    /// Progress percentage (0.0 - 100.0); 0.0 when the total is unknown
    pub fn percentage(&self) -> f64 {
        match self.total {
            Some(total) if total > 0 => (self.transferred as f64 / total as f64) * 100.0,
            _ => 0.0,
        }
    }
}

/// Point-in-time view of a task, readable without touching the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub kind: TransferKind,
    pub state: TaskState,
    pub progress: TransferProgress,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Last computed backoff delay (telemetry; the task re-queues immediately)
    pub last_backoff_ms: Option<u64>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Internal representation of a managed task. Lives inside the worker only.
#[derive(Debug)]
pub(crate) struct TransferTask {
    pub id: TaskId,
    pub spec: TransferSpec,
    pub state: TaskState,
    pub progress: TransferProgress,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_backoff_ms: Option<u64>,
    pub last_error: Option<String>,
    pub payload: Option<Vec<u8>>,
    pub speed: SpeedCalculator,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransferTask {
    pub fn new(id: TaskId, spec: TransferSpec, default_max_retries: u32) -> Self {
        let max_retries = spec.max_retries.unwrap_or(default_max_retries);
        Self {
            id,
            spec,
            state: TaskState::Queued,
            progress: TransferProgress::default(),
            retry_count: 0,
            max_retries,
            last_backoff_ms: None,
            last_error: None,
            payload: None,
            speed: SpeedCalculator::new(8),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            kind: self.spec.kind,
            state: self.state,
            progress: self.progress,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_backoff_ms: self.last_backoff_ms,
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Speed calculator for tracking transfer rates over a sliding window
#[derive(Debug)]
pub struct SpeedCalculator {
    window_size: usize,
    measurements: Vec<(u64, Instant)>,
    total_bytes: u64,
}

impl SpeedCalculator {
    /// Create a new speed calculator averaging over `window_size` samples
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size,
            measurements: Vec::with_capacity(window_size),
            total_bytes: 0,
        }
    }

    /// Add a measurement
    pub fn add_bytes(&mut self, bytes: u64) {
        let now = Instant::now();
        self.total_bytes += bytes;

        if self.measurements.len() >= self.window_size {
            self.measurements.remove(0);
        }
        self.measurements.push((bytes, now));
    }

    /// Current speed in bytes/second
    pub fn speed(&self) -> u64 {
        if self.measurements.len() < 2 {
            return 0;
        }

        let first = &self.measurements[0];
        let last = &self.measurements[self.measurements.len() - 1];

        let elapsed = last.1.duration_since(first.1).as_secs_f64();
        if elapsed <= 0.0 {
            return 0;
        }

        let bytes: u64 = self.measurements.iter().map(|(b, _)| *b).sum();
        (bytes as f64 / elapsed) as u64
    }

    /// Total bytes tracked
    pub fn total(&self) -> u64 {
        self.total_bytes
    }

    /// Reset the calculator (used when a task re-enters the queue)
    pub fn reset(&mut self) {
        self.measurements.clear();
        self.total_bytes = 0;
    }
}

/// Aggregate counts across all tasks the engine has seen
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn spec(kind: TransferKind) -> TransferSpec {
        TransferSpec {
            host: "files.local".into(),
            port: 21,
            username: "anon".into(),
            password: String::new(),
            source_path: "/pub/a.bin".into(),
            dest_path: "/tmp/a.bin".into(),
            kind,
            max_retries: None,
        }
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Active.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn percentage_handles_unknown_total() {
        let progress = TransferProgress {
            transferred: 512,
            total: None,
            speed: 0,
        };
        assert_eq!(progress.percentage(), 0.0);

        let progress = TransferProgress {
            transferred: 50,
            total: Some(200),
            speed: 0,
        };
        assert!((progress.percentage() - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn per_task_retry_override_wins() {
        let mut s = spec(TransferKind::Download);
        s.max_retries = Some(7);
        let task = TransferTask::new(TaskId(1), s, 3);
        assert_eq!(task.max_retries, 7);

        let task = TransferTask::new(TaskId(2), spec(TransferKind::List), 3);
        assert_eq!(task.max_retries, 3);
    }

    #[test]
    fn speed_calculator_tracks_totals() {
        let mut calc = SpeedCalculator::new(10);

        calc.add_bytes(1000);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_bytes(1000);
        std::thread::sleep(Duration::from_millis(50));
        calc.add_bytes(1000);

        assert!(calc.speed() > 0);
        assert_eq!(calc.total(), 3000);

        calc.reset();
        assert_eq!(calc.total(), 0);
        assert_eq!(calc.speed(), 0);
    }
}
