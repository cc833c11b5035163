//! Transfer engine - main coordinator
//!
//! The `TransferEngine` is the primary entry point for the library. The
//! public handle never touches engine state directly: every mutating call
//! (`submit`, `start`, `stop`, `cancel`) is marshalled over a command channel
//! onto one worker task that exclusively owns the queue, the connection pool
//! and the task table. That single-owner rule is part of the API contract,
//! not an implementation detail - it is what lets the hot structures run
//! without any locking.
//!
//! The worker ticks at a fixed interval. Each tick drives the transport's
//! multiplexer once, dispatches completions through the retry policy,
//! promotes queued tasks into freed slots and fires `AllDrained` when the
//! queue and active set are both empty.

use crate::config::EngineConfig;
use crate::error::{Result, TransferError};
use crate::events::TransferEvent;
use crate::pool::{ConnId, ConnectionPool, PoolKey, PoolStats};
use crate::queue::TaskQueue;
use crate::retry::RetryPolicy;
use crate::task::{
    EngineStats, TaskId, TaskSnapshot, TaskState, TransferProgress, TransferSpec, TransferTask,
};
use crate::transport::{Operation, TransferTarget, Transport, TransportEvent, TransportTuning};

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Maximum number of events to buffer per subscriber
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Calls marshalled onto the worker task
enum Command {
    Submit { id: TaskId, spec: TransferSpec },
    Start,
    Stop,
    Cancel(TaskId),
}

/// State readable without a round-trip to the worker
struct Shared {
    event_tx: broadcast::Sender<TransferEvent>,
    snapshots: RwLock<HashMap<TaskId, TaskSnapshot>>,
    pool_stats: RwLock<PoolStats>,
    running: AtomicBool,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

/// The main transfer engine handle.
///
/// Cheap to hand around by reference; dropping it shuts the worker down and
/// aborts any in-flight operations.
pub struct TransferEngine {
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    config: EngineConfig,
}

impl TransferEngine {
    /// Create a new engine over the given transport.
    ///
    /// Spawns the worker task, so this must be called within a tokio runtime.
    /// The engine starts in the stopped state; submitted tasks queue up until
    /// [`start`](Self::start) is called.
    pub fn new<T: Transport>(config: EngineConfig, mut transport: T) -> Result<Self> {
        config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            event_tx,
            snapshots: RwLock::new(HashMap::new()),
            pool_stats: RwLock::new(PoolStats::default()),
            running: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        transport.tune(&TransportTuning::from_config(&config));

        let worker = Worker {
            shared: Arc::clone(&shared),
            cmd_rx,
            transport,
            tasks: HashMap::new(),
            queue: TaskQueue::new(),
            pool: ConnectionPool::new(
                Duration::from_secs(config.pool_idle_timeout_secs),
                config.pool_max_connections,
            ),
            active: HashMap::new(),
            policy: RetryPolicy::new(config.retry_base_delay_ms, config.retry_max_delay_ms),
            config: config.clone(),
            ticking: false,
        };
        tokio::spawn(worker.run());

        Ok(Self {
            shared,
            cmd_tx,
            config,
        })
    }

    /// Submit a transfer for execution and get its id.
    ///
    /// Never blocks. The task enters the queue; it is promoted at the next
    /// tick once the engine is running and a slot is free.
    pub fn submit(&self, spec: TransferSpec) -> Result<TaskId> {
        let id = TaskId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        // Publish a provisional snapshot so progress/cancel work immediately,
        // before the worker has processed the command.
        let snapshot = TaskSnapshot {
            id,
            kind: spec.kind,
            state: TaskState::Queued,
            progress: TransferProgress::default(),
            retry_count: 0,
            max_retries: spec.max_retries.unwrap_or(self.config.default_max_retries),
            last_backoff_ms: None,
            last_error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.shared.snapshots.write().insert(id, snapshot);

        if self.cmd_tx.send(Command::Submit { id, spec }).is_err() {
            self.shared.snapshots.write().remove(&id);
            return Err(TransferError::Shutdown);
        }
        Ok(id)
    }

    /// Start processing queued tasks. Idempotent.
    pub fn start(&self) -> Result<()> {
        self.shared.running.store(true, Ordering::SeqCst);
        self.cmd_tx
            .send(Command::Start)
            .map_err(|_| TransferError::Shutdown)
    }

    /// Stop the engine: abort all active tasks and purge queued ones, each
    /// producing one terminal cancelled error event.
    pub fn stop(&self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);
        self.cmd_tx
            .send(Command::Stop)
            .map_err(|_| TransferError::Shutdown)
    }

    /// Whether the engine is currently accepting work for promotion
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Cancel a task.
    ///
    /// Queued tasks are removed before they ever start (no `Started` event
    /// will be emitted for them); active tasks have their operation aborted
    /// and their connection returned to the pool. No-op when the task is
    /// already terminal.
    pub fn cancel(&self, id: TaskId) -> Result<()> {
        if !self.shared.snapshots.read().contains_key(&id) {
            return Err(TransferError::NotFound(id.0));
        }
        self.cmd_tx
            .send(Command::Cancel(id))
            .map_err(|_| TransferError::Shutdown)
    }

    /// Point-in-time view of a task, or `None` for an unknown id
    pub fn progress(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.shared.snapshots.read().get(&id).cloned()
    }

    /// Snapshots of every task this engine has seen, terminal ones included
    pub fn list(&self) -> Vec<TaskSnapshot> {
        self.shared.snapshots.read().values().cloned().collect()
    }

    /// Aggregate task counts by state
    pub fn stats(&self) -> EngineStats {
        let snapshots = self.shared.snapshots.read();
        let mut stats = EngineStats::default();
        for snapshot in snapshots.values() {
            match snapshot.state {
                TaskState::Queued => stats.queued += 1,
                TaskState::Active => stats.active += 1,
                TaskState::Completed => stats.completed += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Connection pool counters as of the last worker update
    pub fn pool_stats(&self) -> PoolStats {
        *self.shared.pool_stats.read()
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl Drop for TransferEngine {
    fn drop(&mut self) {
        self.shared.shutdown.cancel();
    }
}

/// Worker task: sole owner of queue, pool, transport and task table
struct Worker<T: Transport> {
    shared: Arc<Shared>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    transport: T,
    tasks: HashMap<TaskId, TransferTask>,
    queue: TaskQueue,
    pool: ConnectionPool<T::Conn>,
    active: HashMap<TaskId, ConnId>,
    policy: RetryPolicy,
    config: EngineConfig,
    /// True while there is work to drive; cleared after `AllDrained`
    ticking: bool,
}

/// Outcome of classifying a failure, computed under the task borrow
enum FailureDisposition {
    Retried,
    Failed(String),
}

impl<T: Transport> Worker<T> {
    async fn run(mut self) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            // Commands are polled before the tick: a cancel queued behind a
            // submit always lands before the task can be promoted.
            tokio::select! {
                biased;
                _ = self.shared.shutdown.cancelled() => {
                    self.abort_all_active();
                    break;
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        let was_idle = !self.ticking;
                        self.handle_command(cmd);
                        // A stale interval is ready the moment its branch is
                        // re-enabled; re-arm it so the new episode starts a
                        // full tick from now.
                        if was_idle && self.ticking {
                            interval.reset();
                        }
                    }
                    None => {
                        self.abort_all_active();
                        break;
                    }
                },
                _ = interval.tick(), if self.ticking => self.tick(),
            }
        }
        tracing::debug!("transfer engine worker exited");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Submit { id, spec } => {
                let task = TransferTask::new(id, spec, self.config.default_max_retries);
                self.tasks.insert(id, task);
                self.sync_snapshot_of(id);
                self.queue.push_back(id);
                self.emit(TransferEvent::Submitted { id });
                tracing::debug!(task = %id, queued = self.queue.len(), "transfer submitted");
                if self.shared.running.load(Ordering::SeqCst) {
                    self.ticking = true;
                }
            }
            Command::Start => {
                self.promote();
                if !self.queue.is_empty() || !self.active.is_empty() {
                    self.ticking = true;
                }
                self.publish_pool_stats();
            }
            Command::Stop => self.stop_all(),
            Command::Cancel(id) => self.cancel(id),
        }
    }

    /// One cooperative scheduling round: drive the multiplexer, dispatch
    /// completions, promote, detect drain.
    fn tick(&mut self) {
        let budget = Duration::from_millis(self.config.tick_interval_ms);
        for event in self.transport.drive(budget) {
            self.handle_transport_event(event);
        }
        self.promote();
        self.check_drained();
        self.publish_pool_stats();
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Progress {
                token,
                transferred,
                total,
            } => {
                // Stragglers from aborted operations carry tokens that are
                // no longer active; drop them.
                if !self.active.contains_key(&token) {
                    return;
                }
                let progress = {
                    let Some(task) = self.tasks.get_mut(&token) else {
                        return;
                    };
                    let delta = transferred.saturating_sub(task.progress.transferred);
                    if delta > 0 {
                        task.speed.add_bytes(delta);
                    }
                    task.progress.transferred = transferred;
                    task.progress.total = total.or(task.progress.total);
                    task.progress.speed = task.speed.speed();
                    task.progress
                };
                self.sync_snapshot_of(token);
                self.emit(TransferEvent::Progress {
                    id: token,
                    transferred: progress.transferred,
                    total: progress.total,
                    speed: progress.speed,
                });
            }
            TransportEvent::Done { token, payload } => self.complete_success(token, payload),
            TransportEvent::Failed { token, error } => self.complete_failure(token, error),
        }
    }

    fn complete_success(&mut self, id: TaskId, payload: Vec<u8>) {
        let Some(conn_id) = self.active.remove(&id) else {
            return;
        };
        self.pool.release(conn_id);

        {
            let Some(task) = self.tasks.get_mut(&id) else {
                return;
            };
            task.state = TaskState::Completed;
            task.payload = Some(payload.clone());
            task.completed_at = Some(Utc::now());
        }
        self.sync_snapshot_of(id);
        self.emit(TransferEvent::Finished { id, payload });
        tracing::debug!(task = %id, "transfer completed");
    }

    fn complete_failure(&mut self, id: TaskId, error: TransferError) {
        let Some(conn_id) = self.active.remove(&id) else {
            return;
        };
        self.pool.release(conn_id);
        self.fail_or_retry(id, error);
    }

    /// Classify a failure: re-enqueue at the tail while the retry budget
    /// lasts, otherwise emit the single terminal error event.
    fn fail_or_retry(&mut self, id: TaskId, error: TransferError) {
        let disposition = {
            let Some(task) = self.tasks.get_mut(&id) else {
                return;
            };
            if self
                .policy
                .should_retry(task.retry_count, task.max_retries, &error)
            {
                // Backoff is a scheduling hint, recorded but not awaited:
                // the task re-enters the queue immediately.
                let delay = self.policy.delay_for_attempt(task.retry_count);
                task.retry_count += 1;
                task.last_backoff_ms = Some(delay.as_millis() as u64);
                task.last_error = Some(error.to_string());
                task.state = TaskState::Queued;
                task.progress = TransferProgress::default();
                task.speed.reset();
                tracing::debug!(
                    task = %id,
                    attempt = task.retry_count,
                    max_retries = task.max_retries,
                    backoff_ms = delay.as_millis() as u64,
                    error = %error,
                    "transfer failed, re-enqueued"
                );
                FailureDisposition::Retried
            } else {
                task.state = TaskState::Failed;
                task.completed_at = Some(Utc::now());
                let message = format!(
                    "{error} (retries:{}/{})",
                    task.retry_count, task.max_retries
                );
                task.last_error = Some(message.clone());
                FailureDisposition::Failed(message)
            }
        };

        match disposition {
            FailureDisposition::Retried => {
                self.queue.push_back(id);
                self.sync_snapshot_of(id);
            }
            FailureDisposition::Failed(message) => {
                self.sync_snapshot_of(id);
                tracing::warn!(task = %id, %message, "transfer failed terminally");
                self.emit(TransferEvent::Error { id, message });
            }
        }
    }

    /// Move queued tasks into free slots, never exceeding the parallel limit
    fn promote(&mut self) {
        if !self.shared.running.load(Ordering::SeqCst) {
            return;
        }
        while self.active.len() < self.config.max_parallel_transfers {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            self.activate(id);
        }
    }

    fn activate(&mut self, id: TaskId) {
        let (key, target, op_result) = {
            let Some(task) = self.tasks.get(&id) else {
                return;
            };
            (
                PoolKey::from_spec(&task.spec),
                TransferTarget::from_spec(&task.spec),
                Operation::for_spec(self.transport.scheme(), &task.spec),
            )
        };
        let op = match op_result {
            Ok(op) => op,
            Err(e) => {
                self.fail_or_retry(id, e);
                return;
            }
        };

        let conn_id = {
            let transport = &mut self.transport;
            match self.pool.acquire(&key, || transport.connect(&target)) {
                Ok(conn_id) => conn_id,
                Err(e) => {
                    self.fail_or_retry(id, e);
                    return;
                }
            }
        };

        let started = {
            let transport = &mut self.transport;
            match self.pool.get_mut(conn_id) {
                Some(conn) => transport.start(conn, &op, id),
                None => Err(TransferError::internal("pooled connection missing")),
            }
        };
        if let Err(e) = started {
            self.pool.release(conn_id);
            self.fail_or_retry(id, e);
            return;
        }

        self.active.insert(id, conn_id);
        let description = {
            let Some(task) = self.tasks.get_mut(&id) else {
                return;
            };
            task.state = TaskState::Active;
            format!("{} {}", task.spec.kind, op.url)
        };
        self.sync_snapshot_of(id);
        self.emit(TransferEvent::Started { id, description });
    }

    fn cancel(&mut self, id: TaskId) {
        if self.queue.remove(id) {
            // Removed before promotion: no Started event was or will be
            // emitted for this id.
            self.finish_cancelled(id);
            self.check_drained();
            return;
        }

        if let Some(conn_id) = self.active.remove(&id) {
            {
                let transport = &mut self.transport;
                if let Some(conn) = self.pool.get_mut(conn_id) {
                    transport.abort(conn, id);
                }
            }
            self.pool.release(conn_id);
            self.finish_cancelled(id);
            self.promote();
            self.check_drained();
            self.publish_pool_stats();
        }
        // Already terminal or unknown: no-op.
    }

    /// Purge the queue and abort every active task. Both groups get a
    /// terminal cancelled event.
    fn stop_all(&mut self) {
        for id in self.queue.drain() {
            self.finish_cancelled(id);
        }

        let active: Vec<(TaskId, ConnId)> = self.active.drain().collect();
        for (id, conn_id) in active {
            {
                let transport = &mut self.transport;
                if let Some(conn) = self.pool.get_mut(conn_id) {
                    transport.abort(conn, id);
                }
            }
            self.pool.release(conn_id);
            self.finish_cancelled(id);
        }

        self.ticking = false;
        self.publish_pool_stats();
        tracing::debug!("engine stopped, queue purged");
    }

    fn finish_cancelled(&mut self, id: TaskId) {
        {
            let Some(task) = self.tasks.get_mut(&id) else {
                return;
            };
            if task.state.is_terminal() {
                return;
            }
            task.state = TaskState::Cancelled;
            task.completed_at = Some(Utc::now());
            task.last_error = Some(TransferError::Cancelled.to_string());
        }
        self.sync_snapshot_of(id);
        self.emit(TransferEvent::Error {
            id,
            message: TransferError::Cancelled.to_string(),
        });
    }

    fn check_drained(&mut self) {
        if self.ticking && self.queue.is_empty() && self.active.is_empty() {
            self.ticking = false;
            tracing::debug!("all transfers drained");
            self.emit(TransferEvent::AllDrained);
        }
    }

    /// Abort in-flight operations on shutdown; no events, the subscribers
    /// are gone with the handle.
    fn abort_all_active(&mut self) {
        let active: Vec<(TaskId, ConnId)> = self.active.drain().collect();
        for (id, conn_id) in active {
            let transport = &mut self.transport;
            if let Some(conn) = self.pool.get_mut(conn_id) {
                transport.abort(conn, id);
            }
        }
    }

    fn sync_snapshot_of(&self, id: TaskId) {
        if let Some(task) = self.tasks.get(&id) {
            self.shared.snapshots.write().insert(id, task.snapshot());
        }
    }

    fn publish_pool_stats(&self) {
        *self.shared.pool_stats.write() = self.pool.stats();
    }

    fn emit(&self, event: TransferEvent) {
        // Fire-and-forget: no subscribers is fine.
        let _ = self.shared.event_tx.send(event);
    }
}
