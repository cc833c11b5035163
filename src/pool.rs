//! Connection pool
//!
//! Keyed cache of reusable transport connections. One connection is leased
//! to at most one task at a time; released connections stay in the pool and
//! are reused by later tasks with the same `host:port:user` key. Stale idle
//! connections are evicted lazily at the next `acquire` for their key, never
//! by a background sweep. At the hard cap an idle connection of any key is
//! reclaimed before a lease is refused.
//!
//! Owned by the engine worker alone; no internal locking.

use crate::error::{Result, TransferError};
use crate::task::TransferSpec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Composite identifier used to find a reusable connection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl PoolKey {
    pub fn from_spec(spec: &TransferSpec) -> Self {
        Self {
            host: spec.host.clone(),
            port: spec.port,
            username: spec.username.clone(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.host, self.port, self.username)
    }
}

/// Lease handle for a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

/// A cached connection and its bookkeeping
#[derive(Debug)]
struct PooledConnection<C> {
    conn: C,
    key: PoolKey,
    last_used_at: Instant,
    in_use: bool,
    reuses: u64,
}

/// Counters describing pool behavior, cheap to copy out
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections currently held in the pool (in use + idle)
    pub total: usize,
    /// Connections available for reuse
    pub idle: usize,
    /// Connections currently leased to tasks
    pub in_use: usize,
    /// Connections constructed over the pool's lifetime
    pub created: u64,
    /// Times an idle connection was handed out instead of a new one
    pub reused: u64,
    /// Stale connections discarded at acquire time
    pub evicted: u64,
}

/// Keyed cache of reusable connections with lazy idle eviction
#[derive(Debug)]
pub struct ConnectionPool<C> {
    connections: HashMap<ConnId, PooledConnection<C>>,
    next_id: u64,
    idle_timeout: Duration,
    max_connections: usize,
    created: u64,
    reused: u64,
    evicted: u64,
}

impl<C> ConnectionPool<C> {
    /// Create a pool with the given idle timeout and hard cap
    pub fn new(idle_timeout: Duration, max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 0,
            idle_timeout,
            max_connections,
            created: 0,
            reused: 0,
            evicted: 0,
        }
    }

    /// Lease a connection for `key`.
    ///
    /// Reuses an idle connection when a fresh one exists; stale ones for the
    /// key are discarded on the way. Otherwise constructs a new connection
    /// via `connect`. At the hard cap the least-recently-used idle connection
    /// of any key is reclaimed first; `PoolExhausted` means every pooled
    /// connection is genuinely leased.
    pub fn acquire(
        &mut self,
        key: &PoolKey,
        connect: impl FnOnce() -> Result<C>,
    ) -> Result<ConnId> {
        let now = Instant::now();

        // Lazy eviction: drop idle-expired connections for this key now.
        let stale: Vec<ConnId> = self
            .connections
            .iter()
            .filter(|(_, c)| {
                !c.in_use && c.key == *key && now.duration_since(c.last_used_at) > self.idle_timeout
            })
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            self.connections.remove(&id);
            self.evicted += 1;
            tracing::debug!(key = %key, "evicted stale pooled connection");
        }

        // Reuse a fresh idle connection if one remains.
        let reusable = self
            .connections
            .iter()
            .filter(|(_, c)| !c.in_use && c.key == *key)
            .map(|(&id, _)| id)
            .next();
        if let Some(id) = reusable {
            let entry = self
                .connections
                .get_mut(&id)
                .ok_or_else(|| TransferError::internal("pool entry vanished"))?;
            entry.in_use = true;
            entry.reuses += 1;
            self.reused += 1;
            tracing::debug!(key = %key, reuses = entry.reuses, "reusing pooled connection");
            return Ok(id);
        }

        if self.connections.len() >= self.max_connections {
            // Reclaim the least-recently-used idle connection of any key
            // before giving up; the cap only hard-fails when every slot is
            // actually leased.
            let lru_idle = self
                .connections
                .iter()
                .filter(|(_, c)| !c.in_use)
                .min_by_key(|(_, c)| c.last_used_at)
                .map(|(&id, _)| id);
            match lru_idle {
                Some(id) => {
                    self.connections.remove(&id);
                    self.evicted += 1;
                    tracing::debug!(key = %key, "reclaimed idle connection at pool cap");
                }
                None => {
                    return Err(TransferError::PoolExhausted {
                        cap: self.max_connections,
                    });
                }
            }
        }

        let conn = connect()?;
        let id = ConnId(self.next_id);
        self.next_id += 1;
        self.created += 1;
        self.connections.insert(
            id,
            PooledConnection {
                conn,
                key: key.clone(),
                last_used_at: now,
                in_use: true,
                reuses: 0,
            },
        );
        tracing::debug!(key = %key, total = self.connections.len(), "opened new pooled connection");
        Ok(id)
    }

    /// Return a leased connection to the pool for future reuse
    pub fn release(&mut self, id: ConnId) {
        if let Some(entry) = self.connections.get_mut(&id) {
            entry.in_use = false;
            entry.last_used_at = Instant::now();
        }
    }

    /// Access the underlying transport connection of a lease
    pub fn get_mut(&mut self, id: ConnId) -> Option<&mut C> {
        self.connections.get_mut(&id).map(|entry| &mut entry.conn)
    }

    /// Reuse count of a specific connection
    pub fn reuses(&self, id: ConnId) -> Option<u64> {
        self.connections.get(&id).map(|entry| entry.reuses)
    }

    pub fn stats(&self) -> PoolStats {
        let in_use = self.connections.values().filter(|c| c.in_use).count();
        PoolStats {
            total: self.connections.len(),
            idle: self.connections.len() - in_use,
            in_use,
            created: self.created,
            reused: self.reused,
            evicted: self.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(host: &str) -> PoolKey {
        PoolKey {
            host: host.into(),
            port: 21,
            username: "anon".into(),
        }
    }

    #[test]
    fn key_display_is_composite() {
        assert_eq!(key("files.local").to_string(), "files.local:21:anon");
    }

    #[test]
    fn released_connection_is_reused() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 8);
        let k = key("a");

        let first = pool.acquire(&k, || Ok(7)).unwrap();
        pool.release(first);
        let second = pool.acquire(&k, || panic!("must reuse, not connect")).unwrap();

        assert_eq!(first, second);
        assert_eq!(pool.reuses(second), Some(1));
        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn in_use_connection_is_never_handed_out_twice() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 8);
        let k = key("a");

        let first = pool.acquire(&k, || Ok(1)).unwrap();
        let second = pool.acquire(&k, || Ok(2)).unwrap();

        assert_ne!(first, second);
        assert_eq!(pool.stats().in_use, 2);
        assert_eq!(pool.stats().reused, 0);
    }

    #[test]
    fn different_keys_never_share() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 8);

        let a = pool.acquire(&key("a"), || Ok(1)).unwrap();
        pool.release(a);
        let b = pool.acquire(&key("b"), || Ok(2)).unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.stats().created, 2);
    }

    #[test]
    fn stale_connection_evicted_lazily() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::ZERO, 8);
        let k = key("a");

        let first = pool.acquire(&k, || Ok(1)).unwrap();
        pool.release(first);
        std::thread::sleep(Duration::from_millis(5));

        // Idle timeout of zero: the released connection is stale by now and
        // must be replaced, not reused.
        let second = pool.acquire(&k, || Ok(2)).unwrap();
        assert_ne!(first, second);

        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn hard_cap_enforced_when_every_slot_is_leased() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 2);

        pool.acquire(&key("a"), || Ok(1)).unwrap();
        pool.acquire(&key("b"), || Ok(2)).unwrap();
        let err = pool.acquire(&key("c"), || Ok(3)).unwrap_err();

        assert!(matches!(err, TransferError::PoolExhausted { cap: 2 }));
    }

    #[test]
    fn at_cap_idle_connection_is_reclaimed() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 2);

        let a = pool.acquire(&key("a"), || Ok(1)).unwrap();
        let b = pool.acquire(&key("b"), || Ok(2)).unwrap();
        pool.release(a);
        pool.release(b);

        // Full pool, but nothing leased: the new key gets a slot.
        pool.acquire(&key("c"), || Ok(3)).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.in_use, 1);
        assert_eq!(stats.created, 3);
        assert_eq!(stats.evicted, 1);
    }

    #[test]
    fn cap_reclaim_prefers_least_recently_used() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 2);

        let a = pool.acquire(&key("a"), || Ok(1)).unwrap();
        pool.release(a);
        std::thread::sleep(Duration::from_millis(5));
        let b = pool.acquire(&key("b"), || Ok(2)).unwrap();
        pool.release(b);

        let c = pool.acquire(&key("c"), || Ok(3)).unwrap();
        pool.release(c);

        // The older idle connection (key a) was the one reclaimed.
        pool.acquire(&key("b"), || panic!("must reuse, not connect"))
            .unwrap();
    }

    #[test]
    fn connect_failure_propagates_and_pools_nothing() {
        let mut pool: ConnectionPool<u32> = ConnectionPool::new(Duration::from_secs(60), 2);

        let err = pool
            .acquire(&key("a"), || Err(TransferError::connect("refused")))
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(pool.stats().total, 0);
    }
}
