//! Per-host connection pool.
//!
//! Callers `acquire` a connection for a host, use it, and let the returned
//! guard's `Drop` return it to the pool. A per-host idle index and FIFO
//! waiter queue keep callers from starving each other when the pool is at
//! capacity; a background reaper task evicts idle connections past their
//! keep-alive window.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use theo_core::PoolConfig;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

/// A leased HTTP client, scoped to one host. Mirrors the `ConnectionEntry`
/// record the pool owns exclusively — callers only ever see it through a
/// [`PooledConnection`] borrow.
pub struct Connection {
    pub id: Uuid,
    pub host: String,
    pub client: reqwest::Client,
    created_at: Instant,
    last_used: Instant,
    request_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool has been destroyed")]
    PoolDestroyed,
    #[error("invalid host: {0}")]
    InvalidHost(String),
    #[error("timed out after {0}ms waiting for an available connection")]
    AcquireTimeout(u64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    pub idle: usize,
    pub in_use: usize,
}

/// The pool's observable state, per §4.A: active/idle connection counts,
/// requests still queued on a waiter, a per-host breakdown, and lifetime
/// counters for total acquisitions and how many of those were served by
/// reusing an idle connection rather than opening a new one.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub active_connections: usize,
    pub idle_connections: usize,
    pub pending_requests: usize,
    pub connections_by_host: HashMap<String, HostStats>,
    pub total_requests: u64,
    pub connection_reuses: u64,
}

struct Inner {
    idle: HashMap<String, VecDeque<Connection>>,
    in_use_count: HashMap<String, usize>,
    waiters: HashMap<String, VecDeque<oneshot::Sender<Connection>>>,
    total: usize,
}

/// The pool itself. Cheap to clone (it is an `Arc` internally via
/// `ConnectionPool::new` returning an `Arc<ConnectionPool>`), so the same
/// pool can be shared across every adapter.
pub struct ConnectionPool {
    config: PoolConfig,
    inner: Mutex<Inner>,
    destroyed: AtomicBool,
    closed: AtomicBool,
    total_requests: AtomicU64,
    connection_reuses: AtomicU64,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            config,
            inner: Mutex::new(Inner {
                idle: HashMap::new(),
                in_use_count: HashMap::new(),
                waiters: HashMap::new(),
                total: 0,
            }),
            destroyed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            total_requests: AtomicU64::new(0),
            connection_reuses: AtomicU64::new(0),
        });
        spawn_reaper(pool.clone());
        pool
    }

    /// Acquires a connection for `host`, reusing an idle one, opening a new
    /// one if under capacity, or waiting in a FIFO queue otherwise.
    pub async fn acquire(self: &Arc<Self>, host: &str) -> Result<PooledConnection, PoolError> {
        if host.trim().is_empty() {
            return Err(PoolError::InvalidHost(host.to_string()));
        }
        if self.destroyed.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::PoolDestroyed);
        }
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let receiver = {
            let mut inner = self.inner.lock().expect("pool mutex poisoned");

            if let Some(mut conn) = inner.idle.get_mut(host).and_then(|q| q.pop_front()) {
                conn.request_count += 1;
                *inner.in_use_count.entry(host.to_string()).or_insert(0) += 1;
                self.connection_reuses.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConnection {
                    pool: self.clone(),
                    connection: Some(conn),
                });
            }

            let in_use = *inner.in_use_count.get(host).unwrap_or(&0);
            if in_use < self.config.max_per_host && inner.total < self.config.max_total {
                let now = Instant::now();
                let conn = Connection {
                    id: Uuid::new_v4(),
                    host: host.to_string(),
                    client: reqwest::Client::new(),
                    created_at: now,
                    last_used: now,
                    request_count: 1,
                };
                *inner.in_use_count.entry(host.to_string()).or_insert(0) += 1;
                inner.total += 1;
                return Ok(PooledConnection {
                    pool: self.clone(),
                    connection: Some(conn),
                });
            }

            let (tx, rx) = oneshot::channel();
            inner.waiters.entry(host.to_string()).or_default().push_back(tx);
            rx
        };

        let acquire_timeout = Duration::from_millis(self.config.acquire_timeout_ms);
        match timeout(acquire_timeout, receiver).await {
            Ok(Ok(mut conn)) => {
                conn.request_count += 1;
                self.connection_reuses.fetch_add(1, Ordering::Relaxed);
                Ok(PooledConnection {
                    pool: self.clone(),
                    connection: Some(conn),
                })
            }
            Ok(Err(_)) => Err(PoolError::PoolDestroyed),
            Err(_) => Err(PoolError::AcquireTimeout(self.config.acquire_timeout_ms)),
        }
    }

    /// Returns a connection to the idle pool, or hands it directly to the
    /// oldest waiter for that host if one is queued.
    fn release(&self, mut conn: Connection) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let host = conn.host.clone();
        if let Some(count) = inner.in_use_count.get_mut(&host) {
            *count = count.saturating_sub(1);
        }

        if self.destroyed.load(Ordering::SeqCst) {
            inner.total = inner.total.saturating_sub(1);
            return;
        }

        conn.last_used = Instant::now();

        if let Some(queue) = inner.waiters.get_mut(&host) {
            while let Some(waiter) = queue.pop_front() {
                *inner.in_use_count.entry(host.clone()).or_insert(0) += 1;
                match waiter.send(conn) {
                    Ok(()) => return,
                    Err(returned) => {
                        conn = returned;
                        if let Some(count) = inner.in_use_count.get_mut(&host) {
                            *count = count.saturating_sub(1);
                        }
                        continue;
                    }
                }
            }
        }

        if self.closed.load(Ordering::SeqCst) {
            inner.total = inner.total.saturating_sub(1);
            return;
        }

        inner.idle.entry(host).or_default().push_back(conn);
    }

    /// Stops admitting new acquisitions. Connections already checked out are
    /// dropped rather than recycled when they are returned.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let drained: usize = inner.idle.values().map(|q| q.len()).sum();
        inner.idle.clear();
        inner.total = inner.total.saturating_sub(drained);
    }

    /// Immediately tears the pool down: idle connections are dropped and
    /// every queued waiter is failed with `PoolDestroyed`.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        inner.idle.clear();
        inner.waiters.clear();
        inner.total = 0;
        inner.in_use_count.clear();
    }

    pub fn get_stats(&self) -> PoolStats {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        let mut per_host: HashMap<String, HostStats> = HashMap::new();
        for (host, queue) in &inner.idle {
            per_host.entry(host.clone()).or_default().idle = queue.len();
        }
        for (host, count) in &inner.in_use_count {
            per_host.entry(host.clone()).or_default().in_use = *count;
        }
        let idle_connections = per_host.values().map(|s| s.idle).sum();
        let active_connections = per_host.values().map(|s| s.in_use).sum();
        let pending_requests = inner.waiters.values().map(|q| q.len()).sum();
        PoolStats {
            active_connections,
            idle_connections,
            pending_requests,
            connections_by_host: per_host,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            connection_reuses: self.connection_reuses.load(Ordering::Relaxed),
        }
    }

    fn reap_expired(&self) {
        let keep_alive = Duration::from_millis(self.config.keep_alive_timeout_ms);
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let mut reaped = 0usize;
        for queue in inner.idle.values_mut() {
            let before = queue.len();
            queue.retain(|conn| conn.last_used.elapsed() < keep_alive);
            reaped += before - queue.len();
        }
        inner.total = inner.total.saturating_sub(reaped);
    }
}

fn spawn_reaper(pool: Arc<ConnectionPool>) {
    let interval = Duration::from_millis((pool.config.keep_alive_timeout_ms / 2).max(1_000));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if pool.destroyed.load(Ordering::SeqCst) {
                break;
            }
            pool.reap_expired();
        }
    });
}

/// RAII guard returned by `ConnectionPool::acquire`. Returns its connection
/// to the pool on drop.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    connection: Option<Connection>,
}

impl PooledConnection {
    pub fn client(&self) -> &reqwest::Client {
        &self.connection.as_ref().expect("connection taken").client
    }

    pub fn host(&self) -> &str {
        &self.connection.as_ref().expect("connection taken").host
    }

    pub fn id(&self) -> Uuid {
        self.connection.as_ref().expect("connection taken").id
    }

    /// How many times (including this one) this underlying connection has
    /// been handed out by `acquire` — 1 the first time, incrementing on
    /// every subsequent reuse.
    pub fn request_count(&self) -> u32 {
        self.connection.as_ref().expect("connection taken").request_count
    }

    pub fn age(&self) -> Duration {
        self.connection.as_ref().expect("connection taken").created_at.elapsed()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PoolConfig {
        PoolConfig {
            max_per_host: 1,
            max_total: 2,
            keep_alive_timeout_ms: 60_000,
            acquire_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn acquire_then_release_recycles_the_connection() {
        let pool = ConnectionPool::new(config());
        {
            let _conn = pool.acquire("api.example.com").await.unwrap();
            assert_eq!(pool.get_stats().active_connections, 1);
        }
        assert_eq!(pool.get_stats().idle_connections, 1);
        assert_eq!(pool.get_stats().active_connections, 0);
    }

    #[tokio::test]
    async fn reusing_an_idle_connection_bumps_its_request_count_and_the_pool_counter() {
        let pool = ConnectionPool::new(config());
        let first_id = {
            let conn = pool.acquire("api.example.com").await.unwrap();
            assert_eq!(conn.request_count(), 1);
            conn.id()
        };
        let second = pool.acquire("api.example.com").await.unwrap();
        assert_eq!(second.id(), first_id, "should have reused the idle connection");
        assert_eq!(second.request_count(), 2);
        assert_eq!(pool.get_stats().connection_reuses, 1);
        assert_eq!(pool.get_stats().total_requests, 2);
    }

    #[tokio::test]
    async fn empty_host_is_rejected() {
        let pool = ConnectionPool::new(config());
        let result = pool.acquire("").await;
        assert!(matches!(result, Err(PoolError::InvalidHost(_))));
    }

    #[tokio::test]
    async fn second_acquire_waits_then_times_out_at_capacity() {
        let pool = ConnectionPool::new(config());
        let _held = pool.acquire("api.example.com").await.unwrap();
        let result = pool.acquire("api.example.com").await;
        assert!(matches!(result, Err(PoolError::AcquireTimeout(_))));
    }

    #[tokio::test]
    async fn waiter_is_served_when_connection_is_released() {
        let pool = ConnectionPool::new(PoolConfig {
            acquire_timeout_ms: 2_000,
            ..config()
        });
        let first = pool.acquire("api.example.com").await.unwrap();
        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move { pool2.acquire("api.example.com").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(first);
        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn destroy_fails_pending_acquires() {
        let pool = ConnectionPool::new(config());
        pool.destroy();
        let result = pool.acquire("api.example.com").await;
        assert!(matches!(result, Err(PoolError::PoolDestroyed)));
    }

    #[tokio::test]
    async fn close_prevents_new_acquires_but_keeps_old_guard_valid() {
        let pool = ConnectionPool::new(config());
        let conn = pool.acquire("api.example.com").await.unwrap();
        pool.close();
        let result = pool.acquire("api.example.com").await;
        assert!(matches!(result, Err(PoolError::PoolDestroyed)));
        drop(conn);
        assert_eq!(pool.get_stats().idle_connections, 0);
    }
}
