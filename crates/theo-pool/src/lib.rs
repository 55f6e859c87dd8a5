//! Per-host connection pool for outbound provider traffic.

pub mod pool;

pub use pool::{Connection, ConnectionPool, HostStats, PoolError, PoolStats, PooledConnection};
