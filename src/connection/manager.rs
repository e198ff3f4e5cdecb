//! Keyed registry of broker connections.
//!
//! One entry per `(endpoint, queue)`. The registry-wide lock only guards
//! insert-if-absent; health checks and repairs of an entry happen under that
//! entry's own async lock, so callers sharing a key never race to open
//! duplicate connections and callers on different keys never wait on each
//! other.
//!
//! ```text
//! acquire(key)
//!   ├─ registry lock:  entry = entries[key] or insert new
//!   └─ entry lock:     connection dead? abort + reconnect
//!                      channel dead?    abort + reopen
//!                      → live channel
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use super::WorkerPool;
use crate::error::{Result, RpcError};
use crate::transport::{Broker, BrokerChannel, BrokerConnection};

/// Identity of a managed connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub endpoint: String,
    pub queue: String,
}

impl ConnectionKey {
    pub fn new(endpoint: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            queue: queue.into(),
        }
    }

    /// Thread name prefix for this key's worker pool.
    fn pool_name(&self) -> String {
        format!("rmq-{}", self.queue)
    }
}

impl std::fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.endpoint, self.queue)
    }
}

/// Connection state for one key.
struct ConnectionEntry {
    pool_size: usize,
    pool: Option<WorkerPool>,
    connection: Option<Arc<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
    /// Set once released; a closed entry is never reopened.
    closed: bool,
}

impl ConnectionEntry {
    fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            pool: None,
            connection: None,
            channel: None,
            closed: false,
        }
    }

    /// Return a live channel, replacing a dead connection or channel first.
    async fn live_channel(
        &mut self,
        broker: &dyn Broker,
        key: &ConnectionKey,
    ) -> Result<Arc<dyn BrokerChannel>> {
        if self.pool.is_none() {
            self.pool = Some(WorkerPool::new(key.pool_name(), self.pool_size)?);
        }

        let healthy = self.connection.clone().filter(|c| c.is_alive());
        let connection = match healthy {
            Some(connection) => connection,
            None => {
                if let Some(stale) = self.connection.take() {
                    tracing::warn!("Connection to {} is dead, reconnecting", key);
                    stale.abort();
                }
                if let Some(stale) = self.channel.take() {
                    stale.abort();
                }
                let pool = self
                    .pool
                    .as_ref()
                    .ok_or_else(|| RpcError::Transport("worker pool unavailable".into()))?;
                let connection = broker.connect(&key.endpoint, pool).await?;
                tracing::info!("Opened connection for {}", key);
                self.connection = Some(connection.clone());
                connection
            }
        };

        if let Some(channel) = self.channel.clone().filter(|c| c.is_alive()) {
            return Ok(channel);
        }
        if let Some(stale) = self.channel.take() {
            tracing::debug!("Channel for {} is dead, reopening", key);
            stale.abort();
        }
        let channel = connection.open_channel().await?;
        self.channel = Some(channel.clone());
        Ok(channel)
    }

    /// Abort the channel and connection, then stop the pool. Backends run
    /// their close handshakes off the pool, so stopping it does not cut
    /// them short.
    fn close(&mut self) {
        self.closed = true;
        if let Some(channel) = self.channel.take() {
            channel.abort();
        }
        if let Some(connection) = self.connection.take() {
            connection.abort();
        }
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

/// Owns the broker connections of a process (or of a group of clients and
/// servers that should share them).
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    entries: Mutex<HashMap<ConnectionKey, Arc<AsyncMutex<ConnectionEntry>>>>,
}

impl ConnectionManager {
    /// Create a manager over a broker backend.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<ConnectionKey, Arc<AsyncMutex<ConnectionEntry>>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Get a live channel for `key`, opening or repairing the connection and
    /// channel as needed.
    ///
    /// `pool_size` only applies when the entry is first created. Transport
    /// errors are returned as-is; there is no internal retry.
    pub async fn acquire(
        &self,
        key: &ConnectionKey,
        pool_size: usize,
    ) -> Result<Arc<dyn BrokerChannel>> {
        loop {
            let slot = self
                .lock_entries()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(ConnectionEntry::new(pool_size))))
                .clone();

            let mut entry = slot.lock().await;
            if entry.closed {
                // Released while we waited; the registry has a fresh slot (or none).
                continue;
            }
            return entry.live_channel(self.broker.as_ref(), key).await;
        }
    }

    /// Abort the connection for `key`, stop its worker pool and forget it.
    pub async fn release(&self, key: &ConnectionKey) {
        let slot = self.lock_entries().remove(key);
        if let Some(slot) = slot {
            slot.lock().await.close();
            tracing::debug!("Released connection for {}", key);
        }
    }

    /// Release every entry.
    pub async fn release_all(&self) {
        let slots: Vec<_> = self.lock_entries().drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            slot.lock().await.close();
        }
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.lock_entries().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        let slots: Vec<_> = self.lock_entries().drain().collect();
        for (key, slot) in slots {
            match slot.try_lock() {
                Ok(mut entry) => entry.close(),
                // Only possible if an `acquire` future was leaked mid-flight.
                Err(_) => tracing::warn!("Connection for {} still in use, leaving it open", key),
            }
        }
    }
}
