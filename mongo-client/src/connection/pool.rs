//! Bounded pool of connections to one server.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use mongo_core::{MongoError, Result, ServerAddress};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::instrument;

use super::connection::Connection;
use super::factory::InternalConnectionFactory;
use crate::config::ConnectionPoolSettings;
use crate::listener::{
    ConnectionAddedEvent, ConnectionCheckedInEvent, ConnectionCheckedOutEvent,
    ConnectionPoolClosedEvent, ConnectionPoolListener, ConnectionPoolOpenedEvent,
    ConnectionPoolWaitQueueEvent, ConnectionRemovedEvent,
};

struct IdleConnection {
    connection: Connection,
    generation: u64,
    idle_since: Instant,
}

struct PoolInner {
    address: ServerAddress,
    settings: ConnectionPoolSettings,
    factory: InternalConnectionFactory,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    generation: AtomicU64,
    waiters: AtomicUsize,
    closed: AtomicBool,
    listener: Arc<dyn ConnectionPoolListener>,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_perished(&self, connection: &Connection, generation: u64, idle_since: Option<Instant>) -> bool {
        if connection.is_closed() || connection.has_pending_request() {
            return true;
        }
        if generation != self.generation.load(Ordering::Acquire) {
            return true;
        }
        if let Some(life_time) = self.settings.max_connection_life_time() {
            if connection.created_at().elapsed() > life_time {
                return true;
            }
        }
        match (self.settings.max_connection_idle_time(), idle_since) {
            (Some(idle_time), Some(since)) => since.elapsed() > idle_time,
            _ => false,
        }
    }

    fn remove(&self, connection: Connection, reason: &str) {
        if connection.is_closed() {
            tracing::warn!(connection_id = %connection.id(), address = %self.address, reason, "discarding connection");
        } else {
            tracing::debug!(connection_id = %connection.id(), address = %self.address, reason, "discarding connection");
        }
        self.listener.connection_removed(&ConnectionRemovedEvent {
            address: self.address.clone(),
            connection_id: connection.id(),
        });
    }

    fn release(&self, connection: Connection, generation: u64, discard: bool) {
        self.listener.connection_checked_in(&ConnectionCheckedInEvent {
            address: self.address.clone(),
            connection_id: connection.id(),
        });

        if discard {
            self.remove(connection, "discarded by caller");
        } else if self.closed.load(Ordering::Acquire) {
            self.remove(connection, "pool closed");
        } else if connection.has_pending_request() {
            self.remove(connection, "request still in flight");
        } else if self.is_perished(&connection, generation, None) {
            self.remove(connection, "perished");
        } else {
            self.idle().push_back(IdleConnection {
                connection,
                generation,
                idle_since: Instant::now(),
            });
        }
    }

    fn closed_error(&self) -> MongoError {
        MongoError::Connection(format!("connection pool for {} is closed", self.address))
    }
}

/// A bounded pool of authenticated connections to one server.
///
/// Cloning the pool yields another handle to the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates an empty pool. Connections are opened on demand.
    pub fn new(
        settings: ConnectionPoolSettings,
        factory: InternalConnectionFactory,
        listener: Arc<dyn ConnectionPoolListener>,
    ) -> Self {
        let address = factory.address().clone();
        listener.connection_pool_opened(&ConnectionPoolOpenedEvent {
            address: address.clone(),
            settings: settings.clone(),
        });

        Self {
            inner: Arc::new(PoolInner {
                address,
                permits: Arc::new(Semaphore::new(settings.max_size())),
                settings,
                factory,
                idle: Mutex::new(VecDeque::new()),
                generation: AtomicU64::new(0),
                waiters: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                listener,
            }),
        }
    }

    /// Returns the server this pool connects to.
    pub fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    /// Returns the pool settings.
    pub fn settings(&self) -> &ConnectionPoolSettings {
        &self.inner.settings
    }

    /// Returns the current generation. Connections from older generations are discarded.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Returns the number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Returns the number of connections that could still be checked out without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Returns `true` once the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Checks out a connection, opening one if no idle connection is usable.
    ///
    /// Waits up to `max_wait_time` when the pool is exhausted. Fails at once
    /// with [`MongoError::WaitQueueFull`] when too many callers already wait.
    #[instrument(name = "connection_pool.acquire", skip(self), fields(address = %self.inner.address))]
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(inner.closed_error());
        }

        let permit = match Arc::clone(&inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(inner.closed_error()),
            Err(TryAcquireError::NoPermits) => self.wait_for_permit().await?,
        };

        let generation = self.generation();
        let reused = loop {
            let candidate = inner.idle().pop_back();
            match candidate {
                Some(idle) if inner.is_perished(&idle.connection, idle.generation, Some(idle.idle_since)) => {
                    inner.remove(idle.connection, "perished");
                }
                Some(idle) => break Some((idle.connection, idle.generation)),
                None => break None,
            }
        };

        let (connection, generation) = match reused {
            Some(found) => found,
            None => {
                let connection = inner.factory.create().await?;
                inner.listener.connection_added(&ConnectionAddedEvent {
                    address: inner.address.clone(),
                    connection_id: connection.id(),
                });
                (connection, generation)
            }
        };

        tracing::debug!(connection_id = %connection.id(), "checked out connection");
        inner.listener.connection_checked_out(&ConnectionCheckedOutEvent {
            address: inner.address.clone(),
            connection_id: connection.id(),
        });

        Ok(PooledConnection {
            connection: Some(connection),
            generation,
            discard: false,
            pool: Arc::clone(inner),
            _permit: permit,
        })
    }

    async fn wait_for_permit(&self) -> Result<OwnedSemaphorePermit> {
        let inner = &self.inner;
        let max_waiters = inner.settings.max_wait_queue_size();
        if inner.waiters.fetch_add(1, Ordering::AcqRel) >= max_waiters {
            inner.waiters.fetch_sub(1, Ordering::AcqRel);
            return Err(MongoError::WaitQueueFull {
                address: inner.address.clone(),
                max_size: max_waiters,
            });
        }

        let event = ConnectionPoolWaitQueueEvent {
            address: inner.address.clone(),
        };
        inner.listener.wait_queue_entered(&event);
        let wait = inner.settings.max_wait_time();
        let acquired = tokio::time::timeout(wait, Arc::clone(&inner.permits).acquire_owned()).await;
        inner.waiters.fetch_sub(1, Ordering::AcqRel);
        inner.listener.wait_queue_exited(&event);

        match acquired {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(inner.closed_error()),
            Err(_) => {
                tracing::debug!(timeout = ?wait, "timed out waiting for a connection");
                Err(MongoError::PoolTimeout {
                    address: inner.address.clone(),
                    timeout: wait,
                })
            }
        }
    }

    /// Starts a new generation: idle connections are discarded now and
    /// checked out connections when they are returned.
    pub fn invalidate(&self) {
        let generation = self.inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        for idle in drained {
            self.inner.remove(idle.connection, "pool invalidated");
        }
        tracing::debug!(address = %self.inner.address, generation, "invalidated connection pool");
    }

    /// Closes the pool. Idle connections are closed and further acquires fail.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        for mut idle in drained {
            idle.connection.close().await;
            self.inner.remove(idle.connection, "pool closed");
        }

        self.inner.listener.connection_pool_closed(&ConnectionPoolClosedEvent {
            address: self.inner.address.clone(),
        });
        tracing::debug!(address = %self.inner.address, "closed connection pool");
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.inner.address)
            .field("generation", &self.generation())
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dropping the guard returns the connection to its pool;
/// [`discard`](Self::discard) drops it from the pool instead.
pub struct PooledConnection {
    // Only taken in `Drop`.
    connection: Option<Connection>,
    generation: u64,
    discard: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Removes the connection from the pool instead of returning it.
    pub fn discard(mut self) {
        self.discard = true;
    }

    /// Returns the pool generation the connection belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("pooled connection used after release")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().expect("pooled connection used after release")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection, self.generation, self.discard);
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("generation", &self.generation)
            .finish()
    }
}
