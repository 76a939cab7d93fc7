//! Connection management for the external preimage service.

use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::debug;

use crate::config::{ConnectionMode, ExtPreimageConfig};
use crate::error::TemporaryError;
use crate::rpc::PreimageRpc;

/// Whether a checkout reused an established connection or dialled a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionOrigin {
    Reused,
    Dialed,
}

/// Bounded pool of connections.
///
/// At most `capacity` connections are checked out at once; callers wait up
/// to `acquire_timeout` for one to be returned. Idle connections are reused
/// before new ones are dialled.
pub struct ConnectionPool<R: PreimageRpc> {
    rpc: Arc<R>,
    host: String,
    connect_timeout: Duration,
    acquire_timeout: Duration,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<R::Connection>>>,
}

impl<R: PreimageRpc> ConnectionPool<R> {
    pub fn new(
        rpc: Arc<R>,
        host: impl Into<String>,
        capacity: usize,
        acquire_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            host: host.into(),
            connect_timeout,
            acquire_timeout,
            permits: Arc::new(Semaphore::new(capacity)),
            idle: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
        }
    }

    pub async fn get(
        &self,
    ) -> Result<(PooledConnection<R::Connection>, ConnectionOrigin), TemporaryError> {
        let permit = timeout(self.acquire_timeout, Arc::clone(&self.permits).acquire_owned())
            .await
            .map_err(|_| TemporaryError::PoolTimeout(self.acquire_timeout))?
            .map_err(|_| TemporaryError::Closed)?;

        let reused = self.idle.lock().ok().and_then(|mut idle| idle.pop());
        let (connection, origin) = match reused {
            Some(connection) => (connection, ConnectionOrigin::Reused),
            None => (
                self.rpc.dial(&self.host, self.connect_timeout).await?,
                ConnectionOrigin::Dialed,
            ),
        };
        debug!(host = %self.host, ?origin, "checked out pooled connection");

        Ok((
            PooledConnection {
                connection,
                idle: Arc::clone(&self.idle),
                permits: Arc::clone(&self.permits),
                _permit: permit,
            },
            origin,
        ))
    }

    /// Rejects further checkouts and drops idle connections. Connections
    /// still checked out are dropped when released.
    pub fn close(&self) {
        self.permits.close();
        if let Ok(mut idle) = self.idle.lock() {
            idle.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or_default()
    }
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledConnection<C: Clone> {
    connection: C,
    idle: Arc<Mutex<Vec<C>>>,
    permits: Arc<Semaphore>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Clone> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C: Clone> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if self.permits.is_closed() {
            return;
        }
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(self.connection.clone());
        }
    }
}

enum Slot<C> {
    Empty,
    Connected(C),
    Closed,
}

/// One lazily dialled connection shared by all callers.
///
/// The first connect is serialized so concurrent first calls dial once and
/// never see a half-initialized connection. Once closed it stays closed.
pub struct SingleConnection<R: PreimageRpc> {
    rpc: Arc<R>,
    host: String,
    connect_timeout: Duration,
    slot: tokio::sync::Mutex<Slot<R::Connection>>,
}

impl<R: PreimageRpc> SingleConnection<R> {
    pub fn new(rpc: Arc<R>, host: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            rpc,
            host: host.into(),
            connect_timeout,
            slot: tokio::sync::Mutex::new(Slot::Empty),
        }
    }

    pub async fn get(&self) -> Result<(R::Connection, ConnectionOrigin), TemporaryError> {
        let mut slot = self.slot.lock().await;
        match &*slot {
            Slot::Closed => return Err(TemporaryError::Closed),
            Slot::Connected(connection) => {
                debug!(host = %self.host, "reusing external preimage connection");
                return Ok((connection.clone(), ConnectionOrigin::Reused));
            }
            Slot::Empty => {}
        }

        let connection = self.rpc.dial(&self.host, self.connect_timeout).await?;
        debug!(host = %self.host, "dialed external preimage connection");
        *slot = Slot::Connected(connection.clone());
        Ok((connection, ConnectionOrigin::Dialed))
    }

    /// Drops the connection and rejects later checkouts.
    pub async fn close(&self) {
        *self.slot.lock().await = Slot::Closed;
    }

    pub async fn is_closed(&self) -> bool {
        matches!(*self.slot.lock().await, Slot::Closed)
    }
}

/// Connection strategy selected by [`ConnectionMode`].
pub enum Connector<R: PreimageRpc> {
    Single(SingleConnection<R>),
    Pooled(ConnectionPool<R>),
}

/// A connection held for the duration of one call.
pub enum Checkout<C: Clone> {
    Shared(C),
    Pooled(PooledConnection<C>),
}

impl<C: Clone> Deref for Checkout<C> {
    type Target = C;

    fn deref(&self) -> &C {
        match self {
            Self::Shared(connection) => connection,
            Self::Pooled(connection) => &**connection,
        }
    }
}

impl<R: PreimageRpc> Connector<R> {
    pub fn from_config(rpc: Arc<R>, config: &ExtPreimageConfig) -> Self {
        match config.mode {
            ConnectionMode::Single => Self::Single(SingleConnection::new(
                rpc,
                config.host.clone(),
                config.connect_timeout,
            )),
            ConnectionMode::Pooled => Self::Pooled(ConnectionPool::new(
                rpc,
                config.host.clone(),
                config.pool_capacity,
                config.pool_acquire_timeout,
                config.connect_timeout,
            )),
        }
    }

    pub async fn checkout(
        &self,
    ) -> Result<(Checkout<R::Connection>, ConnectionOrigin), TemporaryError> {
        match self {
            Self::Single(single) => {
                let (connection, origin) = single.get().await?;
                Ok((Checkout::Shared(connection), origin))
            }
            Self::Pooled(pool) => {
                let (connection, origin) = pool.get().await?;
                Ok((Checkout::Pooled(connection), origin))
            }
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Single(single) => single.close().await,
            Self::Pooled(pool) => pool.close(),
        }
    }
}
