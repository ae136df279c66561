use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use redis::{Client, aio::ConnectionManager};

use crate::TollgateError;

/// A round-robin set of [`redis::aio::ConnectionManager`]s.
///
/// Every manager multiplexes requests over its own connection and reconnects on failure.
/// Several managers spread load when a single connection becomes the bottleneck. Clones share
/// the managers and the round-robin cursor.
#[derive(Clone)]
pub struct RedisConnectionPool {
    connection_managers: Arc<Vec<ConnectionManager>>,
    track_index: Arc<AtomicUsize>,
}

impl RedisConnectionPool {
    /// Create a pool with a single connection manager.
    pub async fn default_from_client(client: Client) -> Result<Self, TollgateError> {
        Self::from_client(client, 1).await
    }

    /// Create a pool of `connection_count` connection managers.
    pub async fn from_client(
        client: Client,
        connection_count: usize,
    ) -> Result<Self, TollgateError> {
        if connection_count == 0 {
            return Err(TollgateError::invalid_configuration(
                "connection count must be greater than 0",
            ));
        }

        let mut connection_managers = Vec::with_capacity(connection_count);

        for _ in 0..connection_count {
            connection_managers.push(client.get_connection_manager().await?);
        }

        Ok(Self {
            connection_managers: Arc::new(connection_managers),
            track_index: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of connection managers in the pool.
    pub fn len(&self) -> usize {
        self.connection_managers.len()
    }

    /// Returns `true` if the pool holds no connection manager.
    ///
    /// Never the case for pools built by [`RedisConnectionPool::from_client`], which rejects a
    /// count of 0, or converted from a single [`ConnectionManager`].
    pub fn is_empty(&self) -> bool {
        self.connection_managers.is_empty()
    }

    /// Next connection manager in round-robin order.
    pub(crate) fn get(&self) -> ConnectionManager {
        let index = self.track_index.fetch_add(1, Ordering::Relaxed);
        self.connection_managers[index % self.connection_managers.len()].clone()
    } // end method get
} // end impl RedisConnectionPool

impl fmt::Debug for RedisConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConnectionPool")
            .field("connections", &self.len())
            .field("track_index", &self.track_index.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl From<ConnectionManager> for RedisConnectionPool {
    fn from(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_managers: Arc::new(vec![connection_manager]),
            track_index: Arc::new(AtomicUsize::new(0)),
        }
    }
}
