use super::{Connection, ConnectionKind, ConnectionListener, ConnectionSpec, Subscription};
use crate::{dataset::cut::Cut, fetcher::Fetcher};
use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PoolError {
    #[error("connection {key} is not tracked by the pool")]
    UnknownConnection { key: String },
    #[error("connection {key} was released more times than acquired")]
    UsageUnderflow { key: String },
}

/// Deduplicates connections by key and evicts them once nobody uses them.
pub struct ConnectionPool {
    dataset_id: String,
    fetcher: Arc<dyn Fetcher>,
    discard_stale_responses: bool,
    connections: parking_lot::Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionPool {
    pub fn new(
        dataset_id: impl Into<String>,
        fetcher: Arc<dyn Fetcher>,
        discard_stale_responses: bool,
    ) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            fetcher,
            discard_stale_responses,
            connections: Default::default(),
        }
    }

    pub fn dataset_id(&self) -> &str {
        &self.dataset_id
    }

    /// Returns the pooled connection for `spec`, creating and fetching it
    /// under `cut` when there is none. Every call must be matched by one
    /// [`release_connection`](Self::release_connection).
    pub fn get_connection(&self, spec: &ConnectionSpec, cut: &Cut) -> Arc<Connection> {
        self.acquire(spec, cut, |_| ()).0
    }

    /// Same as [`get_connection`](Self::get_connection) but subscribes
    /// `listener` before the initial request can complete.
    pub fn get_connection_with(
        &self,
        spec: &ConnectionSpec,
        cut: &Cut,
        listener: Weak<dyn ConnectionListener>,
    ) -> (Arc<Connection>, Subscription) {
        self.acquire(spec, cut, |connection| connection.subscribe(listener))
    }

    fn acquire<T>(
        &self,
        spec: &ConnectionSpec,
        cut: &Cut,
        on_acquired: impl FnOnce(&Connection) -> T,
    ) -> (Arc<Connection>, T) {
        let key = spec.key();
        let (connection, acquired, created) = {
            let mut connections = self.connections.lock();
            let (connection, created) = match connections.get(&key) {
                Some(connection) => (Arc::clone(connection), false),
                None => {
                    let connection = Arc::new(Connection::new(
                        key.clone(),
                        spec.clone(),
                        spec.path(&self.dataset_id),
                        cut.clone(),
                        Arc::clone(&self.fetcher),
                        self.discard_stale_responses,
                    ));
                    connections.insert(key.clone(), Arc::clone(&connection));
                    (connection, true)
                }
            };
            let usage = connection.retain();
            log::debug!(target: "connection_pool", "acquired {} (usage {})", key, usage);
            let acquired = on_acquired(&connection);
            (connection, acquired, created)
        };
        if created {
            log::info!(target: "connection_pool", "created connection {}", key);
            connection.fetch();
        }
        (connection, acquired)
    }

    pub fn release_connection(&self, connection: &Arc<Connection>) -> Result<(), PoolError> {
        let key = connection.key().to_string();
        let mut connections = self.connections.lock();
        match connections.get(&key) {
            Some(tracked) if Arc::ptr_eq(tracked, connection) => {}
            _ => {
                log::error!(target: "connection_pool", "release of untracked connection {}", key);
                return Err(PoolError::UnknownConnection { key });
            }
        }
        // Tracked connections are retained at least once; an underflow
        // means usage was dropped outside of the pool.
        let usage = match connection.release() {
            Some(usage) => usage,
            None => {
                log::error!(target: "connection_pool", "usage underflow on {}", key);
                return Err(PoolError::UsageUnderflow { key });
            }
        };
        if usage == 0 {
            connections.remove(&key);
            log::info!(target: "connection_pool", "evicted connection {}", key);
        } else {
            log::debug!(target: "connection_pool", "released {} (usage {})", key, usage);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<Connection>> {
        self.connections.lock().get(key).cloned()
    }

    /// Snapshot of every pooled connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Any pooled observations connection of `dimension`.
    pub fn find_observations(&self, dimension: &str) -> Option<Arc<Connection>> {
        self.connections
            .lock()
            .values()
            .find(|c| c.kind() == &ConnectionKind::Observations && c.dimension() == Some(dimension))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }
}
