//! Listener traits for cluster, server, pool and connection events.
//!
//! Every trait method has an empty default body, so an implementation only
//! overrides what it cares about. [`NoOpListener`] implements all of them and
//! stands in for any listener left unset in [`ClusterListeners`].

mod events;

use std::fmt;
use std::sync::Arc;

pub use events::{
    ClusterClosedEvent, ClusterDescriptionChangedEvent, ClusterOpeningEvent, ConnectionAddedEvent,
    ConnectionCheckedInEvent, ConnectionCheckedOutEvent, ConnectionClosedEvent,
    ConnectionMessageEvent, ConnectionOpenedEvent, ConnectionPoolClosedEvent,
    ConnectionPoolOpenedEvent, ConnectionPoolWaitQueueEvent, ConnectionRemovedEvent,
    ServerClosedEvent, ServerDescriptionChangedEvent, ServerOpeningEvent,
};

/// Receives cluster lifecycle and topology events.
pub trait ClusterListener: Send + Sync {
    /// Called when a cluster is created, before any server is monitored.
    fn cluster_opening(&self, _event: &ClusterOpeningEvent) {}

    /// Called once a cluster has been closed.
    fn cluster_closed(&self, _event: &ClusterClosedEvent) {}

    /// Called whenever the cluster description changes.
    fn cluster_description_changed(&self, _event: &ClusterDescriptionChangedEvent) {}
}

/// Receives per-server monitoring events.
pub trait ServerListener: Send + Sync {
    /// Called when a server is added to a cluster.
    fn server_opening(&self, _event: &ServerOpeningEvent) {}

    /// Called when a server is removed from a cluster or the cluster closes.
    fn server_closed(&self, _event: &ServerClosedEvent) {}

    /// Called when a heartbeat produces a description different from the previous one.
    fn server_description_changed(&self, _event: &ServerDescriptionChangedEvent) {}
}

/// Receives connection pool events.
pub trait ConnectionPoolListener: Send + Sync {
    /// Called when a pool is created.
    fn connection_pool_opened(&self, _event: &ConnectionPoolOpenedEvent) {}

    /// Called when a pool is closed.
    fn connection_pool_closed(&self, _event: &ConnectionPoolClosedEvent) {}

    /// Called when a caller starts waiting for a connection.
    fn wait_queue_entered(&self, _event: &ConnectionPoolWaitQueueEvent) {}

    /// Called when a caller stops waiting, with or without a connection.
    fn wait_queue_exited(&self, _event: &ConnectionPoolWaitQueueEvent) {}

    /// Called when the pool creates a connection.
    fn connection_added(&self, _event: &ConnectionAddedEvent) {}

    /// Called when the pool discards a connection.
    fn connection_removed(&self, _event: &ConnectionRemovedEvent) {}

    /// Called when a connection is handed to a caller.
    fn connection_checked_out(&self, _event: &ConnectionCheckedOutEvent) {}

    /// Called when a caller gives a connection back.
    fn connection_checked_in(&self, _event: &ConnectionCheckedInEvent) {}
}

/// Receives events for individual connections.
pub trait ConnectionListener: Send + Sync {
    /// Called once the stream of a connection is established.
    fn connection_opened(&self, _event: &ConnectionOpenedEvent) {}

    /// Called when a connection is closed.
    fn connection_closed(&self, _event: &ConnectionClosedEvent) {}

    /// Called after a message has been written.
    fn message_sent(&self, _event: &ConnectionMessageEvent) {}

    /// Called after a reply has been read.
    fn message_received(&self, _event: &ConnectionMessageEvent) {}
}

impl fmt::Debug for dyn ClusterListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClusterListener")
    }
}

impl fmt::Debug for dyn ServerListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerListener")
    }
}

impl fmt::Debug for dyn ConnectionPoolListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionPoolListener")
    }
}

impl fmt::Debug for dyn ConnectionListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionListener")
    }
}

/// A listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpListener;

impl ClusterListener for NoOpListener {}
impl ServerListener for NoOpListener {}
impl ConnectionPoolListener for NoOpListener {}
impl ConnectionListener for NoOpListener {}

/// The set of listeners handed to a cluster factory.
#[derive(Debug, Clone)]
pub struct ClusterListeners {
    cluster: Arc<dyn ClusterListener>,
    server: Arc<dyn ServerListener>,
    connection_pool: Arc<dyn ConnectionPoolListener>,
    connection: Arc<dyn ConnectionListener>,
}

impl ClusterListeners {
    /// Creates a listener set where every listener is a [`NoOpListener`].
    pub fn new() -> Self {
        let noop = Arc::new(NoOpListener);
        Self {
            cluster: noop.clone(),
            server: noop.clone(),
            connection_pool: noop.clone(),
            connection: noop,
        }
    }

    /// Sets the cluster listener.
    pub fn with_cluster_listener(mut self, listener: Arc<dyn ClusterListener>) -> Self {
        self.cluster = listener;
        self
    }

    /// Sets the server listener.
    pub fn with_server_listener(mut self, listener: Arc<dyn ServerListener>) -> Self {
        self.server = listener;
        self
    }

    /// Sets the connection pool listener.
    pub fn with_connection_pool_listener(mut self, listener: Arc<dyn ConnectionPoolListener>) -> Self {
        self.connection_pool = listener;
        self
    }

    /// Sets the connection listener.
    pub fn with_connection_listener(mut self, listener: Arc<dyn ConnectionListener>) -> Self {
        self.connection = listener;
        self
    }

    /// Returns the cluster listener.
    pub fn cluster(&self) -> &Arc<dyn ClusterListener> {
        &self.cluster
    }

    /// Returns the server listener.
    pub fn server(&self) -> &Arc<dyn ServerListener> {
        &self.server
    }

    /// Returns the connection pool listener.
    pub fn connection_pool(&self) -> &Arc<dyn ConnectionPoolListener> {
        &self.connection_pool
    }

    /// Returns the connection listener.
    pub fn connection(&self) -> &Arc<dyn ConnectionListener> {
        &self.connection
    }
}

impl Default for ClusterListeners {
    fn default() -> Self {
        Self::new()
    }
}
