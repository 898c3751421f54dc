//! Event payloads delivered to listeners.

use std::fmt;

use mongo_core::ServerAddress;

use crate::cluster::{ClusterDescription, ClusterId, ServerDescription};
use crate::config::ConnectionPoolSettings;
use crate::connection::ConnectionId;

/// A cluster is being created.
#[derive(Debug, Clone)]
pub struct ClusterOpeningEvent {
    /// The new cluster's id.
    pub cluster_id: ClusterId,
}

impl ClusterOpeningEvent {
    /// Creates a new event.
    pub fn new(cluster_id: ClusterId) -> Self {
        Self { cluster_id }
    }
}

/// A cluster has been closed.
#[derive(Debug, Clone)]
pub struct ClusterClosedEvent {
    /// The closed cluster's id.
    pub cluster_id: ClusterId,
}

impl ClusterClosedEvent {
    /// Creates a new event.
    pub fn new(cluster_id: ClusterId) -> Self {
        Self { cluster_id }
    }
}

/// The cluster description changed.
#[derive(Debug, Clone)]
pub struct ClusterDescriptionChangedEvent {
    /// The cluster's id.
    pub cluster_id: ClusterId,
    /// The description before the change.
    pub previous: ClusterDescription,
    /// The description after the change.
    pub new: ClusterDescription,
}

/// A server was added to a cluster.
#[derive(Debug, Clone)]
pub struct ServerOpeningEvent {
    /// The owning cluster.
    pub cluster_id: ClusterId,
    /// The server's address.
    pub address: ServerAddress,
}

/// A server was removed from a cluster.
#[derive(Debug, Clone)]
pub struct ServerClosedEvent {
    /// The owning cluster.
    pub cluster_id: ClusterId,
    /// The server's address.
    pub address: ServerAddress,
}

/// A heartbeat changed a server's description.
#[derive(Debug, Clone)]
pub struct ServerDescriptionChangedEvent {
    /// The server's address.
    pub address: ServerAddress,
    /// The description before the heartbeat.
    pub previous: ServerDescription,
    /// The description after the heartbeat.
    pub new: ServerDescription,
}

impl fmt::Display for ServerDescriptionChangedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ServerDescriptionChanged[address={}, {} -> {}]",
            self.address,
            self.previous.server_type(),
            self.new.server_type()
        )
    }
}

/// A connection pool was created.
#[derive(Debug, Clone)]
pub struct ConnectionPoolOpenedEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
    /// The pool's settings.
    pub settings: ConnectionPoolSettings,
}

/// A connection pool was closed.
#[derive(Debug, Clone)]
pub struct ConnectionPoolClosedEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
}

/// A caller entered or left a pool's wait queue.
#[derive(Debug, Clone)]
pub struct ConnectionPoolWaitQueueEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
}

/// A pool created a connection.
#[derive(Debug, Clone)]
pub struct ConnectionAddedEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
    /// The new connection.
    pub connection_id: ConnectionId,
}

/// A pool discarded a connection.
#[derive(Debug, Clone)]
pub struct ConnectionRemovedEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
    /// The discarded connection.
    pub connection_id: ConnectionId,
}

/// A connection was handed to a caller.
#[derive(Debug, Clone)]
pub struct ConnectionCheckedOutEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
    /// The checked out connection.
    pub connection_id: ConnectionId,
}

/// A connection was given back to its pool.
#[derive(Debug, Clone)]
pub struct ConnectionCheckedInEvent {
    /// The server the pool connects to.
    pub address: ServerAddress,
    /// The checked in connection.
    pub connection_id: ConnectionId,
}

/// A connection's stream was established.
#[derive(Debug, Clone)]
pub struct ConnectionOpenedEvent {
    /// The remote server.
    pub address: ServerAddress,
    /// The connection.
    pub connection_id: ConnectionId,
}

/// A connection was closed.
#[derive(Debug, Clone)]
pub struct ConnectionClosedEvent {
    /// The remote server.
    pub address: ServerAddress,
    /// The connection.
    pub connection_id: ConnectionId,
}

/// A message was written to or read from a connection.
#[derive(Debug, Clone)]
pub struct ConnectionMessageEvent {
    /// The remote server.
    pub address: ServerAddress,
    /// The connection.
    pub connection_id: ConnectionId,
    /// The request id, or for a reply the id of the request it answers.
    pub request_id: i32,
    /// Size of the message in bytes.
    pub size: usize,
}
