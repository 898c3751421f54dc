//! A monitored server with its connection pool.

use std::sync::Arc;

use mongo_core::{Result, ServerAddress};
use tokio::sync::{mpsc, watch, Notify};
use tokio_util::sync::CancellationToken;

use super::description::ServerDescription;
use super::monitor::ServerMonitor;
use super::scheduler::BackgroundScheduler;
use super::ClusterId;
use crate::config::{ConnectionPoolSettings, ServerSettings};
use crate::connection::{ConnectionPool, InternalConnectionFactory, PooledConnection, StreamFactory};
use crate::listener::{ClusterListeners, ServerClosedEvent, ServerOpeningEvent};
use crate::security::MongoCredential;

/// One server of a cluster: its connection pool plus the latest description
/// published by its monitor.
#[derive(Debug)]
pub struct ClusterableServer {
    cluster_id: ClusterId,
    address: ServerAddress,
    pool: ConnectionPool,
    description_rx: watch::Receiver<ServerDescription>,
    check_now: Arc<Notify>,
    token: CancellationToken,
    listeners: ClusterListeners,
}

impl ClusterableServer {
    /// Returns the server's address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the latest description.
    pub fn description(&self) -> ServerDescription {
        self.description_rx.borrow().clone()
    }

    /// Checks out a connection from the server's pool.
    pub async fn connection(&self) -> Result<PooledConnection> {
        self.pool.acquire().await
    }

    /// Returns the server's connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Asks the monitor to run a heartbeat as soon as allowed.
    pub fn request_check(&self) {
        self.check_now.notify_one();
    }

    /// Discards pooled connections and asks for a fresh heartbeat.
    pub fn invalidate(&self) {
        self.pool.invalidate();
        self.request_check();
    }

    /// Returns `true` once the server has been closed.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Stops the monitor and closes the pool.
    pub async fn close(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();
        self.pool.close().await;
        self.listeners.server().server_closed(&ServerClosedEvent {
            cluster_id: self.cluster_id.clone(),
            address: self.address.clone(),
        });
    }
}

/// Builds servers, wiring pools and monitors from the cluster's settings.
#[derive(Debug, Clone)]
pub struct ClusterableServerFactory {
    cluster_id: ClusterId,
    server_settings: ServerSettings,
    pool_settings: ConnectionPoolSettings,
    stream_factory: Arc<dyn StreamFactory>,
    heartbeat_stream_factory: Arc<dyn StreamFactory>,
    credentials: Vec<MongoCredential>,
    listeners: ClusterListeners,
}

impl ClusterableServerFactory {
    /// Creates a server factory.
    pub fn new(
        cluster_id: ClusterId,
        server_settings: ServerSettings,
        pool_settings: ConnectionPoolSettings,
        stream_factory: Arc<dyn StreamFactory>,
        heartbeat_stream_factory: Arc<dyn StreamFactory>,
        credentials: Vec<MongoCredential>,
        listeners: ClusterListeners,
    ) -> Self {
        Self {
            cluster_id,
            server_settings,
            pool_settings,
            stream_factory,
            heartbeat_stream_factory,
            credentials,
            listeners,
        }
    }

    /// Returns the listeners handed to every server.
    pub fn listeners(&self) -> &ClusterListeners {
        &self.listeners
    }

    /// Creates a server for `address` and starts its monitor on `scheduler`.
    ///
    /// Description changes are sent on `changes`.
    pub(crate) fn create(
        &self,
        address: ServerAddress,
        scheduler: &BackgroundScheduler,
        changes: mpsc::UnboundedSender<ServerDescription>,
    ) -> Arc<ClusterableServer> {
        self.listeners.server().server_opening(&ServerOpeningEvent {
            cluster_id: self.cluster_id.clone(),
            address: address.clone(),
        });

        let connection_factory = InternalConnectionFactory::new(
            address.clone(),
            Arc::clone(&self.stream_factory),
            self.credentials.clone(),
            Arc::clone(self.listeners.connection()),
        );
        let pool = ConnectionPool::new(
            self.pool_settings.clone(),
            connection_factory,
            Arc::clone(self.listeners.connection_pool()),
        );

        let (description_tx, description_rx) = watch::channel(ServerDescription::unknown(address.clone()));
        let check_now = Arc::new(Notify::new());
        let token = scheduler.child_token();

        let monitor = ServerMonitor::new(
            address.clone(),
            self.server_settings.clone(),
            Arc::clone(&self.heartbeat_stream_factory),
            Arc::clone(self.listeners.connection()),
            Arc::clone(self.listeners.server()),
            pool.clone(),
            description_tx,
            changes,
            Arc::clone(&check_now),
            token.clone(),
        );
        scheduler.spawn("server_monitor", monitor.run());

        Arc::new(ClusterableServer {
            cluster_id: self.cluster_id.clone(),
            address,
            pool,
            description_rx,
            check_now,
            token,
            listeners: self.listeners.clone(),
        })
    }
}
