//! Cluster creation.

use std::sync::Arc;

use mongo_core::{MongoError, Result};
use tokio::runtime::Handle;
use tracing::instrument;

use super::cluster::{Cluster, ClusterId, MultiServerCluster, SingleServerCluster};
use super::scheduler::BackgroundScheduler;
use super::server::ClusterableServerFactory;
use crate::config::{ClusterConnectionMode, ClusterSettings, ConnectionPoolSettings, ServerSettings};
use crate::connection::StreamFactory;
use crate::listener::{ClusterListeners, ClusterOpeningEvent};
use crate::security::MongoCredential;

/// Creates clusters.
pub trait ClusterFactory: Send + Sync {
    /// Creates a cluster and starts monitoring its servers.
    ///
    /// Regular connections come from `stream_factory`, heartbeat connections
    /// from `heartbeat_stream_factory`. Every regular connection is
    /// authenticated with each of `credentials`.
    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        cluster_settings: ClusterSettings,
        server_settings: ServerSettings,
        pool_settings: ConnectionPoolSettings,
        stream_factory: Arc<dyn StreamFactory>,
        heartbeat_stream_factory: Arc<dyn StreamFactory>,
        credentials: Vec<MongoCredential>,
        listeners: ClusterListeners,
    ) -> Result<Cluster>;
}

/// The standard [`ClusterFactory`].
///
/// Must be called from within a Tokio runtime; background tasks are spawned
/// onto the current runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClusterFactory;

impl DefaultClusterFactory {
    /// Creates the factory.
    pub fn new() -> Self {
        Self
    }
}

impl ClusterFactory for DefaultClusterFactory {
    #[instrument(name = "cluster_factory.create", skip_all, fields(mode = %cluster_settings.mode()))]
    fn create(
        &self,
        cluster_settings: ClusterSettings,
        server_settings: ServerSettings,
        pool_settings: ConnectionPoolSettings,
        stream_factory: Arc<dyn StreamFactory>,
        heartbeat_stream_factory: Arc<dyn StreamFactory>,
        credentials: Vec<MongoCredential>,
        listeners: ClusterListeners,
    ) -> Result<Cluster> {
        let handle = Handle::try_current().map_err(|e| {
            MongoError::Configuration(format!("creating a cluster requires a Tokio runtime: {}", e))
        })?;

        let id = ClusterId::next();
        let cluster_listener = Arc::clone(listeners.cluster());
        let scheduler = BackgroundScheduler::new(handle, cluster_settings.hosts().len() + 1);
        let server_factory = ClusterableServerFactory::new(
            id.clone(),
            server_settings,
            pool_settings,
            stream_factory,
            heartbeat_stream_factory,
            credentials,
            listeners,
        );

        cluster_listener.cluster_opening(&ClusterOpeningEvent::new(id.clone()));
        tracing::info!(
            cluster_id = %id,
            hosts = ?cluster_settings.hosts(),
            "opening cluster"
        );

        let cluster = match cluster_settings.mode() {
            ClusterConnectionMode::Single => Cluster::Single(SingleServerCluster::new(
                id,
                cluster_settings,
                server_factory,
                scheduler,
                cluster_listener,
            )?),
            ClusterConnectionMode::Multiple => Cluster::Multi(MultiServerCluster::new(
                id,
                cluster_settings,
                server_factory,
                scheduler,
                cluster_listener,
            )?),
        };
        Ok(cluster)
    }
}
