//! Single and multi server clusters.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use mongo_core::{MongoError, Result, ServerAddress};
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::instrument;

use super::description::{ClusterDescription, ClusterType, ServerDescription, ServerType};
use super::scheduler::BackgroundScheduler;
use super::selector::ServerSelector;
use super::server::{ClusterableServer, ClusterableServerFactory};
use crate::config::{ClusterConnectionMode, ClusterSettings};
use crate::listener::{ClusterClosedEvent, ClusterDescriptionChangedEvent, ClusterListener};

/// Identifier of a cluster, unique within the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClusterId(String);

impl ClusterId {
    /// Allocates the next id. Ids are decimal and strictly increasing, starting at 1.
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed).to_string())
    }

    /// Returns the id as a string.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClusterId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ClusterInner {
    id: ClusterId,
    settings: ClusterSettings,
    server_factory: ClusterableServerFactory,
    servers: Mutex<HashMap<ServerAddress, Arc<ClusterableServer>>>,
    cluster_type: Mutex<ClusterType>,
    description_tx: watch::Sender<ClusterDescription>,
    changes_tx: mpsc::UnboundedSender<ServerDescription>,
    scheduler: BackgroundScheduler,
    listener: Arc<dyn ClusterListener>,
    closed: AtomicBool,
}

impl ClusterInner {
    fn servers(&self) -> MutexGuard<'_, HashMap<ServerAddress, Arc<ClusterableServer>>> {
        self.servers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_cluster_type(&self) -> ClusterType {
        *self.cluster_type.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_cluster_type(&self, cluster_type: ClusterType) {
        *self.cluster_type.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = cluster_type;
    }

    fn add_server(&self, address: &ServerAddress) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut servers = self.servers();
        if servers.contains_key(address) {
            return;
        }
        tracing::info!(cluster_id = %self.id, address = %address, "adding server");
        let server = self
            .server_factory
            .create(address.clone(), &self.scheduler, self.changes_tx.clone());
        servers.insert(address.clone(), server);
    }

    fn remove_server(&self, address: &ServerAddress, reason: &str) {
        let removed = self.servers().remove(address);
        if let Some(server) = removed {
            tracing::info!(cluster_id = %self.id, address = %address, reason, "removing server");
            self.scheduler.spawn("server_close", async move { server.close().await });
        }
    }

    fn snapshot(&self) -> ClusterDescription {
        let servers = self.servers().values().map(|s| s.description()).collect();
        ClusterDescription::new(self.settings.mode(), self.current_cluster_type(), servers)
    }

    fn publish(&self) {
        let description = self.snapshot();
        let previous = self.description_tx.send_replace(description.clone());
        if previous != description {
            self.listener
                .cluster_description_changed(&ClusterDescriptionChangedEvent {
                    cluster_id: self.id.clone(),
                    previous,
                    new: description,
                });
        }
    }

    fn on_change(&self, description: ServerDescription) {
        if self.closed.load(Ordering::Acquire) || !self.servers().contains_key(description.address()) {
            return;
        }
        match self.settings.mode() {
            ClusterConnectionMode::Single => self.on_single_change(&description),
            ClusterConnectionMode::Multiple => self.on_multi_change(&description),
        }
        self.publish();
    }

    fn on_single_change(&self, description: &ServerDescription) {
        if self.settings.required_cluster_type() == ClusterType::Unknown && description.is_ok() {
            self.set_cluster_type(description.server_type().cluster_type());
        }
    }

    fn on_multi_change(&self, description: &ServerDescription) {
        if !description.is_ok() {
            return;
        }

        if self.current_cluster_type() == ClusterType::Unknown {
            let inferred = description.server_type().cluster_type();
            if inferred != ClusterType::Unknown {
                tracing::info!(cluster_id = %self.id, cluster_type = %inferred, "discovered cluster type");
                self.set_cluster_type(inferred);
            }
        }

        match self.current_cluster_type() {
            ClusterType::ReplicaSet => self.on_replica_set_member_change(description),
            ClusterType::Sharded => {
                if description.server_type() != ServerType::ShardRouter {
                    self.remove_server(description.address(), "not a shard router");
                }
            }
            ClusterType::Standalone => {
                if description.server_type() != ServerType::Standalone {
                    self.remove_server(description.address(), "not a standalone server");
                } else if self.servers().len() > 1 {
                    self.remove_server(description.address(), "a standalone server cannot be part of a multi-server cluster");
                }
            }
            ClusterType::Unknown => {}
        }
    }

    fn on_replica_set_member_change(&self, description: &ServerDescription) {
        if !description.is_replica_set_member() {
            self.remove_server(description.address(), "not a replica set member");
            return;
        }
        if description.server_type() == ServerType::ReplicaSetGhost {
            return;
        }
        if let Some(required) = self.settings.required_replica_set_name() {
            if description.set_name() != Some(required) {
                self.remove_server(description.address(), "replica set name mismatch");
                return;
            }
        }

        for host in description.all_hosts() {
            self.add_server(host);
        }

        if description.is_primary() {
            let members: Vec<&ServerAddress> = description.all_hosts().collect();
            let stale: Vec<ServerAddress> = self
                .servers()
                .keys()
                .filter(|address| !members.contains(address))
                .cloned()
                .collect();
            for address in stale {
                self.remove_server(&address, "not in the primary's host list");
            }
        }
    }
}

/// Receives server description changes and folds them into the cluster
/// description. Holds only a weak reference so it never keeps the cluster alive.
async fn run_aggregator(cluster: Weak<ClusterInner>, mut changes: mpsc::UnboundedReceiver<ServerDescription>) {
    while let Some(description) = changes.recv().await {
        let Some(inner) = cluster.upgrade() else {
            break;
        };
        inner.on_change(description);
    }
}

/// State shared by both cluster variants.
#[derive(Clone)]
struct BaseCluster {
    inner: Arc<ClusterInner>,
}

impl BaseCluster {
    fn new(
        id: ClusterId,
        settings: ClusterSettings,
        server_factory: ClusterableServerFactory,
        scheduler: BackgroundScheduler,
        listener: Arc<dyn ClusterListener>,
    ) -> Self {
        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let initial = ClusterDescription::new(settings.mode(), settings.required_cluster_type(), Vec::new());
        let (description_tx, _) = watch::channel(initial);

        let inner = Arc::new(ClusterInner {
            id,
            cluster_type: Mutex::new(settings.required_cluster_type()),
            settings,
            server_factory,
            servers: Mutex::new(HashMap::new()),
            description_tx,
            changes_tx,
            scheduler,
            listener,
            closed: AtomicBool::new(false),
        });

        inner
            .scheduler
            .spawn("cluster_aggregator", run_aggregator(Arc::downgrade(&inner), changes_rx));
        for host in inner.settings.hosts() {
            inner.add_server(host);
        }
        inner.publish();

        Self { inner }
    }

    fn id(&self) -> &ClusterId {
        &self.inner.id
    }

    fn settings(&self) -> &ClusterSettings {
        &self.inner.settings
    }

    fn description(&self) -> ClusterDescription {
        self.inner.description_tx.borrow().clone()
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn closed_error(&self) -> MongoError {
        MongoError::Connection(format!("cluster {} is closed", self.inner.id))
    }

    fn request_checks(&self) {
        for server in self.inner.servers().values() {
            server.request_check();
        }
    }

    fn pick(&self, selector: &dyn ServerSelector, description: &ClusterDescription) -> Option<Arc<ClusterableServer>> {
        let candidates = selector.select(description);
        let servers = self.inner.servers();
        let available: Vec<&Arc<ClusterableServer>> = candidates
            .iter()
            .filter_map(|candidate| servers.get(candidate.address()))
            .collect();
        available.choose(&mut rand::thread_rng()).map(|server| Arc::clone(*server))
    }

    async fn select_server(&self, selector: &dyn ServerSelector) -> Result<Arc<ClusterableServer>> {
        let timeout = self.inner.settings.server_selection_timeout();
        let deadline = Instant::now() + timeout;
        let mut description_rx = self.inner.description_tx.subscribe();

        loop {
            if self.is_closed() {
                return Err(self.closed_error());
            }

            let description = description_rx.borrow_and_update().clone();
            if let Some(server) = self.pick(selector, &description) {
                tracing::debug!(address = %server.address(), "selected server");
                return Ok(server);
            }

            self.request_checks();
            match tokio::time::timeout_at(deadline, description_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return Err(self.closed_error()),
                Err(_) => {
                    return Err(MongoError::Timeout(format!(
                        "timed out after {:?} waiting for a server that matches {:?}. Client view of cluster state is {}",
                        timeout,
                        selector,
                        self.description()
                    )))
                }
            }
        }
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let servers: Vec<Arc<ClusterableServer>> = self.inner.servers().drain().map(|(_, s)| s).collect();
        self.inner.scheduler.shutdown();
        for server in servers {
            server.close().await;
        }
        self.inner.publish();
        self.inner.listener.cluster_closed(&ClusterClosedEvent::new(self.inner.id.clone()));
        tracing::info!(cluster_id = %self.inner.id, "cluster closed");
    }
}

/// A cluster monitoring exactly one server, whatever its type.
#[derive(Clone)]
pub struct SingleServerCluster {
    base: BaseCluster,
}

impl SingleServerCluster {
    pub(crate) fn new(
        id: ClusterId,
        settings: ClusterSettings,
        server_factory: ClusterableServerFactory,
        scheduler: BackgroundScheduler,
        listener: Arc<dyn ClusterListener>,
    ) -> Result<Self> {
        if settings.hosts().len() != 1 {
            return Err(MongoError::Configuration(format!(
                "a single server cluster needs exactly one host, got {}",
                settings.hosts().len()
            )));
        }
        Ok(Self {
            base: BaseCluster::new(id, settings, server_factory, scheduler, listener),
        })
    }
}

/// A cluster monitoring every configured host and the members they report.
#[derive(Clone)]
pub struct MultiServerCluster {
    base: BaseCluster,
}

impl MultiServerCluster {
    pub(crate) fn new(
        id: ClusterId,
        settings: ClusterSettings,
        server_factory: ClusterableServerFactory,
        scheduler: BackgroundScheduler,
        listener: Arc<dyn ClusterListener>,
    ) -> Result<Self> {
        if settings.hosts().is_empty() {
            return Err(MongoError::Configuration("a multi server cluster needs at least one host".to_string()));
        }
        Ok(Self {
            base: BaseCluster::new(id, settings, server_factory, scheduler, listener),
        })
    }
}

/// A cluster of servers, as created by a [`ClusterFactory`](super::ClusterFactory).
///
/// Cloning yields another handle to the same cluster. Background monitoring
/// stops on [`close`](Self::close) or when the last handle is dropped.
#[derive(Clone)]
pub enum Cluster {
    /// One standalone server.
    Single(SingleServerCluster),
    /// A monitored group of servers.
    Multi(MultiServerCluster),
}

impl Cluster {
    fn base(&self) -> &BaseCluster {
        match self {
            Self::Single(cluster) => &cluster.base,
            Self::Multi(cluster) => &cluster.base,
        }
    }

    /// Returns the cluster's id.
    pub fn id(&self) -> &ClusterId {
        self.base().id()
    }

    /// Returns the settings the cluster was created with.
    pub fn settings(&self) -> &ClusterSettings {
        self.base().settings()
    }

    /// Returns the current cluster description.
    pub fn description(&self) -> ClusterDescription {
        self.base().description()
    }

    /// Returns `true` once the cluster has been closed.
    pub fn is_closed(&self) -> bool {
        self.base().is_closed()
    }

    /// Waits for a server matching `selector`.
    ///
    /// Fails with [`MongoError::Timeout`] when no server matches within the
    /// server selection timeout.
    #[instrument(name = "cluster.select_server", skip(self), fields(cluster_id = %self.id()))]
    pub async fn select_server(&self, selector: &dyn ServerSelector) -> Result<Arc<ClusterableServer>> {
        self.base().select_server(selector).await
    }

    /// Stops every monitor and closes every pool. Further calls are no-ops.
    pub async fn close(&self) {
        self.base().close().await
    }
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = match self {
            Self::Single(_) => "Single",
            Self::Multi(_) => "Multi",
        };
        f.debug_struct("Cluster")
            .field("variant", &variant)
            .field("id", self.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
