//! Cluster, server and connection pool settings with their builders.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mongo_core::{MongoError, ServerAddress};

use crate::cluster::ClusterType;

/// Default server selection timeout.
const DEFAULT_SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Default heartbeat frequency.
const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
/// Default minimum interval between two heartbeats.
const DEFAULT_MIN_HEARTBEAT_FREQUENCY: Duration = Duration::from_millis(500);
/// Default heartbeat connect timeout.
const DEFAULT_HEARTBEAT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
/// Default maximum pool size.
const DEFAULT_MAX_POOL_SIZE: usize = 100;
/// Default maximum number of callers waiting on a pool.
const DEFAULT_MAX_WAIT_QUEUE_SIZE: usize = 500;
/// Default maximum time to wait for a pooled connection.
const DEFAULT_MAX_WAIT_TIME: Duration = Duration::from_secs(120);

/// Configuration error returned when validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the validation message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for MongoError {
    fn from(err: ConfigError) -> Self {
        MongoError::Configuration(err.message)
    }
}

/// Whether the configured hosts are one standalone server or a monitored group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterConnectionMode {
    /// Connect to exactly one server, whatever its type.
    Single,
    /// Monitor every host and discover the rest of the deployment.
    Multiple,
}

impl ClusterConnectionMode {
    /// Returns the canonical name of this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Single => "SINGLE",
            Self::Multiple => "MULTIPLE",
        }
    }
}

impl fmt::Display for ClusterConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ClusterConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SINGLE" => Ok(Self::Single),
            "MULTIPLE" => Ok(Self::Multiple),
            other => Err(ConfigError::new(format!("unsupported cluster mode: {}", other))),
        }
    }
}

/// Settings describing which servers make up the cluster.
#[derive(Debug, Clone)]
pub struct ClusterSettings {
    hosts: Vec<ServerAddress>,
    mode: ClusterConnectionMode,
    required_cluster_type: ClusterType,
    required_replica_set_name: Option<String>,
    server_selection_timeout: Duration,
}

impl ClusterSettings {
    /// Creates a builder.
    pub fn builder() -> ClusterSettingsBuilder {
        ClusterSettingsBuilder::new()
    }

    /// Returns the configured hosts in order.
    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    /// Returns the topology mode.
    pub fn mode(&self) -> ClusterConnectionMode {
        self.mode
    }

    /// Returns the cluster type servers must belong to, `Unknown` if any.
    pub fn required_cluster_type(&self) -> ClusterType {
        self.required_cluster_type
    }

    /// Returns the replica set name servers must report, if any.
    pub fn required_replica_set_name(&self) -> Option<&str> {
        self.required_replica_set_name.as_deref()
    }

    /// Returns how long server selection waits for a suitable server.
    pub fn server_selection_timeout(&self) -> Duration {
        self.server_selection_timeout
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            hosts: vec![ServerAddress::default()],
            mode: ClusterConnectionMode::Single,
            required_cluster_type: ClusterType::Unknown,
            required_replica_set_name: None,
            server_selection_timeout: DEFAULT_SERVER_SELECTION_TIMEOUT,
        }
    }
}

/// Builder for `ClusterSettings`.
#[derive(Debug, Clone, Default)]
pub struct ClusterSettingsBuilder {
    hosts: Vec<ServerAddress>,
    mode: Option<ClusterConnectionMode>,
    required_cluster_type: Option<ClusterType>,
    required_replica_set_name: Option<String>,
    server_selection_timeout: Option<Duration>,
}

impl ClusterSettingsBuilder {
    /// Creates a new cluster settings builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a host.
    pub fn add_host(mut self, host: ServerAddress) -> Self {
        self.hosts.push(host);
        self
    }

    /// Sets the hosts, replacing any previously configured.
    pub fn hosts(mut self, hosts: impl IntoIterator<Item = ServerAddress>) -> Self {
        self.hosts = hosts.into_iter().collect();
        self
    }

    /// Sets the topology mode.
    pub fn mode(mut self, mode: ClusterConnectionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the cluster type servers must belong to.
    pub fn required_cluster_type(mut self, cluster_type: ClusterType) -> Self {
        self.required_cluster_type = Some(cluster_type);
        self
    }

    /// Sets the replica set name servers must report. Implies a replica set cluster.
    pub fn required_replica_set_name(mut self, name: impl Into<String>) -> Self {
        self.required_replica_set_name = Some(name.into());
        self
    }

    /// Sets how long server selection waits for a suitable server.
    pub fn server_selection_timeout(mut self, timeout: Duration) -> Self {
        self.server_selection_timeout = Some(timeout);
        self
    }

    /// Builds the cluster settings.
    pub fn build(self) -> Result<ClusterSettings, ConfigError> {
        let mut hosts: Vec<ServerAddress> = Vec::with_capacity(self.hosts.len());
        for host in self.hosts {
            if !hosts.contains(&host) {
                hosts.push(host);
            }
        }
        if hosts.is_empty() {
            hosts.push(ServerAddress::default());
        }

        let mode = match self.mode {
            Some(mode) => mode,
            None if hosts.len() == 1 && self.required_replica_set_name.is_none() => {
                ClusterConnectionMode::Single
            }
            None => ClusterConnectionMode::Multiple,
        };

        if mode == ClusterConnectionMode::Single && hosts.len() > 1 {
            return Err(ConfigError::new(format!(
                "SINGLE mode requires exactly one host, got {}",
                hosts.len()
            )));
        }

        let mut required_cluster_type = self.required_cluster_type.unwrap_or(ClusterType::Unknown);
        if self.required_replica_set_name.is_some() {
            match required_cluster_type {
                ClusterType::Unknown => required_cluster_type = ClusterType::ReplicaSet,
                ClusterType::ReplicaSet => {}
                other => {
                    return Err(ConfigError::new(format!(
                        "a replica set name requires cluster type REPLICA_SET, got {}",
                        other
                    )))
                }
            }
        }

        let server_selection_timeout = self
            .server_selection_timeout
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT);

        Ok(ClusterSettings {
            hosts,
            mode,
            required_cluster_type,
            required_replica_set_name: self.required_replica_set_name,
            server_selection_timeout,
        })
    }
}

/// Settings for the per-server heartbeat monitor.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    heartbeat_frequency: Duration,
    min_heartbeat_frequency: Duration,
    heartbeat_connect_timeout: Duration,
}

impl ServerSettings {
    /// Creates a builder.
    pub fn builder() -> ServerSettingsBuilder {
        ServerSettingsBuilder::new()
    }

    /// Returns the interval between heartbeats.
    pub fn heartbeat_frequency(&self) -> Duration {
        self.heartbeat_frequency
    }

    /// Returns the minimum interval between two heartbeats, even when one is requested early.
    pub fn min_heartbeat_frequency(&self) -> Duration {
        self.min_heartbeat_frequency
    }

    /// Returns the timeout for opening and using a heartbeat connection.
    pub fn heartbeat_connect_timeout(&self) -> Duration {
        self.heartbeat_connect_timeout
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            heartbeat_frequency: DEFAULT_HEARTBEAT_FREQUENCY,
            min_heartbeat_frequency: DEFAULT_MIN_HEARTBEAT_FREQUENCY,
            heartbeat_connect_timeout: DEFAULT_HEARTBEAT_CONNECT_TIMEOUT,
        }
    }
}

/// Builder for `ServerSettings`.
#[derive(Debug, Clone, Default)]
pub struct ServerSettingsBuilder {
    heartbeat_frequency: Option<Duration>,
    min_heartbeat_frequency: Option<Duration>,
    heartbeat_connect_timeout: Option<Duration>,
}

impl ServerSettingsBuilder {
    /// Creates a new server settings builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the interval between heartbeats.
    pub fn heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.heartbeat_frequency = Some(frequency);
        self
    }

    /// Sets the minimum interval between two heartbeats.
    pub fn min_heartbeat_frequency(mut self, frequency: Duration) -> Self {
        self.min_heartbeat_frequency = Some(frequency);
        self
    }

    /// Sets the heartbeat connect timeout.
    pub fn heartbeat_connect_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_connect_timeout = Some(timeout);
        self
    }

    /// Builds the server settings.
    pub fn build(self) -> Result<ServerSettings, ConfigError> {
        let heartbeat_frequency = self.heartbeat_frequency.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY);
        let min_heartbeat_frequency = self
            .min_heartbeat_frequency
            .unwrap_or(DEFAULT_MIN_HEARTBEAT_FREQUENCY);

        if heartbeat_frequency.is_zero() {
            return Err(ConfigError::new("heartbeat_frequency must be positive"));
        }
        if min_heartbeat_frequency > heartbeat_frequency {
            return Err(ConfigError::new(
                "min_heartbeat_frequency must not exceed heartbeat_frequency",
            ));
        }

        Ok(ServerSettings {
            heartbeat_frequency,
            min_heartbeat_frequency,
            heartbeat_connect_timeout: self
                .heartbeat_connect_timeout
                .unwrap_or(DEFAULT_HEARTBEAT_CONNECT_TIMEOUT),
        })
    }
}

/// Bounds and timeouts of a per-server connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionPoolSettings {
    max_size: usize,
    max_wait_queue_size: usize,
    max_wait_time: Duration,
    max_connection_life_time: Option<Duration>,
    max_connection_idle_time: Option<Duration>,
}

impl ConnectionPoolSettings {
    /// Creates a builder.
    pub fn builder() -> ConnectionPoolSettingsBuilder {
        ConnectionPoolSettingsBuilder::new()
    }

    /// Returns the maximum number of connections, in use or idle.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Returns the maximum number of callers allowed to wait for a connection.
    pub fn max_wait_queue_size(&self) -> usize {
        self.max_wait_queue_size
    }

    /// Returns how long an acquire waits before failing.
    pub fn max_wait_time(&self) -> Duration {
        self.max_wait_time
    }

    /// Returns the maximum lifetime of a pooled connection, if limited.
    pub fn max_connection_life_time(&self) -> Option<Duration> {
        self.max_connection_life_time
    }

    /// Returns the maximum idle time of a pooled connection, if limited.
    pub fn max_connection_idle_time(&self) -> Option<Duration> {
        self.max_connection_idle_time
    }
}

impl Default for ConnectionPoolSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_POOL_SIZE,
            max_wait_queue_size: DEFAULT_MAX_WAIT_QUEUE_SIZE,
            max_wait_time: DEFAULT_MAX_WAIT_TIME,
            max_connection_life_time: None,
            max_connection_idle_time: None,
        }
    }
}

/// Builder for `ConnectionPoolSettings`.
#[derive(Debug, Clone, Default)]
pub struct ConnectionPoolSettingsBuilder {
    max_size: Option<usize>,
    max_wait_queue_size: Option<usize>,
    max_wait_time: Option<Duration>,
    max_connection_life_time: Option<Duration>,
    max_connection_idle_time: Option<Duration>,
}

impl ConnectionPoolSettingsBuilder {
    /// Creates a new pool settings builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of connections.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    /// Sets the maximum number of waiting callers.
    pub fn max_wait_queue_size(mut self, size: usize) -> Self {
        self.max_wait_queue_size = Some(size);
        self
    }

    /// Sets how long an acquire waits before failing.
    pub fn max_wait_time(mut self, wait: Duration) -> Self {
        self.max_wait_time = Some(wait);
        self
    }

    /// Sets the maximum lifetime of a pooled connection.
    pub fn max_connection_life_time(mut self, life_time: Duration) -> Self {
        self.max_connection_life_time = Some(life_time);
        self
    }

    /// Sets the maximum idle time of a pooled connection.
    pub fn max_connection_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_connection_idle_time = Some(idle_time);
        self
    }

    /// Builds the pool settings.
    pub fn build(self) -> Result<ConnectionPoolSettings, ConfigError> {
        let max_size = self.max_size.unwrap_or(DEFAULT_MAX_POOL_SIZE);
        if max_size == 0 {
            return Err(ConfigError::new("max_size must be greater than 0"));
        }

        Ok(ConnectionPoolSettings {
            max_size,
            max_wait_queue_size: self.max_wait_queue_size.unwrap_or(DEFAULT_MAX_WAIT_QUEUE_SIZE),
            max_wait_time: self.max_wait_time.unwrap_or(DEFAULT_MAX_WAIT_TIME),
            max_connection_life_time: self.max_connection_life_time,
            max_connection_idle_time: self.max_connection_idle_time,
        })
    }
}
