//! Descriptions of servers and of the cluster they form.

use std::fmt;
use std::time::Duration;

use bson::{Bson, Document};
use mongo_core::ServerAddress;

use crate::config::ClusterConnectionMode;
use crate::protocol::is_ok;

/// Default maximum document size a server accepts.
const DEFAULT_MAX_DOCUMENT_SIZE: i32 = 16 * 1024 * 1024;

/// The kind of deployment a cluster is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterType {
    /// A single standalone server.
    Standalone,
    /// A replica set.
    ReplicaSet,
    /// One or more shard routers.
    Sharded,
    /// Not yet known.
    Unknown,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Standalone => write!(f, "STANDALONE"),
            Self::ReplicaSet => write!(f, "REPLICA_SET"),
            Self::Sharded => write!(f, "SHARDED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// The role a server reported in its last heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    /// A standalone server.
    Standalone,
    /// The primary of a replica set.
    ReplicaSetPrimary,
    /// A secondary of a replica set.
    ReplicaSetSecondary,
    /// An arbiter of a replica set.
    ReplicaSetArbiter,
    /// A replica set member in another state (recovering, startup, ...).
    ReplicaSetOther,
    /// A replica set member that has not been initiated yet.
    ReplicaSetGhost,
    /// A shard router.
    ShardRouter,
    /// Unreachable or not yet checked.
    Unknown,
}

impl ServerType {
    /// Returns the cluster type a server of this type belongs to.
    pub fn cluster_type(&self) -> ClusterType {
        match self {
            Self::Standalone => ClusterType::Standalone,
            Self::ReplicaSetPrimary
            | Self::ReplicaSetSecondary
            | Self::ReplicaSetArbiter
            | Self::ReplicaSetOther
            | Self::ReplicaSetGhost => ClusterType::ReplicaSet,
            Self::ShardRouter => ClusterType::Sharded,
            Self::Unknown => ClusterType::Unknown,
        }
    }

    /// Returns `true` if servers of this type hold data that can be queried.
    pub fn is_data_bearing(&self) -> bool {
        matches!(
            self,
            Self::Standalone | Self::ReplicaSetPrimary | Self::ReplicaSetSecondary | Self::ShardRouter
        )
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "STANDALONE",
            Self::ReplicaSetPrimary => "REPLICA_SET_PRIMARY",
            Self::ReplicaSetSecondary => "REPLICA_SET_SECONDARY",
            Self::ReplicaSetArbiter => "REPLICA_SET_ARBITER",
            Self::ReplicaSetOther => "REPLICA_SET_OTHER",
            Self::ReplicaSetGhost => "REPLICA_SET_GHOST",
            Self::ShardRouter => "SHARD_ROUTER",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Whether the monitor currently reaches the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerConnectionState {
    /// No successful heartbeat yet, or the last one failed.
    Connecting,
    /// The last heartbeat succeeded.
    Connected,
}

/// What the last heartbeat learned about a server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerDescription {
    address: ServerAddress,
    server_type: ServerType,
    state: ServerConnectionState,
    set_name: Option<String>,
    hosts: Vec<ServerAddress>,
    passives: Vec<ServerAddress>,
    arbiters: Vec<ServerAddress>,
    primary: Option<ServerAddress>,
    max_document_size: i32,
    round_trip_time: Option<Duration>,
    error: Option<String>,
}

impl ServerDescription {
    /// Creates the description of a server that has not been reached.
    pub fn unknown(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            state: ServerConnectionState::Connecting,
            set_name: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            primary: None,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
            round_trip_time: None,
            error: None,
        }
    }

    /// Creates the description of a server whose heartbeat failed.
    pub fn with_error(address: ServerAddress, error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::unknown(address)
        }
    }

    /// Builds a description from an `ismaster` response.
    pub fn from_is_master(address: ServerAddress, response: &Document, round_trip_time: Duration) -> Self {
        if !is_ok(response) {
            return Self::with_error(address, format!("ismaster failed: {}", response));
        }

        let set_name = response.get_str("setName").ok().map(str::to_string);
        let server_type = server_type_of(response, set_name.is_some());
        let max_document_size = match response.get("maxBsonObjectSize") {
            Some(Bson::Int32(size)) => *size,
            Some(Bson::Int64(size)) => *size as i32,
            _ => DEFAULT_MAX_DOCUMENT_SIZE,
        };

        Self {
            address,
            server_type,
            state: ServerConnectionState::Connected,
            set_name,
            hosts: addresses(response, "hosts"),
            passives: addresses(response, "passives"),
            arbiters: addresses(response, "arbiters"),
            primary: response.get_str("primary").ok().and_then(|p| p.parse().ok()),
            max_document_size,
            round_trip_time: Some(round_trip_time),
            error: None,
        }
    }

    /// Returns the server's address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the server type.
    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    /// Returns the connection state.
    pub fn state(&self) -> ServerConnectionState {
        self.state
    }

    /// Returns the replica set name, if the server belongs to one.
    pub fn set_name(&self) -> Option<&str> {
        self.set_name.as_deref()
    }

    /// Returns the replica set members the server reported as electable.
    pub fn hosts(&self) -> &[ServerAddress] {
        &self.hosts
    }

    /// Returns the passive members the server reported.
    pub fn passives(&self) -> &[ServerAddress] {
        &self.passives
    }

    /// Returns the arbiters the server reported.
    pub fn arbiters(&self) -> &[ServerAddress] {
        &self.arbiters
    }

    /// Returns every member the server reported.
    pub fn all_hosts(&self) -> impl Iterator<Item = &ServerAddress> {
        self.hosts.iter().chain(&self.passives).chain(&self.arbiters)
    }

    /// Returns the primary the server believes in.
    pub fn primary(&self) -> Option<&ServerAddress> {
        self.primary.as_ref()
    }

    /// Returns the largest document the server accepts.
    pub fn max_document_size(&self) -> i32 {
        self.max_document_size
    }

    /// Returns the round trip time of the last successful heartbeat.
    pub fn round_trip_time(&self) -> Option<Duration> {
        self.round_trip_time
    }

    /// Returns the error of the last failed heartbeat.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns `true` if the last heartbeat succeeded.
    pub fn is_ok(&self) -> bool {
        self.state == ServerConnectionState::Connected
    }

    /// Returns `true` if the server is a replica set primary.
    pub fn is_primary(&self) -> bool {
        self.is_ok() && self.server_type == ServerType::ReplicaSetPrimary
    }

    /// Returns `true` if the server is a replica set secondary.
    pub fn is_secondary(&self) -> bool {
        self.is_ok() && self.server_type == ServerType::ReplicaSetSecondary
    }

    /// Returns `true` if the server is a replica set member of any kind.
    pub fn is_replica_set_member(&self) -> bool {
        self.is_ok() && self.server_type.cluster_type() == ClusterType::ReplicaSet
    }

    /// Compares everything except the round trip time.
    pub fn has_same_state(&self, other: &ServerDescription) -> bool {
        self.address == other.address
            && self.server_type == other.server_type
            && self.state == other.state
            && self.set_name == other.set_name
            && self.hosts == other.hosts
            && self.passives == other.passives
            && self.arbiters == other.arbiters
            && self.primary == other.primary
            && self.max_document_size == other.max_document_size
            && self.error == other.error
    }
}

fn server_type_of(response: &Document, in_replica_set: bool) -> ServerType {
    let flag = |key: &str| response.get_bool(key).unwrap_or(false);

    if response.get_str("msg").map(|msg| msg == "isdbgrid").unwrap_or(false) {
        ServerType::ShardRouter
    } else if in_replica_set {
        if flag("ismaster") {
            ServerType::ReplicaSetPrimary
        } else if flag("secondary") {
            ServerType::ReplicaSetSecondary
        } else if flag("arbiterOnly") {
            ServerType::ReplicaSetArbiter
        } else {
            ServerType::ReplicaSetOther
        }
    } else if flag("isreplicaset") {
        ServerType::ReplicaSetGhost
    } else {
        ServerType::Standalone
    }
}

fn addresses(response: &Document, key: &str) -> Vec<ServerAddress> {
    response
        .get_array(key)
        .map(|hosts| {
            hosts
                .iter()
                .filter_map(Bson::as_str)
                .filter_map(|host| host.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// A snapshot of every server a cluster monitors.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterDescription {
    connection_mode: ClusterConnectionMode,
    cluster_type: ClusterType,
    servers: Vec<ServerDescription>,
}

impl ClusterDescription {
    /// Creates a description. Servers are kept sorted by address.
    pub fn new(
        connection_mode: ClusterConnectionMode,
        cluster_type: ClusterType,
        mut servers: Vec<ServerDescription>,
    ) -> Self {
        servers.sort_by(|a, b| a.address.cmp(&b.address));
        Self {
            connection_mode,
            cluster_type,
            servers,
        }
    }

    /// Returns the topology mode.
    pub fn connection_mode(&self) -> ClusterConnectionMode {
        self.connection_mode
    }

    /// Returns the cluster type.
    pub fn cluster_type(&self) -> ClusterType {
        self.cluster_type
    }

    /// Returns every server description.
    pub fn servers(&self) -> &[ServerDescription] {
        &self.servers
    }

    /// Returns the description of the server at `address`.
    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| &s.address == address)
    }

    /// Returns the servers whose last heartbeat succeeded.
    pub fn connected_servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.iter().filter(|s| s.is_ok())
    }

    /// Returns the current replica set primary, if any.
    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers.iter().find(|s| s.is_primary())
    }
}

impl fmt::Display for ClusterDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{type={}, servers=[", self.cluster_type)?;
        for (i, server) in self.servers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{{address={}, type={}", server.address, server.server_type)?;
            if let Some(error) = &server.error {
                write!(f, ", error={}", error)?;
            }
            write!(f, "}}")?;
        }
        write!(f, "]}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn address(port: u16) -> ServerAddress {
        ServerAddress::new("localhost", port)
    }

    fn describe(response: Document) -> ServerDescription {
        ServerDescription::from_is_master(address(27017), &response, Duration::from_millis(1))
    }

    #[test]
    fn test_standalone() {
        let description = describe(doc! { "ismaster": true, "ok": 1.0 });
        assert_eq!(description.server_type(), ServerType::Standalone);
        assert!(description.is_ok());
        assert!(!description.is_primary());
        assert_eq!(description.max_document_size(), DEFAULT_MAX_DOCUMENT_SIZE);
    }

    #[test]
    fn test_replica_set_primary() {
        let description = describe(doc! {
            "ismaster": true,
            "setName": "rs0",
            "hosts": ["localhost:27017", "localhost:27018"],
            "arbiters": ["localhost:27019"],
            "primary": "localhost:27017",
            "maxBsonObjectSize": 1024,
            "ok": 1,
        });

        assert!(description.is_primary());
        assert_eq!(description.set_name(), Some("rs0"));
        assert_eq!(description.hosts(), &[address(27017), address(27018)]);
        assert_eq!(description.all_hosts().count(), 3);
        assert_eq!(description.primary(), Some(&address(27017)));
        assert_eq!(description.max_document_size(), 1024);
    }

    #[test]
    fn test_other_member_types() {
        let secondary = describe(doc! { "ismaster": false, "secondary": true, "setName": "rs0", "ok": 1 });
        assert_eq!(secondary.server_type(), ServerType::ReplicaSetSecondary);

        let arbiter = describe(doc! { "ismaster": false, "arbiterOnly": true, "setName": "rs0", "ok": 1 });
        assert_eq!(arbiter.server_type(), ServerType::ReplicaSetArbiter);

        let other = describe(doc! { "ismaster": false, "setName": "rs0", "ok": 1 });
        assert_eq!(other.server_type(), ServerType::ReplicaSetOther);

        let ghost = describe(doc! { "ismaster": false, "isreplicaset": true, "ok": 1 });
        assert_eq!(ghost.server_type(), ServerType::ReplicaSetGhost);

        let router = describe(doc! { "ismaster": true, "msg": "isdbgrid", "ok": 1 });
        assert_eq!(router.server_type(), ServerType::ShardRouter);
        assert_eq!(router.server_type().cluster_type(), ClusterType::Sharded);
    }

    #[test]
    fn test_failed_ismaster_is_unknown() {
        let description = describe(doc! { "ok": 0, "errmsg": "no" });
        assert_eq!(description.server_type(), ServerType::Unknown);
        assert!(!description.is_ok());
        assert!(description.error().unwrap().contains("ismaster failed"));
    }

    #[test]
    fn test_same_state_ignores_round_trip_time() {
        let response = doc! { "ismaster": true, "ok": 1 };
        let a = ServerDescription::from_is_master(address(1), &response, Duration::from_millis(1));
        let b = ServerDescription::from_is_master(address(1), &response, Duration::from_millis(9));
        assert!(a.has_same_state(&b));
        assert_ne!(a, b);
        assert!(!a.has_same_state(&ServerDescription::unknown(address(1))));
    }

    #[test]
    fn test_cluster_description_sorted_and_displayed() {
        let description = ClusterDescription::new(
            ClusterConnectionMode::Multiple,
            ClusterType::Unknown,
            vec![
                ServerDescription::with_error(address(2), "refused"),
                ServerDescription::unknown(address(1)),
            ],
        );
        assert_eq!(description.servers()[0].address(), &address(1));
        assert!(description.primary().is_none());
        assert_eq!(description.connected_servers().count(), 0);
        assert!(description.to_string().contains("error=refused"));
    }
}
