//! Server selectors.

use std::fmt;

use mongo_core::ServerAddress;

use super::description::{ClusterDescription, ServerDescription, ServerType};
use crate::config::ClusterConnectionMode;

/// Picks the servers suitable for an operation from a cluster description.
///
/// In `Single` mode the one monitored server is suitable whenever it is
/// connected, whatever its type.
pub trait ServerSelector: Send + Sync + fmt::Debug {
    /// Returns the suitable servers. Empty if none is suitable right now.
    fn select<'a>(&self, cluster: &'a ClusterDescription) -> Vec<&'a ServerDescription>;
}

fn single_server(cluster: &ClusterDescription) -> Option<Vec<&ServerDescription>> {
    (cluster.connection_mode() == ClusterConnectionMode::Single)
        .then(|| cluster.connected_servers().collect())
}

/// Selects the server that accepts writes: the replica set primary, a
/// standalone server or a shard router.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryServerSelector;

impl ServerSelector for PrimaryServerSelector {
    fn select<'a>(&self, cluster: &'a ClusterDescription) -> Vec<&'a ServerDescription> {
        if let Some(servers) = single_server(cluster) {
            return servers;
        }
        cluster
            .connected_servers()
            .filter(|s| {
                s.is_primary()
                    || matches!(s.server_type(), ServerType::Standalone | ServerType::ShardRouter)
            })
            .collect()
    }
}

/// Selects any connected server that holds data.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyServerSelector;

impl ServerSelector for AnyServerSelector {
    fn select<'a>(&self, cluster: &'a ClusterDescription) -> Vec<&'a ServerDescription> {
        if let Some(servers) = single_server(cluster) {
            return servers;
        }
        cluster
            .connected_servers()
            .filter(|s| s.server_type().is_data_bearing())
            .collect()
    }
}

/// Selects the server at one address, once it is connected.
#[derive(Debug, Clone)]
pub struct ServerAddressSelector {
    address: ServerAddress,
}

impl ServerAddressSelector {
    /// Creates a selector for `address`.
    pub fn new(address: ServerAddress) -> Self {
        Self { address }
    }

    /// Returns the selected address.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }
}

impl ServerSelector for ServerAddressSelector {
    fn select<'a>(&self, cluster: &'a ClusterDescription) -> Vec<&'a ServerDescription> {
        cluster
            .server(&self.address)
            .filter(|s| s.is_ok())
            .into_iter()
            .collect()
    }
}
