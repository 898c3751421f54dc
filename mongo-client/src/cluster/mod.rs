//! Cluster topology: servers, their monitors, and server selection.

#[allow(clippy::module_inception)]
mod cluster;
mod description;
mod factory;
mod monitor;
mod scheduler;
mod selector;
mod server;

pub use cluster::{Cluster, ClusterId, MultiServerCluster, SingleServerCluster};
pub use description::{
    ClusterDescription, ClusterType, ServerConnectionState, ServerDescription, ServerType,
};
pub use factory::{ClusterFactory, DefaultClusterFactory};
pub use scheduler::BackgroundScheduler;
pub use selector::{AnyServerSelector, PrimaryServerSelector, ServerAddressSelector, ServerSelector};
pub use server::{ClusterableServer, ClusterableServerFactory};
