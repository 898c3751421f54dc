//! Async MongoDB driver core built on [Tokio](https://tokio.rs/).
//!
//! This crate discovers and tracks the servers of a deployment, pools
//! connections per server, authenticates them with `MONGODB-CR` and runs
//! commands, queries and cursor continuations over the legacy wire protocol.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use mongo_client::{
//!     ClusterFactory, ClusterListeners, ClusterSettings, ConnectionPoolSettings,
//!     DatabaseAdministration, DefaultClusterFactory, ServerSettings, StreamFactory,
//!     TcpStreamFactory,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let streams: Arc<dyn StreamFactory> = Arc::new(TcpStreamFactory::new());
//!     let cluster = DefaultClusterFactory::new().create(
//!         ClusterSettings::builder().build()?,
//!         ServerSettings::default(),
//!         ConnectionPoolSettings::default(),
//!         Arc::clone(&streams),
//!         streams,
//!         Vec::new(),
//!         ClusterListeners::default(),
//!     )?;
//!
//!     let admin = DatabaseAdministration::new(cluster.clone(), "test");
//!     println!("{:?}", admin.collection_names().await?);
//!
//!     cluster.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Layers
//!
//! | Layer | Types |
//! |-------|-------|
//! | Topology | [`ClusterFactory`], [`Cluster`], [`ClusterableServer`], [`ServerSelector`] |
//! | Pooling | [`ConnectionPool`], [`PooledConnection`] |
//! | Transport | [`Connection`], [`StreamFactory`] |
//! | Security | [`MongoCredential`], [`Authenticator`] |
//! | Protocol | [`CommandProtocol`], [`QueryProtocol`], [`GetMoreProtocol`], [`KillCursorsProtocol`] |
//!
//! Events from every layer reach the listeners registered in
//! [`ClusterListeners`].

#![warn(missing_docs)]

pub mod admin;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod listener;
pub mod protocol;
pub mod security;

pub use admin::{CreateCollectionOptions, DatabaseAdministration};
pub use cluster::{
    AnyServerSelector, Cluster, ClusterDescription, ClusterFactory, ClusterId, ClusterType,
    ClusterableServer, DefaultClusterFactory, PrimaryServerSelector, ServerAddressSelector,
    ServerDescription, ServerSelector, ServerType,
};
pub use config::{
    ClusterConnectionMode, ClusterSettings, ConfigError, ConnectionPoolSettings, ServerSettings,
};
pub use connection::{Connection, ConnectionPool, PooledConnection, StreamFactory, TcpStreamFactory};
pub use listener::{
    ClusterListener, ClusterListeners, ConnectionListener, ConnectionPoolListener, NoOpListener,
    ServerListener,
};
pub use protocol::{
    CommandProtocol, CommandResult, GetMoreProtocol, KillCursorsProtocol, QueryProtocol,
    QueryResult, SingleResultCallback,
};
pub use security::{AuthenticationMechanism, AuthenticationState, Authenticator, MongoCredential};

pub use mongo_core::{MongoError, MongoNamespace, Result, ServerAddress, ServerCursor};
