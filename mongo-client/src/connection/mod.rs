//! Connections, stream factories and per-server connection pools.

#[allow(clippy::module_inception)]
mod connection;
mod factory;
mod pool;
mod stream;

pub use connection::{Connection, ConnectionId};
pub use factory::InternalConnectionFactory;
pub use pool::{ConnectionPool, PooledConnection};
pub use stream::{Stream, StreamFactory, TcpStreamFactory};
