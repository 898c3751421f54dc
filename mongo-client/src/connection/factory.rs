//! Opens and authenticates connections for a pool.

use std::sync::Arc;

use mongo_core::{Result, ServerAddress};

use super::connection::Connection;
use super::stream::StreamFactory;
use crate::listener::ConnectionListener;
use crate::security::{Authenticator, MongoCredential};

/// Creates ready-to-use connections to one server: opens the stream, then
/// authenticates every credential in order.
#[derive(Debug, Clone)]
pub struct InternalConnectionFactory {
    address: ServerAddress,
    stream_factory: Arc<dyn StreamFactory>,
    credentials: Vec<MongoCredential>,
    listener: Arc<dyn ConnectionListener>,
}

impl InternalConnectionFactory {
    /// Creates a connection factory for `address`.
    pub fn new(
        address: ServerAddress,
        stream_factory: Arc<dyn StreamFactory>,
        credentials: Vec<MongoCredential>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Self {
        Self {
            address,
            stream_factory,
            credentials,
            listener,
        }
    }

    /// Returns the server connections are opened to.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Opens and authenticates a new connection.
    ///
    /// A connection whose authentication fails is closed before the error is returned.
    pub async fn create(&self) -> Result<Connection> {
        let mut connection =
            Connection::open(&self.address, self.stream_factory.as_ref(), Arc::clone(&self.listener)).await?;

        for credential in &self.credentials {
            let mut authenticator = Authenticator::for_credential(credential.clone());
            if let Err(e) = authenticator.authenticate(&mut connection).await {
                connection.close().await;
                return Err(e);
            }
        }
        Ok(connection)
    }
}
