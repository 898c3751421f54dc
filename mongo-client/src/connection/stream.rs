//! Byte streams to servers and the factories that open them.

use std::time::Duration;

use async_trait::async_trait;
use mongo_core::{MongoError, Result, ServerAddress};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Default timeout for opening a TCP stream.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A bidirectional byte stream to a server.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// Opens streams to servers.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Opens a new stream to `address`.
    async fn create(&self, address: &ServerAddress) -> Result<Box<dyn Stream>>;
}

impl std::fmt::Debug for dyn StreamFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamFactory")
    }
}

/// Opens plain TCP streams with `TCP_NODELAY` set.
#[derive(Debug, Clone)]
pub struct TcpStreamFactory {
    connect_timeout: Duration,
}

impl TcpStreamFactory {
    /// Creates a factory with the default connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Sets the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns the connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

impl Default for TcpStreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamFactory for TcpStreamFactory {
    async fn create(&self, address: &ServerAddress) -> Result<Box<dyn Stream>> {
        let connect = TcpStream::connect((address.host(), address.port()));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| {
                MongoError::Timeout(format!(
                    "connecting to {} timed out after {:?}",
                    address, self.connect_timeout
                ))
            })?
            .map_err(|e| MongoError::Connection(format!("failed to connect to {}: {}", address, e)))?;

        stream
            .set_nodelay(true)
            .map_err(|e| MongoError::Connection(format!("failed to set TCP_NODELAY: {}", e)))?;

        tracing::debug!(address = %address, "opened stream");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_factory_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = ServerAddress::from(listener.local_addr().unwrap());

        let factory = TcpStreamFactory::new();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });

        assert!(factory.create(&address).await.is_ok());
        assert!(accept.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_tcp_factory_reports_refused_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = ServerAddress::from(listener.local_addr().unwrap());
        drop(listener);

        let result = TcpStreamFactory::new().create(&address).await;
        assert!(matches!(result, Err(MongoError::Connection(_))));
    }

    #[test]
    fn test_default_connect_timeout() {
        assert_eq!(TcpStreamFactory::default().connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
        let factory = TcpStreamFactory::new().with_connect_timeout(Duration::from_secs(1));
        assert_eq!(factory.connect_timeout(), Duration::from_secs(1));
    }
}
