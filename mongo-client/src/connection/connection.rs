//! A single connection to a server.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use mongo_core::protocol::{next_request_id, RequestMessage, ResponseBuffers, WireCodec};
use mongo_core::{MongoError, Result, ServerAddress};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use super::stream::{Stream, StreamFactory};
use crate::listener::{
    ConnectionClosedEvent, ConnectionListener, ConnectionMessageEvent, ConnectionOpenedEvent,
};

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique connection ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection to a single server.
///
/// Any transport failure closes the connection; a closed connection rejects
/// further sends and is discarded when returned to its pool.
///
/// At most one request is in flight. It stays pending from the start of the
/// write until its reply is read, so an operation abandoned half way leaves
/// the connection marked as out of step with the server.
pub struct Connection {
    id: ConnectionId,
    address: ServerAddress,
    stream: Box<dyn Stream>,
    codec: WireCodec,
    read_buffer: BytesMut,
    closed: bool,
    pending_request: Option<i32>,
    unreleased_replies: Arc<AtomicUsize>,
    created_at: Instant,
    last_used_at: Instant,
    listener: Arc<dyn ConnectionListener>,
}

impl Connection {
    /// Wraps an established stream.
    pub fn new(
        stream: Box<dyn Stream>,
        address: ServerAddress,
        listener: Arc<dyn ConnectionListener>,
    ) -> Self {
        let now = Instant::now();
        let connection = Self {
            id: ConnectionId::new(),
            address,
            stream,
            codec: WireCodec::new(),
            read_buffer: BytesMut::with_capacity(8192),
            closed: false,
            pending_request: None,
            unreleased_replies: Arc::new(AtomicUsize::new(0)),
            created_at: now,
            last_used_at: now,
            listener,
        };
        connection.listener.connection_opened(&ConnectionOpenedEvent {
            address: connection.address.clone(),
            connection_id: connection.id,
        });
        connection
    }

    /// Opens a stream through `factory` and wraps it.
    pub async fn open(
        address: &ServerAddress,
        factory: &dyn StreamFactory,
        listener: Arc<dyn ConnectionListener>,
    ) -> Result<Self> {
        let stream = factory.create(address).await?;
        let connection = Self::new(stream, address.clone(), listener);
        tracing::debug!(connection_id = %connection.id, address = %address, "established connection");
        Ok(connection)
    }

    /// Returns the connection's unique identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the server this connection talks to.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns when this connection was created.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns when this connection last sent or received a message.
    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Returns `true` once the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns `true` while a sent request has not been fully answered, or a
    /// write was interrupted.
    pub fn has_pending_request(&self) -> bool {
        self.pending_request.is_some()
    }

    /// Returns how many replies read from this connection have not been
    /// released yet.
    pub fn unreleased_replies(&self) -> usize {
        self.unreleased_replies.load(Ordering::Acquire)
    }

    /// Writes a message under a fresh request id and returns that id.
    ///
    /// Fails and closes the connection if an earlier request is still pending.
    pub async fn send_message(&mut self, message: RequestMessage) -> Result<i32> {
        if self.closed {
            return Err(MongoError::Connection(format!(
                "connection {} to {} is closed",
                self.id, self.address
            )));
        }
        if let Some(pending) = self.pending_request {
            self.mark_closed();
            return Err(MongoError::Connection(format!(
                "connection {} to {} still awaits the reply to request {}",
                self.id, self.address, pending
            )));
        }

        let request_id = next_request_id();
        let expects_reply = message.expects_reply();
        let mut buf = BytesMut::new();
        self.codec.encode((request_id, message), &mut buf)?;
        let size = buf.len();

        self.pending_request = Some(request_id);

        let written = async {
            self.stream.write_all(&buf).await?;
            self.stream.flush().await
        }
        .await;
        if let Err(e) = written {
            self.mark_closed();
            return Err(MongoError::Connection(format!(
                "failed to write to {}: {}",
                self.address, e
            )));
        }
        if !expects_reply {
            self.pending_request = None;
        }

        self.last_used_at = Instant::now();
        tracing::debug!(connection_id = %self.id, request_id, size, "sent message");
        self.listener.message_sent(&ConnectionMessageEvent {
            address: self.address.clone(),
            connection_id: self.id,
            request_id,
            size,
        });
        Ok(request_id)
    }

    /// Reads the next reply.
    ///
    /// A reply that does not answer the pending request is still returned, so
    /// the caller can report it, but the connection is closed.
    pub async fn receive(&mut self) -> Result<ResponseBuffers> {
        if self.closed {
            return Err(MongoError::Connection(format!(
                "connection {} to {} is closed",
                self.id, self.address
            )));
        }

        loop {
            match self.codec.decode(&mut self.read_buffer) {
                Ok(Some(buffers)) => {
                    self.last_used_at = Instant::now();
                    let header = *buffers.reply_header();
                    tracing::debug!(
                        connection_id = %self.id,
                        response_to = header.response_to(),
                        size = header.message_length(),
                        "received reply"
                    );
                    self.listener.message_received(&ConnectionMessageEvent {
                        address: self.address.clone(),
                        connection_id: self.id,
                        request_id: header.response_to(),
                        size: header.message_length().max(0) as usize,
                    });
                    if self.pending_request.take() != Some(header.response_to()) {
                        tracing::warn!(
                            connection_id = %self.id,
                            response_to = header.response_to(),
                            "reply does not answer the pending request"
                        );
                        self.mark_closed();
                    }
                    self.unreleased_replies.fetch_add(1, Ordering::AcqRel);
                    let unreleased = Arc::clone(&self.unreleased_replies);
                    return Ok(buffers.with_release_hook(move || {
                        unreleased.fetch_sub(1, Ordering::AcqRel);
                    }));
                }
                Ok(None) => {}
                Err(e) => {
                    self.mark_closed();
                    return Err(e);
                }
            }

            let bytes_read = match self.stream.read_buf(&mut self.read_buffer).await {
                Ok(n) => n,
                Err(e) => {
                    self.mark_closed();
                    return Err(MongoError::Connection(format!(
                        "failed to read from {}: {}",
                        self.address, e
                    )));
                }
            };

            if bytes_read == 0 {
                self.mark_closed();
                return Err(MongoError::Connection(format!(
                    "connection to {} closed unexpectedly",
                    self.address
                )));
            }
        }
    }

    /// Closes this connection. Further calls are no-ops.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        let _ = self.stream.shutdown().await;
        self.mark_closed();
    }

    fn mark_closed(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.read_buffer.clear();
        tracing::debug!(connection_id = %self.id, address = %self.address, "connection closed");
        self.listener.connection_closed(&ConnectionClosedEvent {
            address: self.address.clone(),
            connection_id: self.id,
        });
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("closed", &self.closed)
            .field("pending_request", &self.pending_request)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::NoOpListener;
    use bytes::{BufMut, Bytes};
    use crate::protocol::CommandProtocol;
    use bson::doc;
    use mongo_core::protocol::{GetMoreMessage, KillCursorsMessage, OP_REPLY, REPLY_HEADER_SIZE};
    use mongo_core::MongoNamespace;
    use std::time::Duration;

    fn connection_over(stream: tokio::io::DuplexStream) -> Connection {
        Connection::new(
            Box::new(stream),
            ServerAddress::new("localhost", 27017),
            Arc::new(NoOpListener),
        )
    }

    fn empty_reply(response_to: i32) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_i32_le(REPLY_HEADER_SIZE as i32);
        buf.put_i32_le(1);
        buf.put_i32_le(response_to);
        buf.put_i32_le(OP_REPLY);
        buf.put_i32_le(0);
        buf.put_i64_le(0);
        buf.put_i32_le(0);
        buf.put_i32_le(0);
        buf.freeze()
    }

    #[test]
    fn test_connection_id_uniqueness() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
        assert!(id2.value() > id1.value());
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }

    fn get_more() -> RequestMessage {
        RequestMessage::GetMore(GetMoreMessage::new(MongoNamespace::new("test", "foo"), 42, 0))
    }

    async fn read_request_id(server: &mut tokio::io::DuplexStream) -> i32 {
        let mut header = [0u8; 16];
        server.read_exact(&mut header).await.unwrap();
        let length = i32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let mut body = vec![0u8; length - header.len()];
        server.read_exact(&mut body).await.unwrap();
        i32::from_le_bytes([header[4], header[5], header[6], header[7]])
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut connection = connection_over(client);

        let request_id = connection.send_message(get_more()).await.unwrap();
        assert!(connection.has_pending_request());
        assert_eq!(read_request_id(&mut server).await, request_id);

        server.write_all(&empty_reply(request_id)).await.unwrap();
        let buffers = connection.receive().await.unwrap();
        assert_eq!(buffers.reply_header().response_to(), request_id);
        assert!(!connection.has_pending_request());
        assert!(!connection.is_closed());

        assert_eq!(connection.unreleased_replies(), 1);
        drop(buffers);
        assert_eq!(connection.unreleased_replies(), 0);
    }

    #[tokio::test]
    async fn test_kill_cursors_leaves_nothing_pending() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut connection = connection_over(client);

        let request_id = connection
            .send_message(RequestMessage::KillCursors(KillCursorsMessage::new(vec![5])))
            .await
            .unwrap();
        assert_eq!(read_request_id(&mut server).await, request_id);
        assert!(!connection.has_pending_request());
    }

    #[tokio::test]
    async fn test_reply_to_other_request_closes_connection() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut connection = connection_over(client);

        let request_id = connection.send_message(get_more()).await.unwrap();
        read_request_id(&mut server).await;
        server.write_all(&empty_reply(request_id.wrapping_add(1000))).await.unwrap();

        let buffers = connection.receive().await.unwrap();
        assert_ne!(buffers.reply_header().response_to(), request_id);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_cancelled_command_poisons_connection() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut connection = connection_over(client);
        let command = CommandProtocol::new("admin", doc! { "ismaster": 1 });

        let cancelled = tokio::time::timeout(Duration::from_millis(20), command.execute(&mut connection)).await;
        assert!(cancelled.is_err());
        assert!(connection.has_pending_request());
        assert!(!connection.is_closed());

        // The late reply never reaches the next command.
        let stale = read_request_id(&mut server).await;
        server.write_all(&empty_reply(stale)).await.unwrap();

        let result = command.execute(&mut connection).await;
        assert!(matches!(result, Err(MongoError::Connection(_))), "unexpected result: {:?}", result);
        assert!(connection.is_closed());
    }

    #[tokio::test]
    async fn test_peer_close_marks_connection_closed() {
        let (client, server) = tokio::io::duplex(64);
        let mut connection = connection_over(client);
        drop(server);

        let result = connection.receive().await;
        assert!(matches!(result, Err(MongoError::Connection(_))));
        assert!(connection.is_closed());

        let result = connection
            .send_message(RequestMessage::KillCursors(KillCursorsMessage::new(vec![1])))
            .await;
        assert!(matches!(result, Err(MongoError::Connection(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = tokio::io::duplex(64);
        let mut connection = connection_over(client);
        connection.close().await;
        connection.close().await;
        assert!(connection.is_closed());
    }
}
