//! Fetches the next batch of an open cursor.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use mongo_core::protocol::{GetMoreMessage, ReplyMessage, RequestMessage, ResponseBuffers};
use mongo_core::{Decoder, MongoError, MongoNamespace, Result, ServerAddress, ServerCursor};
use tokio::task::JoinHandle;
use tracing::instrument;

use super::query::query_failure;
use super::result::QueryResult;
use super::SingleResultCallback;
use crate::connection::{Connection, PooledConnection};

/// An `OP_GET_MORE` for a server cursor.
pub struct GetMoreProtocol<T> {
    namespace: MongoNamespace,
    cursor: ServerCursor,
    number_to_return: i32,
    decoder: Arc<dyn Decoder<T>>,
}

impl<T: Send + 'static> GetMoreProtocol<T> {
    /// Creates a get-more for `cursor` on `namespace`.
    pub fn new(
        namespace: MongoNamespace,
        cursor: ServerCursor,
        number_to_return: i32,
        decoder: Arc<dyn Decoder<T>>,
    ) -> Self {
        Self {
            namespace,
            cursor,
            number_to_return,
            decoder,
        }
    }

    /// Returns the cursor this get-more continues.
    pub fn cursor(&self) -> &ServerCursor {
        &self.cursor
    }

    fn to_message(&self) -> RequestMessage {
        RequestMessage::GetMore(GetMoreMessage::new(
            self.namespace.clone(),
            self.cursor.id(),
            self.number_to_return,
        ))
    }

    /// Fetches the next batch on the caller's task.
    #[instrument(
        name = "protocol.get_more",
        skip_all,
        fields(namespace = %self.namespace, cursor_id = self.cursor.id(), address = %connection.address())
    )]
    pub async fn execute(&self, connection: &mut Connection) -> Result<QueryResult<T>> {
        let request_id = connection.send_message(self.to_message()).await?;
        let buffers = connection.receive().await?;
        self.process_reply(buffers, request_id, connection.address())
    }

    /// Fetches the next batch on a spawned task that owns `connection`.
    ///
    /// The connection goes back to its pool before `callback` runs, and the
    /// callback runs exactly once with either the batch or an error.
    pub fn execute_async<C>(self, mut connection: PooledConnection, callback: C) -> JoinHandle<()>
    where
        C: SingleResultCallback<QueryResult<T>>,
    {
        tokio::spawn(async move {
            let sent: Result<(i32, ResponseBuffers)> = async {
                let request_id = connection.send_message(self.to_message()).await?;
                let buffers = connection.receive().await?;
                Ok((request_id, buffers))
            }
            .await;

            let address = connection.address().clone();
            drop(connection);

            let result = match sent {
                Ok((request_id, buffers)) => self.process_reply(buffers, request_id, &address),
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                tracing::debug!(cursor_id = self.cursor.id(), error = %e, "async get-more failed");
            }
            callback.on_result(result);
        })
    }

    /// Turns a reply into a batch. The buffers are closed on every path.
    fn process_reply(
        &self,
        mut buffers: ResponseBuffers,
        request_id: i32,
        address: &ServerAddress,
    ) -> Result<QueryResult<T>> {
        let result = self.decode_reply(&buffers, request_id, address);
        buffers.close();
        result
    }

    fn decode_reply(
        &self,
        buffers: &ResponseBuffers,
        request_id: i32,
        address: &ServerAddress,
    ) -> Result<QueryResult<T>> {
        let header = *buffers.reply_header();
        if header.response_to() != request_id {
            return Err(MongoError::internal(
                "Internal exception",
                format!(
                    "reply responds to request {} but request {} was sent",
                    header.response_to(),
                    request_id
                ),
            ));
        }

        if header.is_cursor_not_found() {
            return Err(MongoError::CursorNotFound {
                cursor: ServerCursor::new(self.cursor.id(), address.clone()),
            });
        }

        if header.is_query_failure() {
            return Err(query_failure(buffers, request_id, address));
        }

        let decoded = catch_unwind(AssertUnwindSafe(|| {
            ReplyMessage::decode(buffers, self.decoder.as_ref(), request_id)
        }));
        let reply = match decoded {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(MongoError::internal("Internal exception", e)),
            Err(panic) => return Err(MongoError::internal("Internal exception", panic_message(panic))),
        };

        let header = *reply.header();
        Ok(QueryResult::from_reply(&header, reply.into_documents(), address))
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("decoder panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("decoder panicked: {}", message)
    } else {
        "decoder panicked".to_string()
    }
}

impl<T> std::fmt::Debug for GetMoreProtocol<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetMoreProtocol")
            .field("namespace", &self.namespace)
            .field("cursor", &self.cursor)
            .field("number_to_return", &self.number_to_return)
            .finish()
    }
}
