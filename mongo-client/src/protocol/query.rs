//! Runs a query and returns its first batch.

use std::sync::Arc;

use bytes::BytesMut;
use mongo_core::protocol::{QueryMessage, ReplyMessage, RequestMessage, ResponseBuffers};
use mongo_core::{Decoder, DocumentCodec, Encoder, MongoError, MongoNamespace, Result, ServerAddress};
use tracing::instrument;

use super::result::QueryResult;
use crate::connection::Connection;

/// A query sent as an `OP_QUERY`.
///
/// `Q` is the type of the query and field selector, encoded with the supplied
/// encoder; `T` is the type each returned document is decoded into.
pub struct QueryProtocol<Q, T> {
    namespace: MongoNamespace,
    query: Q,
    fields: Option<Q>,
    flags: i32,
    skip: i32,
    number_to_return: i32,
    encoder: Arc<dyn Encoder<Q>>,
    decoder: Arc<dyn Decoder<T>>,
}

impl<Q, T> QueryProtocol<Q, T> {
    /// Creates a query on `namespace`.
    pub fn new(
        namespace: MongoNamespace,
        query: Q,
        encoder: Arc<dyn Encoder<Q>>,
        decoder: Arc<dyn Decoder<T>>,
    ) -> Self {
        Self {
            namespace,
            query,
            fields: None,
            flags: 0,
            skip: 0,
            number_to_return: 0,
            encoder,
            decoder,
        }
    }

    /// Sets the field selector.
    pub fn with_fields(mut self, fields: Q) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Sets the query flags.
    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the number of documents to skip.
    pub fn with_skip(mut self, skip: i32) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the size of the first batch. Zero lets the server choose, a
    /// negative value asks for a single batch and closes the cursor.
    pub fn with_number_to_return(mut self, number_to_return: i32) -> Self {
        self.number_to_return = number_to_return;
        self
    }

    /// Returns the target namespace.
    pub fn namespace(&self) -> &MongoNamespace {
        &self.namespace
    }

    fn to_message(&self) -> Result<QueryMessage> {
        let mut query = BytesMut::new();
        self.encoder.encode(&self.query, &mut query)?;

        let mut message = QueryMessage::new(self.namespace.clone(), query.freeze())
            .with_flags(self.flags)
            .with_skip(self.skip)
            .with_number_to_return(self.number_to_return);

        if let Some(fields) = &self.fields {
            let mut selector = BytesMut::new();
            self.encoder.encode(fields, &mut selector)?;
            message = message.with_fields(selector.freeze());
        }
        Ok(message)
    }

    /// Runs the query and decodes the first batch.
    ///
    /// A reply flagged as a query failure yields [`MongoError::QueryFailure`]
    /// carrying the server's `$err` document.
    #[instrument(
        name = "protocol.query",
        skip_all,
        fields(namespace = %self.namespace, address = %connection.address())
    )]
    pub async fn execute(&self, connection: &mut Connection) -> Result<QueryResult<T>> {
        let message = self.to_message()?;
        let request_id = connection.send_message(RequestMessage::Query(message)).await?;
        let mut buffers = connection.receive().await?;
        let result = self.process_reply(&buffers, request_id, connection.address());
        buffers.close();
        result
    }

    fn process_reply(
        &self,
        buffers: &ResponseBuffers,
        request_id: i32,
        address: &ServerAddress,
    ) -> Result<QueryResult<T>> {
        if buffers.reply_header().is_query_failure() {
            return Err(query_failure(buffers, request_id, address));
        }

        let reply = ReplyMessage::decode(buffers, self.decoder.as_ref(), request_id)?;
        let header = *reply.header();
        tracing::debug!(
            returned = header.number_returned(),
            cursor_id = header.cursor_id(),
            "query returned"
        );
        Ok(QueryResult::from_reply(&header, reply.into_documents(), address))
    }
}

/// Builds a `QueryFailure` error from a reply carrying the query-failure flag.
pub(crate) fn query_failure(buffers: &ResponseBuffers, request_id: i32, address: &ServerAddress) -> MongoError {
    match ReplyMessage::decode(buffers, &DocumentCodec, request_id) {
        Ok(reply) => MongoError::QueryFailure {
            response: reply.into_documents().into_iter().next().unwrap_or_default(),
            address: address.clone(),
        },
        Err(e) => e,
    }
}

impl<Q, T> std::fmt::Debug for QueryProtocol<Q, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryProtocol")
            .field("namespace", &self.namespace)
            .field("flags", &self.flags)
            .field("skip", &self.skip)
            .field("number_to_return", &self.number_to_return)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, Document};
    use mongo_core::protocol::{ReplyHeader, REPLY_QUERY_FAILURE};

    fn protocol() -> QueryProtocol<Document, Document> {
        QueryProtocol::new(
            MongoNamespace::new("test", "foo"),
            doc! { "x": 1 },
            Arc::new(DocumentCodec),
            Arc::new(DocumentCodec),
        )
    }

    fn buffers(response_to: i32, flags: i32, cursor_id: i64, docs: &[Document]) -> ResponseBuffers {
        let mut body = BytesMut::new();
        for d in docs {
            DocumentCodec.encode(d, &mut body).unwrap();
        }
        let header = ReplyHeader::new(0, 1, response_to, flags, cursor_id, 0, docs.len() as i32);
        ResponseBuffers::new(header, body.freeze())
    }

    #[test]
    fn test_message_includes_field_selector() {
        let message = protocol()
            .with_fields(doc! { "x": 1 })
            .with_skip(3)
            .to_message()
            .unwrap();

        let mut encoded = BytesMut::new();
        RequestMessage::Query(message).encode(1, &mut encoded).unwrap();

        let mut query = BytesMut::new();
        DocumentCodec.encode(&doc! { "x": 1 }, &mut query).unwrap();
        // header, flags, "test.foo\0", skip, number to return, query, fields
        assert_eq!(encoded.len(), 16 + 4 + 9 + 4 + 4 + 2 * query.len());
    }

    #[test]
    fn test_process_reply_keeps_open_cursor() {
        let address = ServerAddress::new("localhost", 27017);
        let reply = buffers(5, 0, 77, &[doc! { "a": 1 }]);

        let result = protocol().process_reply(&reply, 5, &address).unwrap();
        assert_eq!(result.results(), &[doc! { "a": 1 }]);
        assert_eq!(result.cursor().unwrap().id(), 77);
    }

    #[test]
    fn test_process_reply_reports_query_failure() {
        let address = ServerAddress::new("localhost", 27017);
        let reply = buffers(5, REPLY_QUERY_FAILURE, 0, &[doc! { "$err": "bad query" }]);

        match protocol().process_reply(&reply, 5, &address) {
            Err(MongoError::QueryFailure { response, address: at }) => {
                assert_eq!(response.get_str("$err").unwrap(), "bad query");
                assert_eq!(at, address);
            }
            other => panic!("expected query failure, got {:?}", other),
        }
    }

    #[test]
    fn test_process_reply_rejects_foreign_reply() {
        let address = ServerAddress::default();
        let reply = buffers(6, 0, 0, &[]);
        assert!(matches!(
            protocol().process_reply(&reply, 5, &address),
            Err(MongoError::Protocol(_))
        ));
    }
}
