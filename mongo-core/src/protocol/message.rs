//! Request messages for the legacy wire protocol.

use std::sync::atomic::{AtomicI32, Ordering};

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use crate::address::MongoNamespace;
use crate::error::{MongoError, Result};

/// Global request id counter.
static REQUEST_ID_COUNTER: AtomicI32 = AtomicI32::new(1);

/// Generates a unique request id.
pub fn next_request_id() -> i32 {
    REQUEST_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A request ready to be written to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMessage {
    /// `OP_QUERY`.
    Query(QueryMessage),
    /// `OP_GET_MORE`.
    GetMore(GetMoreMessage),
    /// `OP_KILL_CURSORS`.
    KillCursors(KillCursorsMessage),
}

impl RequestMessage {
    /// Returns the op code written in the message header.
    pub fn op_code(&self) -> i32 {
        match self {
            Self::Query(_) => OP_QUERY,
            Self::GetMore(_) => OP_GET_MORE,
            Self::KillCursors(_) => OP_KILL_CURSORS,
        }
    }

    /// Returns `true` if the server answers this message with a reply.
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::KillCursors(_))
    }

    /// Encodes the full message, header included, under the given request id.
    pub fn encode(&self, request_id: i32, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        dst.put_i32_le(0);
        dst.put_i32_le(request_id);
        dst.put_i32_le(0);
        dst.put_i32_le(self.op_code());

        match self {
            Self::Query(query) => query.encode_body(dst),
            Self::GetMore(get_more) => get_more.encode_body(dst),
            Self::KillCursors(kill) => kill.encode_body(dst),
        }

        let length = dst.len() - start;
        if length > MAX_MESSAGE_SIZE {
            dst.truncate(start);
            return Err(MongoError::Protocol(format!(
                "message of {} bytes exceeds maximum of {}",
                length, MAX_MESSAGE_SIZE
            )));
        }
        dst[start..start + 4].copy_from_slice(&(length as i32).to_le_bytes());
        Ok(())
    }
}

fn put_cstring(dst: &mut BytesMut, value: &str) {
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
}

/// `OP_QUERY`: a query or a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryMessage {
    namespace: MongoNamespace,
    flags: i32,
    number_to_skip: i32,
    number_to_return: i32,
    query: Bytes,
    fields: Option<Bytes>,
}

impl QueryMessage {
    /// Creates a query message from an already encoded query document.
    pub fn new(namespace: MongoNamespace, query: Bytes) -> Self {
        Self {
            namespace,
            flags: 0,
            number_to_skip: 0,
            number_to_return: 0,
            query,
            fields: None,
        }
    }

    /// Sets the query flags.
    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    /// Sets the number of documents to skip.
    pub fn with_skip(mut self, skip: i32) -> Self {
        self.number_to_skip = skip;
        self
    }

    /// Sets the number of documents to return in the first batch.
    pub fn with_number_to_return(mut self, number_to_return: i32) -> Self {
        self.number_to_return = number_to_return;
        self
    }

    /// Sets an already encoded field selector.
    pub fn with_fields(mut self, fields: Bytes) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Returns the target namespace.
    pub fn namespace(&self) -> &MongoNamespace {
        &self.namespace
    }

    /// Returns the query flags.
    pub fn flags(&self) -> i32 {
        self.flags
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_i32_le(self.flags);
        put_cstring(dst, &self.namespace.full_name());
        dst.put_i32_le(self.number_to_skip);
        dst.put_i32_le(self.number_to_return);
        dst.put_slice(&self.query);
        if let Some(fields) = &self.fields {
            dst.put_slice(fields);
        }
    }
}

/// `OP_GET_MORE`: next batch of an open cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMoreMessage {
    namespace: MongoNamespace,
    number_to_return: i32,
    cursor_id: i64,
}

impl GetMoreMessage {
    /// Creates a get-more message.
    pub fn new(namespace: MongoNamespace, cursor_id: i64, number_to_return: i32) -> Self {
        Self {
            namespace,
            number_to_return,
            cursor_id,
        }
    }

    /// Returns the requested cursor id.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_i32_le(0);
        put_cstring(dst, &self.namespace.full_name());
        dst.put_i32_le(self.number_to_return);
        dst.put_i64_le(self.cursor_id);
    }
}

/// `OP_KILL_CURSORS`: release server-side cursors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillCursorsMessage {
    cursor_ids: Vec<i64>,
}

impl KillCursorsMessage {
    /// Creates a kill-cursors message.
    pub fn new(cursor_ids: Vec<i64>) -> Self {
        Self { cursor_ids }
    }

    /// Returns the cursor ids to kill.
    pub fn cursor_ids(&self) -> &[i64] {
        &self.cursor_ids
    }

    fn encode_body(&self, dst: &mut BytesMut) {
        dst.put_i32_le(0);
        dst.put_i32_le(self.cursor_ids.len() as i32);
        for id in &self.cursor_ids {
            dst.put_i64_le(*id);
        }
    }
}
