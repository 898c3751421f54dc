//! Reply header, raw reply buffers and reply decoding.

use std::fmt;

use bytes::{Buf, Bytes};

use super::constants::*;
use crate::codec::Decoder;
use crate::error::{MongoError, Result};

/// Header fields of an `OP_REPLY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    message_length: i32,
    request_id: i32,
    response_to: i32,
    response_flags: i32,
    cursor_id: i64,
    starting_from: i32,
    number_returned: i32,
}

impl ReplyHeader {
    /// Creates a reply header from its individual fields.
    pub fn new(
        message_length: i32,
        request_id: i32,
        response_to: i32,
        response_flags: i32,
        cursor_id: i64,
        starting_from: i32,
        number_returned: i32,
    ) -> Self {
        Self {
            message_length,
            request_id,
            response_to,
            response_flags,
            cursor_id,
            starting_from,
            number_returned,
        }
    }

    /// Reads a reply header. `src` must hold at least [`REPLY_HEADER_SIZE`] bytes.
    pub fn read_from(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < REPLY_HEADER_SIZE {
            return Err(MongoError::Protocol(format!(
                "reply header needs {} bytes, got {}",
                REPLY_HEADER_SIZE,
                src.remaining()
            )));
        }

        let message_length = src.get_i32_le();
        let request_id = src.get_i32_le();
        let response_to = src.get_i32_le();
        let op_code = src.get_i32_le();
        if op_code != OP_REPLY {
            return Err(MongoError::Protocol(format!(
                "unexpected op code {} in reply, expected {}",
                op_code, OP_REPLY
            )));
        }

        Ok(Self {
            message_length,
            request_id,
            response_to,
            response_flags: src.get_i32_le(),
            cursor_id: src.get_i64_le(),
            starting_from: src.get_i32_le(),
            number_returned: src.get_i32_le(),
        })
    }

    /// Returns the total message length.
    pub fn message_length(&self) -> i32 {
        self.message_length
    }

    /// Returns the server-assigned id of this reply.
    pub fn request_id(&self) -> i32 {
        self.request_id
    }

    /// Returns the id of the request this reply answers.
    pub fn response_to(&self) -> i32 {
        self.response_to
    }

    /// Returns the raw response flags.
    pub fn response_flags(&self) -> i32 {
        self.response_flags
    }

    /// Returns the cursor id, zero if the cursor is exhausted.
    pub fn cursor_id(&self) -> i64 {
        self.cursor_id
    }

    /// Returns the position of the first returned document in the cursor.
    pub fn starting_from(&self) -> i32 {
        self.starting_from
    }

    /// Returns the number of documents in the reply.
    pub fn number_returned(&self) -> i32 {
        self.number_returned
    }

    /// Returns `true` if the cursor-not-found flag is set.
    pub fn is_cursor_not_found(&self) -> bool {
        self.response_flags & REPLY_CURSOR_NOT_FOUND != 0
    }

    /// Returns `true` if the query-failure flag is set.
    pub fn is_query_failure(&self) -> bool {
        self.response_flags & REPLY_QUERY_FAILURE != 0
    }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Raw, not yet decoded reply bytes plus header metadata.
///
/// Released exactly once: explicitly through [`close`](Self::close) or,
/// failing that, when dropped.
pub struct ResponseBuffers {
    header: ReplyHeader,
    body: Bytes,
    closed: bool,
    on_release: Option<ReleaseHook>,
}

impl ResponseBuffers {
    /// Creates response buffers from a parsed header and the document bytes that follow it.
    pub fn new(header: ReplyHeader, body: Bytes) -> Self {
        Self {
            header,
            body,
            closed: false,
            on_release: None,
        }
    }

    /// Registers a hook that runs when the buffers are released.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Returns the reply header.
    pub fn reply_header(&self) -> &ReplyHeader {
        &self.header
    }

    /// Returns the raw document bytes. Empty once closed.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` once the buffers have been released.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Releases the buffers. Further calls are no-ops.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.body = Bytes::new();
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }

    /// Splits the body into one byte slice per document.
    pub fn documents(&self) -> Result<Vec<Bytes>> {
        if self.closed {
            return Err(MongoError::Protocol("response buffers already released".to_string()));
        }

        let expected = self.header.number_returned.max(0) as usize;
        let mut documents = Vec::with_capacity(expected);
        let mut rest = self.body.clone();

        while !rest.is_empty() {
            if rest.len() < 4 {
                return Err(MongoError::Protocol("truncated document in reply".to_string()));
            }
            let length = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
            if length < 5 || length as usize > rest.len() {
                return Err(MongoError::Protocol(format!(
                    "invalid document length {} in reply",
                    length
                )));
            }
            documents.push(rest.split_to(length as usize));
        }

        if documents.len() != expected {
            return Err(MongoError::Protocol(format!(
                "reply declared {} documents but contained {}",
                expected,
                documents.len()
            )));
        }
        Ok(documents)
    }
}

impl fmt::Debug for ResponseBuffers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuffers")
            .field("header", &self.header)
            .field("body_len", &self.body.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for ResponseBuffers {
    fn drop(&mut self) {
        self.close();
    }
}

/// A reply whose documents have been decoded.
#[derive(Debug, Clone)]
pub struct ReplyMessage<T> {
    header: ReplyHeader,
    documents: Vec<T>,
}

impl<T> ReplyMessage<T> {
    /// Decodes every document in `buffers`, checking that the reply answers `request_id`.
    ///
    /// Does not release the buffers; that stays with whoever owns them.
    pub fn decode(buffers: &ResponseBuffers, decoder: &dyn Decoder<T>, request_id: i32) -> Result<Self> {
        let header = *buffers.reply_header();
        if header.response_to() != request_id {
            return Err(MongoError::Protocol(format!(
                "reply responds to request {} but request {} was sent",
                header.response_to(),
                request_id
            )));
        }

        let documents = buffers
            .documents()?
            .iter()
            .map(|bytes| decoder.decode(bytes))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { header, documents })
    }

    /// Returns the reply header.
    pub fn header(&self) -> &ReplyHeader {
        &self.header
    }

    /// Returns the decoded documents.
    pub fn documents(&self) -> &[T] {
        &self.documents
    }

    /// Consumes the reply, returning the decoded documents.
    pub fn into_documents(self) -> Vec<T> {
        self.documents
    }
}
