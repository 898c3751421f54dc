//! Results of protocol operations.

use std::time::Duration;

use bson::Document;
use mongo_core::protocol::ReplyHeader;
use mongo_core::{ServerAddress, ServerCursor};

/// The response to a successful command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    response: Document,
    address: ServerAddress,
    elapsed: Duration,
}

impl CommandResult {
    /// Creates a command result.
    pub fn new(response: Document, address: ServerAddress, elapsed: Duration) -> Self {
        Self {
            response,
            address,
            elapsed,
        }
    }

    /// Returns the response document.
    pub fn response(&self) -> &Document {
        &self.response
    }

    /// Returns the server that ran the command.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Returns the time between sending the command and decoding its reply.
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Consumes the result, returning the response document.
    pub fn into_response(self) -> Document {
        self.response
    }
}

/// One batch of a query or get-more, plus the cursor to continue from.
#[derive(Debug, Clone)]
pub struct QueryResult<T> {
    results: Vec<T>,
    cursor: Option<ServerCursor>,
    starting_from: i32,
}

impl<T> QueryResult<T> {
    /// Creates a query result. A zero `cursor_id` means the cursor is exhausted.
    pub fn new(results: Vec<T>, cursor_id: i64, starting_from: i32, address: ServerAddress) -> Self {
        let cursor = (cursor_id != 0).then(|| ServerCursor::new(cursor_id, address));
        Self {
            results,
            cursor,
            starting_from,
        }
    }

    pub(crate) fn from_reply(header: &ReplyHeader, results: Vec<T>, address: &ServerAddress) -> Self {
        Self::new(results, header.cursor_id(), header.starting_from(), address.clone())
    }

    /// Returns the decoded batch.
    pub fn results(&self) -> &[T] {
        &self.results
    }

    /// Consumes the result, returning the decoded batch.
    pub fn into_results(self) -> Vec<T> {
        self.results
    }

    /// Returns the cursor to continue from, if the server holds more batches.
    pub fn cursor(&self) -> Option<&ServerCursor> {
        self.cursor.as_ref()
    }

    /// Returns the position of the first document of this batch in the cursor.
    pub fn starting_from(&self) -> i32 {
        self.starting_from
    }

    /// Returns `true` if the server may hold more batches.
    pub fn has_more(&self) -> bool {
        self.cursor.is_some()
    }
}
