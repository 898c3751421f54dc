//! Runs a command against a database's `$cmd` collection.

use std::time::Instant;

use bson::{Bson, Document};
use mongo_core::codec::encode_document;
use mongo_core::protocol::{QueryMessage, ReplyMessage, RequestMessage};
use mongo_core::{DocumentCodec, MongoError, MongoNamespace, Result};
use tracing::instrument;

use super::result::CommandResult;
use crate::connection::Connection;

/// A command sent as an `OP_QUERY` on `<database>.$cmd`.
#[derive(Debug, Clone)]
pub struct CommandProtocol {
    namespace: MongoNamespace,
    command: Document,
    query_flags: i32,
}

impl CommandProtocol {
    /// Creates a command for `database`.
    pub fn new(database: impl Into<String>, command: Document) -> Self {
        Self {
            namespace: MongoNamespace::command(database),
            command,
            query_flags: 0,
        }
    }

    /// Sets the query flags, for example `QUERY_SLAVE_OK`.
    pub fn with_query_flags(mut self, flags: i32) -> Self {
        self.query_flags = flags;
        self
    }

    /// Returns the command document.
    pub fn command(&self) -> &Document {
        &self.command
    }

    fn command_name(&self) -> &str {
        self.command.keys().next().map(String::as_str).unwrap_or("")
    }

    /// Runs the command and returns the server's response.
    ///
    /// A reply flagged as a query failure, or whose `ok` field is not 1,
    /// yields [`MongoError::CommandFailure`].
    #[instrument(
        name = "protocol.command",
        skip_all,
        fields(
            database = %self.namespace.database(),
            command = %self.command_name(),
            address = %connection.address(),
        )
    )]
    pub async fn execute(&self, connection: &mut Connection) -> Result<CommandResult> {
        let started = Instant::now();
        let query = encode_document(&DocumentCodec, &self.command)?.freeze();
        let message = QueryMessage::new(self.namespace.clone(), query)
            .with_flags(self.query_flags)
            .with_number_to_return(-1);

        let request_id = connection.send_message(RequestMessage::Query(message)).await?;
        let mut buffers = connection.receive().await?;
        let reply = ReplyMessage::decode(&buffers, &DocumentCodec, request_id);
        buffers.close();
        let reply = reply?;

        let query_failure = reply.header().is_query_failure();
        let address = connection.address().clone();
        let response = reply
            .into_documents()
            .into_iter()
            .next()
            .ok_or_else(|| MongoError::Protocol("command reply contained no document".to_string()))?;

        if query_failure || !is_ok(&response) {
            tracing::debug!(response = %response, "command failed");
            return Err(MongoError::CommandFailure { response, address });
        }

        Ok(CommandResult::new(response, address, started.elapsed()))
    }
}

/// Returns `true` if the response's `ok` field is 1.
pub(crate) fn is_ok(response: &Document) -> bool {
    match response.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_is_ok_accepts_numeric_and_boolean() {
        assert!(is_ok(&doc! { "ok": 1.0 }));
        assert!(is_ok(&doc! { "ok": 1 }));
        assert!(is_ok(&doc! { "ok": 1i64 }));
        assert!(is_ok(&doc! { "ok": true }));
    }

    #[test]
    fn test_is_ok_rejects_failures() {
        assert!(!is_ok(&doc! { "ok": 0.0, "errmsg": "auth failed" }));
        assert!(!is_ok(&doc! { "ok": false }));
        assert!(!is_ok(&doc! {}));
    }

    #[test]
    fn test_command_targets_cmd_collection() {
        let command = CommandProtocol::new("admin", doc! { "ismaster": 1 });
        assert_eq!(command.namespace.full_name(), "admin.$cmd");
        assert_eq!(command.command_name(), "ismaster");
    }
}
