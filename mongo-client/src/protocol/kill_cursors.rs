//! Tells a server to release cursors the client no longer needs.

use mongo_core::protocol::{KillCursorsMessage, RequestMessage};
use mongo_core::{MongoError, Result, ServerCursor};
use tracing::instrument;

use crate::connection::Connection;

/// An `OP_KILL_CURSORS`. The server sends no reply.
#[derive(Debug, Clone)]
pub struct KillCursorsProtocol {
    cursors: Vec<ServerCursor>,
}

impl KillCursorsProtocol {
    /// Creates a kill-cursors operation. Every cursor must live on the same server.
    pub fn new(cursors: Vec<ServerCursor>) -> Self {
        Self { cursors }
    }

    /// Returns the cursors to kill.
    pub fn cursors(&self) -> &[ServerCursor] {
        &self.cursors
    }

    /// Sends the kill-cursors message.
    #[instrument(name = "protocol.kill_cursors", skip_all, fields(count = self.cursors.len()))]
    pub async fn execute(&self, connection: &mut Connection) -> Result<()> {
        if let Some(foreign) = self.cursors.iter().find(|c| c.address() != connection.address()) {
            return Err(MongoError::Protocol(format!(
                "cursor {} belongs to {}, not {}",
                foreign.id(),
                foreign.address(),
                connection.address()
            )));
        }
        if self.cursors.is_empty() {
            return Ok(());
        }

        let ids = self.cursors.iter().map(ServerCursor::id).collect();
        connection
            .send_message(RequestMessage::KillCursors(KillCursorsMessage::new(ids)))
            .await?;
        Ok(())
    }
}
