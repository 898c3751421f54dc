//! Per-server heartbeat monitor.

use std::sync::Arc;

use bson::doc;
use mongo_core::{MongoError, Result, ServerAddress};
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::description::ServerDescription;
use crate::config::ServerSettings;
use crate::connection::{Connection, ConnectionPool, StreamFactory};
use crate::listener::{ConnectionListener, ServerDescriptionChangedEvent, ServerListener};
use crate::protocol::CommandProtocol;

/// Periodically runs `ismaster` against one server and publishes what it learns.
///
/// Heartbeats use their own unauthenticated connection. A failed heartbeat
/// drops that connection, invalidates the server's pool and publishes an
/// unknown description carrying the error.
pub(crate) struct ServerMonitor {
    address: ServerAddress,
    settings: ServerSettings,
    stream_factory: Arc<dyn StreamFactory>,
    connection_listener: Arc<dyn ConnectionListener>,
    server_listener: Arc<dyn ServerListener>,
    pool: ConnectionPool,
    description_tx: watch::Sender<ServerDescription>,
    changes_tx: mpsc::UnboundedSender<ServerDescription>,
    check_now: Arc<Notify>,
    token: CancellationToken,
}

impl ServerMonitor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        address: ServerAddress,
        settings: ServerSettings,
        stream_factory: Arc<dyn StreamFactory>,
        connection_listener: Arc<dyn ConnectionListener>,
        server_listener: Arc<dyn ServerListener>,
        pool: ConnectionPool,
        description_tx: watch::Sender<ServerDescription>,
        changes_tx: mpsc::UnboundedSender<ServerDescription>,
        check_now: Arc<Notify>,
        token: CancellationToken,
    ) -> Self {
        Self {
            address,
            settings,
            stream_factory,
            connection_listener,
            server_listener,
            pool,
            description_tx,
            changes_tx,
            check_now,
            token,
        }
    }

    /// Runs until the monitor's token is cancelled.
    pub(crate) async fn run(self) {
        tracing::debug!(address = %self.address, "server monitor started");
        let mut connection: Option<Connection> = None;

        loop {
            let started = Instant::now();
            let description = self.check(&mut connection).await;
            self.publish(description);

            let next_check = started + self.settings.heartbeat_frequency();
            tokio::select! {
                _ = self.token.cancelled() => break,
                _ = tokio::time::sleep_until(next_check) => {}
                _ = self.check_now.notified() => {
                    let earliest = started + self.settings.min_heartbeat_frequency();
                    tokio::select! {
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep_until(earliest) => {}
                    }
                }
            }
        }

        if let Some(mut connection) = connection {
            connection.close().await;
        }
        tracing::debug!(address = %self.address, "server monitor stopped");
    }

    async fn check(&self, connection: &mut Option<Connection>) -> ServerDescription {
        let timeout = self.settings.heartbeat_connect_timeout();
        let result = match tokio::time::timeout(timeout, self.heartbeat(connection)).await {
            Ok(result) => result,
            Err(_) => Err(MongoError::Timeout(format!(
                "heartbeat to {} timed out after {:?}",
                self.address, timeout
            ))),
        };

        match result {
            Ok(description) => description,
            Err(e) => {
                *connection = None;
                if self.description_tx.borrow().is_ok() {
                    self.pool.invalidate();
                }
                tracing::warn!(address = %self.address, error = %e, "heartbeat failed");
                ServerDescription::with_error(self.address.clone(), &e)
            }
        }
    }

    async fn heartbeat(&self, slot: &mut Option<Connection>) -> Result<ServerDescription> {
        let mut connection = match slot.take() {
            Some(connection) if !connection.is_closed() => connection,
            _ => {
                Connection::open(
                    &self.address,
                    self.stream_factory.as_ref(),
                    Arc::clone(&self.connection_listener),
                )
                .await?
            }
        };

        let started = Instant::now();
        let reply = CommandProtocol::new("admin", doc! { "ismaster": 1 })
            .execute(&mut connection)
            .await?;
        let round_trip_time = started.elapsed();
        *slot = Some(connection);

        Ok(ServerDescription::from_is_master(
            self.address.clone(),
            reply.response(),
            round_trip_time,
        ))
    }

    fn publish(&self, description: ServerDescription) {
        let mut previous = None;
        self.description_tx.send_if_modified(|current| {
            let changed = !current.has_same_state(&description);
            if changed {
                previous = Some(current.clone());
            }
            *current = description.clone();
            changed
        });

        if let Some(previous) = previous {
            tracing::debug!(
                address = %self.address,
                server_type = %description.server_type(),
                "server description changed"
            );
            self.server_listener.server_description_changed(&ServerDescriptionChangedEvent {
                address: self.address.clone(),
                previous,
                new: description.clone(),
            });
            let _ = self.changes_tx.send(description);
        }
    }
}
