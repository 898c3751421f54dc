//! Error types for driver operations.

use std::io;
use std::time::Duration;

use bson::Document;
use thiserror::Error;

use crate::address::{ServerAddress, ServerCursor};

/// Boxed cause carried by [`MongoError::Internal`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for driver operations.
#[derive(Debug, Error)]
pub enum MongoError {
    /// Invalid or unsupported settings, raised while building a cluster.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Connection-related errors (network failures, disconnections).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (malformed replies, mismatched response ids).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Encoding or decoding of a document failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation timeout errors, including server selection.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The server rejected a command.
    #[error("command failed on server {address}: {response}")]
    CommandFailure {
        /// The response document returned by the server.
        response: Document,
        /// The server that produced the response.
        address: ServerAddress,
    },

    /// The server set the query-failure flag on a query reply.
    #[error("query failed on server {address}: {response}")]
    QueryFailure {
        /// The `$err` document returned by the server.
        response: Document,
        /// The server that produced the response.
        address: ServerAddress,
    },

    /// A get-more targeted a cursor the server no longer holds.
    #[error("cursor {} not found on server {}", .cursor.id(), .cursor.address())]
    CursorNotFound {
        /// The cursor that was requested.
        cursor: ServerCursor,
    },

    /// Authentication failed. Carries the credential identity, never its password.
    #[error("{message} (user '{username}', source '{database}')")]
    Security {
        /// Short description of what failed.
        message: String,
        /// The credential's source database.
        database: String,
        /// The credential's username.
        username: String,
        /// The command failure that caused the handshake to fail.
        #[source]
        source: Box<MongoError>,
    },

    /// An unexpected failure while processing a reply.
    #[error("internal error: {message}")]
    Internal {
        /// Short description of the failure.
        message: String,
        /// The original cause, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// No pooled connection became available in time.
    #[error("timed out after {timeout:?} waiting for a connection to {address}")]
    PoolTimeout {
        /// The server the pool connects to.
        address: ServerAddress,
        /// The configured maximum wait time.
        timeout: Duration,
    },

    /// Too many callers are already waiting for a pooled connection.
    #[error("too many waiters for a connection to {address} (max wait queue size {max_size})")]
    WaitQueueFull {
        /// The server the pool connects to.
        address: ServerAddress,
        /// The configured maximum wait queue size.
        max_size: usize,
    },

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl MongoError {
    /// Creates an internal error wrapping the given cause.
    pub fn internal(message: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(cause.into()),
        }
    }

    /// Returns `true` if this error came from the network layer.
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }
}

impl From<bson::ser::Error> for MongoError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<bson::de::Error> for MongoError {
    fn from(err: bson::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for driver operations.
pub type Result<T> = std::result::Result<T, MongoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use std::error::Error as _;

    fn address() -> ServerAddress {
        ServerAddress::new("db1.example.com", 27017)
    }

    #[test]
    fn test_configuration_error_display() {
        let err = MongoError::Configuration("unsupported cluster mode: sharded".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: unsupported cluster mode: sharded"
        );
    }

    #[test]
    fn test_cursor_not_found_display() {
        let err = MongoError::CursorNotFound {
            cursor: ServerCursor::new(42, address()),
        };
        assert_eq!(
            err.to_string(),
            "cursor 42 not found on server db1.example.com:27017"
        );
    }

    #[test]
    fn test_command_failure_display_contains_response() {
        let err = MongoError::CommandFailure {
            response: doc! { "ok": 0.0, "errmsg": "no such cmd" },
            address: address(),
        };
        let text = err.to_string();
        assert!(text.contains("db1.example.com:27017"));
        assert!(text.contains("no such cmd"));
    }

    #[test]
    fn test_security_error_exposes_cause() {
        let cause = MongoError::CommandFailure {
            response: doc! { "ok": 0.0, "errmsg": "auth failed" },
            address: address(),
        };
        let err = MongoError::Security {
            message: "exception authenticating".to_string(),
            database: "admin".to_string(),
            username: "alice".to_string(),
            source: Box::new(cause),
        };

        assert_eq!(
            err.to_string(),
            "exception authenticating (user 'alice', source 'admin')"
        );
        let source = err.source().unwrap();
        assert!(source.to_string().contains("auth failed"));
    }

    #[test]
    fn test_internal_error_wraps_cause() {
        let err = MongoError::internal("Internal exception", "decoder exploded");
        assert_eq!(err.to_string(), "internal error: Internal exception");
        assert_eq!(err.source().unwrap().to_string(), "decoder exploded");
    }

    #[test]
    fn test_pool_timeout_display() {
        let err = MongoError::PoolTimeout {
            address: address(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 50ms waiting for a connection to db1.example.com:27017"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: MongoError = io_err.into();
        assert!(matches!(err, MongoError::Io(_)));
        assert!(err.is_network_error());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MongoError>();
    }
}
