//! Server addresses, namespaces and cursor handles.

use std::fmt;
use std::str::FromStr;

use crate::error::MongoError;

/// Default port a server listens on.
pub const DEFAULT_PORT: u16 = 27017;

/// Host and port of a single server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    /// Creates an address from a host and port. The host is lower-cased.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// Returns the host name.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for ServerAddress {
    type Err = MongoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MongoError::Configuration("empty server address".to_string()));
        }

        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = port.parse::<u16>().map_err(|_| {
                    MongoError::Configuration(format!("invalid port in server address '{}'", s))
                })?;
                Ok(Self::new(host, port))
            }
            Some(_) => Err(MongoError::Configuration(format!(
                "missing host in server address '{}'",
                s
            ))),
            None => Ok(Self::new(s, DEFAULT_PORT)),
        }
    }
}

impl From<std::net::SocketAddr> for ServerAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Server-side iteration state: a cursor id on a particular server.
///
/// A cursor id of zero means the cursor is exhausted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerCursor {
    id: i64,
    address: ServerAddress,
}

impl ServerCursor {
    /// Creates a cursor handle.
    pub fn new(id: i64, address: ServerAddress) -> Self {
        Self { id, address }
    }

    /// Returns the cursor id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Returns the server holding the cursor.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }
}

impl fmt::Display for ServerCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerCursor[id={}, address={}]", self.id, self.address)
    }
}

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MongoNamespace {
    database: String,
    collection: String,
}

impl MongoNamespace {
    /// Name of the pseudo-collection commands are sent to.
    pub const COMMAND_COLLECTION_NAME: &'static str = "$cmd";

    /// Creates a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    /// Returns the namespace that commands against `database` are sent to.
    pub fn command(database: impl Into<String>) -> Self {
        Self::new(database, Self::COMMAND_COLLECTION_NAME)
    }

    /// Returns the database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Returns `database.collection`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl fmt::Display for MongoNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}
