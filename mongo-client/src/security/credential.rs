//! Credentials used to authenticate connections.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Authentication mechanisms understood by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthenticationMechanism {
    /// The legacy nonce and challenge handshake.
    #[default]
    MongoDbCr,
}

impl AuthenticationMechanism {
    /// Returns the mechanism name as the server spells it.
    pub fn mechanism_name(&self) -> &'static str {
        match self {
            Self::MongoDbCr => "MONGODB-CR",
        }
    }
}

impl fmt::Display for AuthenticationMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mechanism_name())
    }
}

impl FromStr for AuthenticationMechanism {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MONGODB-CR" => Ok(Self::MongoDbCr),
            other => Err(ConfigError::new(format!(
                "unsupported authentication mechanism: {}",
                other
            ))),
        }
    }
}

/// A user's identity and secret for one source database.
///
/// `Debug` output never contains the password.
#[derive(Clone, PartialEq, Eq)]
pub struct MongoCredential {
    mechanism: AuthenticationMechanism,
    source: String,
    username: String,
    password: String,
}

impl MongoCredential {
    /// Creates a `MONGODB-CR` credential for `username` on database `source`.
    pub fn mongodb_cr(
        username: impl Into<String>,
        source: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            mechanism: AuthenticationMechanism::MongoDbCr,
            source: source.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// Returns the authentication mechanism.
    pub fn mechanism(&self) -> AuthenticationMechanism {
        self.mechanism
    }

    /// Returns the database the user is defined in.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for MongoCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MongoCredential")
            .field("mechanism", &self.mechanism)
            .field("source", &self.source)
            .field("username", &self.username)
            .field("password", &"<hidden>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_password() {
        let credential = MongoCredential::mongodb_cr("alice", "admin", "s3cr3t-pw");
        let debug = format!("{:?}", credential);
        assert!(debug.contains("alice"));
        assert!(debug.contains("admin"));
        assert!(!debug.contains("s3cr3t-pw"));
    }

    #[test]
    fn test_mechanism_names() {
        assert_eq!(AuthenticationMechanism::MongoDbCr.to_string(), "MONGODB-CR");
        assert_eq!(
            "MONGODB-CR".parse::<AuthenticationMechanism>().unwrap(),
            AuthenticationMechanism::MongoDbCr
        );
        assert!("SCRAM-SHA-1".parse::<AuthenticationMechanism>().is_err());
    }
}
