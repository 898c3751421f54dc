//! Connection authentication.

use bson::doc;
use mongo_core::{MongoError, Result};
use tracing::instrument;

use super::credential::{AuthenticationMechanism, MongoCredential};
use crate::connection::Connection;
use crate::protocol::CommandProtocol;

/// Progress of an authentication handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationState {
    /// Nothing has been sent yet.
    Init,
    /// The server handed out a nonce.
    NonceRequested {
        /// The nonce returned by `getnonce`.
        nonce: String,
    },
    /// The digest key has been sent.
    ChallengeSent,
    /// The server accepted the credential.
    Authenticated,
    /// The handshake failed. It is not retried.
    Failed,
}

/// Authenticates a connection with one credential.
#[derive(Debug)]
pub enum Authenticator {
    /// `MONGODB-CR` nonce and challenge handshake.
    Native(NativeAuthenticator),
}

impl Authenticator {
    /// Creates the authenticator matching the credential's mechanism.
    pub fn for_credential(credential: MongoCredential) -> Self {
        match credential.mechanism() {
            AuthenticationMechanism::MongoDbCr => Self::Native(NativeAuthenticator::new(credential)),
        }
    }

    /// Runs the handshake on `connection`.
    pub async fn authenticate(&mut self, connection: &mut Connection) -> Result<()> {
        match self {
            Self::Native(native) => native.authenticate(connection).await,
        }
    }

    /// Returns the handshake state.
    pub fn state(&self) -> &AuthenticationState {
        match self {
            Self::Native(native) => native.state(),
        }
    }

    /// Returns the credential being authenticated.
    pub fn credential(&self) -> &MongoCredential {
        match self {
            Self::Native(native) => native.credential(),
        }
    }
}

/// The `MONGODB-CR` handshake: `getnonce`, then `authenticate` with an MD5 key.
#[derive(Debug)]
pub struct NativeAuthenticator {
    credential: MongoCredential,
    state: AuthenticationState,
}

impl NativeAuthenticator {
    /// Creates an authenticator in the `Init` state.
    pub fn new(credential: MongoCredential) -> Self {
        Self {
            credential,
            state: AuthenticationState::Init,
        }
    }

    /// Returns the handshake state.
    pub fn state(&self) -> &AuthenticationState {
        &self.state
    }

    /// Returns the credential being authenticated.
    pub fn credential(&self) -> &MongoCredential {
        &self.credential
    }

    /// Runs the handshake.
    ///
    /// Succeeds immediately once authenticated. After a failure every further
    /// call fails without touching the connection.
    ///
    /// A refused credential is reported as [`MongoError::Security`]. Other
    /// errors, such as a dropped socket, are returned as they are.
    #[instrument(
        name = "authenticator.authenticate",
        skip_all,
        fields(
            user = %self.credential.username(),
            source = %self.credential.source(),
            address = %connection.address(),
        )
    )]
    pub async fn authenticate(&mut self, connection: &mut Connection) -> Result<()> {
        match self.state {
            AuthenticationState::Authenticated => return Ok(()),
            AuthenticationState::Failed => {
                return Err(self.security_error(
                    "authentication previously failed",
                    MongoError::Internal {
                        message: "authentication is not retried".to_string(),
                        source: None,
                    },
                ))
            }
            _ => {}
        }

        match self.handshake(connection).await {
            Ok(()) => {
                self.state = AuthenticationState::Authenticated;
                tracing::debug!("authenticated");
                Ok(())
            }
            Err(e) => {
                self.state = AuthenticationState::Failed;
                tracing::warn!(error = %e, "authentication failed");
                if is_rejection(&e) {
                    Err(self.security_error("authentication failed", e))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn handshake(&mut self, connection: &mut Connection) -> Result<()> {
        let source = self.credential.source().to_string();

        let nonce_reply = CommandProtocol::new(source.clone(), doc! { "getnonce": 1 })
            .execute(connection)
            .await?;
        let nonce = nonce_reply
            .response()
            .get_str("nonce")
            .map_err(|_| MongoError::Protocol(MISSING_NONCE.to_string()))?
            .to_string();
        self.state = AuthenticationState::NonceRequested {
            nonce: nonce.clone(),
        };

        let key = create_auth_key(self.credential.username(), self.credential.password(), &nonce);
        let command = doc! {
            "authenticate": 1,
            "user": self.credential.username(),
            "nonce": nonce,
            "key": key,
        };
        self.state = AuthenticationState::ChallengeSent;
        CommandProtocol::new(source, command).execute(connection).await?;
        Ok(())
    }

    fn security_error(&self, message: &str, source: MongoError) -> MongoError {
        MongoError::Security {
            message: message.to_string(),
            database: self.credential.source().to_string(),
            username: self.credential.username().to_string(),
            source: Box::new(source),
        }
    }
}

const MISSING_NONCE: &str = "getnonce reply has no nonce";

/// Whether a handshake error means the server refused the credential.
/// Transport errors and timeouts are passed to the caller unchanged.
fn is_rejection(error: &MongoError) -> bool {
    match error {
        MongoError::CommandFailure { .. } => true,
        MongoError::Protocol(message) => message == MISSING_NONCE,
        _ => false,
    }
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Digest of the user's password as stored by the server.
fn password_digest(username: &str, password: &str) -> String {
    md5_hex(&format!("{}:mongo:{}", username, password))
}

/// The key sent with `authenticate`.
fn create_auth_key(username: &str, password: &str, nonce: &str) -> String {
    md5_hex(&format!("{}{}{}", nonce, username, password_digest(username, password)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest() {
        assert_eq!(password_digest("alice", "secret"), "b2d1852f112d209beb4b60a128da1bd2");
    }

    #[test]
    fn test_auth_key() {
        assert_eq!(
            create_auth_key("alice", "secret", "2375531c32080ae8"),
            "388878ce374fb8f514cee621de350352"
        );
    }

    #[test]
    fn test_for_credential_selects_native() {
        let authenticator = Authenticator::for_credential(MongoCredential::mongodb_cr("alice", "admin", "secret"));
        assert!(matches!(authenticator, Authenticator::Native(_)));
        assert_eq!(authenticator.state(), &AuthenticationState::Init);
        assert_eq!(authenticator.credential().username(), "alice");
    }

    #[test]
    fn test_only_rejections_become_security_errors() {
        let refused = MongoError::CommandFailure {
            response: bson::doc! { "errmsg": "auth fails", "ok": 0.0 },
            address: mongo_core::ServerAddress::new("localhost", 27017),
        };
        assert!(is_rejection(&refused));
        assert!(is_rejection(&MongoError::Protocol(MISSING_NONCE.to_string())));
        assert!(!is_rejection(&MongoError::Connection("reset by peer".to_string())));
        assert!(!is_rejection(&MongoError::Timeout("slow".to_string())));
    }

    #[test]
    fn test_security_error_hides_password() {
        let authenticator = NativeAuthenticator::new(MongoCredential::mongodb_cr("alice", "admin", "hunter2"));
        let err = authenticator.security_error(
            "authentication failed",
            MongoError::Protocol("bad".to_string()),
        );
        let text = err.to_string();
        assert!(text.contains("alice"));
        assert!(text.contains("admin"));
        assert!(!text.contains("hunter2"));
    }
}
