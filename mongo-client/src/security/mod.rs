//! Credentials and connection authentication.

mod authenticator;
mod credential;

pub use authenticator::{AuthenticationState, Authenticator, NativeAuthenticator};
pub use credential::{AuthenticationMechanism, MongoCredential};
