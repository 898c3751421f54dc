//! Core types and protocols for the mongo client.

#![warn(missing_docs)]

pub mod address;
pub mod codec;
pub mod error;
pub mod protocol;

pub use address::{MongoNamespace, ServerAddress, ServerCursor, DEFAULT_PORT};
pub use codec::{Decoder, DocumentCodec, Encoder};
pub use error::{BoxError, MongoError, Result};
