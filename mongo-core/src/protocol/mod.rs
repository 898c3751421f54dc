//! Legacy wire protocol implementation.
//!
//! This module provides the request messages, reply framing and raw reply
//! buffers used to talk to a server over the `OP_QUERY` / `OP_REPLY` protocol.

mod codec;
pub mod constants;
mod message;
mod reply;

pub use codec::WireCodec;
pub use constants::*;
pub use message::{next_request_id, GetMoreMessage, KillCursorsMessage, QueryMessage, RequestMessage};
pub use reply::{ReplyHeader, ReplyMessage, ResponseBuffers};
