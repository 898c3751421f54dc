//! Codec framing requests and replies on a byte stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::constants::*;
use super::message::RequestMessage;
use super::reply::{ReplyHeader, ResponseBuffers};
use crate::error::{MongoError, Result};

/// Codec that encodes request messages and frames `OP_REPLY` messages.
///
/// Implements the `tokio_util::codec::{Encoder, Decoder}` traits for use
/// with tokio's framed I/O.
#[derive(Debug, Clone)]
pub struct WireCodec {
    max_message_size: usize,
}

impl WireCodec {
    /// Creates a new codec accepting replies up to [`MAX_MESSAGE_SIZE`].
    pub fn new() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Creates a codec with a custom maximum reply size.
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self { max_message_size }
    }
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder<(i32, RequestMessage)> for WireCodec {
    type Error = MongoError;

    fn encode(&mut self, (request_id, message): (i32, RequestMessage), dst: &mut BytesMut) -> Result<()> {
        message.encode(request_id, dst)
    }
}

impl Decoder for WireCodec {
    type Item = ResponseBuffers;
    type Error = MongoError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        if declared < REPLY_HEADER_SIZE as i32 {
            return Err(MongoError::Protocol(format!(
                "reply length {} is smaller than the reply header",
                declared
            )));
        }
        let length = declared as usize;
        if length > self.max_message_size {
            return Err(MongoError::Protocol(format!(
                "reply length {} exceeds maximum of {}",
                length, self.max_message_size
            )));
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        let header = ReplyHeader::read_from(&mut frame)?;
        Ok(Some(ResponseBuffers::new(header, frame.freeze())))
    }
}
