//! Encoder/decoder capabilities for request and reply bodies.
//!
//! The core never interprets document contents itself; every protocol
//! operation is handed an [`Encoder`] for what it sends and a [`Decoder`] for
//! what it reads back.

use bson::Document;
use bytes::{BufMut, BytesMut};

use crate::error::Result;

/// Writes a value as a single wire document.
pub trait Encoder<T: ?Sized>: Send + Sync {
    /// Appends the encoded form of `value` to `dst`.
    fn encode(&self, value: &T, dst: &mut BytesMut) -> Result<()>;
}

/// Reads a value from the bytes of a single wire document.
pub trait Decoder<T>: Send + Sync {
    /// Decodes one document. `bytes` holds exactly one length-prefixed document.
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// Codec for plain [`Document`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DocumentCodec;

impl DocumentCodec {
    /// Creates a new document codec.
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Document> for DocumentCodec {
    fn encode(&self, value: &Document, dst: &mut BytesMut) -> Result<()> {
        let mut writer = dst.writer();
        value.to_writer(&mut writer)?;
        Ok(())
    }
}

impl Decoder<Document> for DocumentCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Document> {
        let mut reader = bytes;
        Ok(Document::from_reader(&mut reader)?)
    }
}

/// Encodes a document into a fresh buffer.
pub fn encode_document(encoder: &dyn Encoder<Document>, document: &Document) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    encoder.encode(document, &mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_document_codec_roundtrip() {
        let codec = DocumentCodec::new();
        let original = doc! { "getnonce": 1, "comment": "hello" };

        let mut buf = BytesMut::new();
        codec.encode(&original, &mut buf).unwrap();

        let declared = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(declared, buf.len());

        let decoded = codec.decode(&buf).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_truncated_document_fails() {
        let codec = DocumentCodec::new();
        let result = codec.decode(&[0x10, 0x00, 0x00]);
        assert!(matches!(result, Err(crate::MongoError::Serialization(_))));
    }
}
