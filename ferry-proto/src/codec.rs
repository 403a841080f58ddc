//! Payload codec and frame encoding.
//!
//! Each frame is: `Content-Length: <N>\r\n\r\n<payload>`, where the payload
//! is the codec output trimmed of surrounding whitespace and `N` is its
//! length in bytes.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::framing::{HEADER, SEPARATOR};
use crate::message::Message;

/// Encodes and decodes message payloads.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Serializes a message to payload bytes.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>>;

    /// Parses payload bytes back into a message.
    fn decode(&self, payload: &[u8]) -> Result<Message>;
}

/// JSON codec backed by `serde_json`; 64-bit integers round-trip exactly.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(msg)?)
    }

    fn decode(&self, payload: &[u8]) -> Result<Message> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl<C: Codec + ?Sized> Codec for Arc<C> {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>> {
        (**self).encode(msg)
    }

    fn decode(&self, payload: &[u8]) -> Result<Message> {
        (**self).decode(payload)
    }
}

/// Encodes `msg` as one length-prefixed frame.
pub fn frame(codec: &dyn Codec, msg: &Message) -> Result<Vec<u8>> {
    let payload = codec.encode(msg)?;
    let payload = payload.trim_ascii();
    let len = payload.len().to_string();

    let mut out = Vec::with_capacity(HEADER.len() + 1 + len.len() + SEPARATOR.len() + payload.len());
    out.extend_from_slice(HEADER);
    out.push(b' ');
    out.extend_from_slice(len.as_bytes());
    out.extend_from_slice(SEPARATOR);
    out.extend_from_slice(payload);
    Ok(out)
}
