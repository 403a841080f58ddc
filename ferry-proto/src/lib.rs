//! Wire protocol for ferry remote-object bridges.
//!
//! Messages are JSON documents framed with an ASCII `Content-Length` header,
//! suitable for any ordered byte transport (TCP, Unix socket, WebSocket,
//! in-process channel):
//!
//! ```text
//! Content-Length: 54\r\n\r\n{"correlationId":"c1","action":"evaluate","value":"x"}
//! ```
//!
//! [`frame`] produces one such frame; [`Framer`] reassembles an arbitrary
//! sequence of deliveries (partial, merged, byte-by-byte) back into
//! [`Message`]s.

mod codec;
mod descriptor;
mod error;
mod framing;
mod message;

pub use codec::{Codec, JsonCodec, frame};
pub use descriptor::{ObjType, PROXY_TAG, ProxyDescriptor};
pub use error::{Error, Result};
pub use framing::{Framer, HEADER, MAX_FRAME, SEPARATOR};
pub use message::{ActionRequest, Json, JsonMap, Message, MessageKind, StackKey, Verb};
