//! Transparent remote-object bridge over any byte transport.
//!
//! Two peers, each running a [`Bridge`], exchange length-prefixed messages
//! over a [`Transport`]. Plain data is copied; host objects such as
//! functions, classes and sets are sent by reference and appear on the
//! other side as [`Proxy`] handles whose operations become requests.
//!
//! # Quick start
//!
//! ```no_run
//! use ferry::transport::channel;
//! use ferry::{Args, Bridge, Function, Record, RemoteObject, Value};
//!
//! # async fn demo() -> ferry::Result<()> {
//! let ((a, a_in), (b, b_in)) = channel::pair();
//!
//! let add = Function::sync("add", |args| {
//!     let sum = args.get(0).as_i64().unwrap_or(0) + args.get(1).as_i64().unwrap_or(0);
//!     Ok(Value::from(sum))
//! });
//! let _host = Bridge::builder()
//!     .context(Record::new().with("add", Value::local(add)))
//!     .build()
//!     .attach(a, a_in);
//!
//! let client = Bridge::builder().build().attach(b, b_in);
//! let Value::Remote(add) = client.evaluate("add").await? else {
//!     unreachable!()
//! };
//! let sum = add.call(Args::from(vec![Value::from(2), Value::from(3)])).await?;
//! assert_eq!(sum.as_i64(), Some(5));
//! # Ok(())
//! # }
//! ```

mod bridge;
mod connection;
mod dispatch;
mod error;
pub mod host;
mod marshal;
mod pending;
pub mod proxy;
mod router;
mod table;
pub mod transport;
mod value;

pub use bridge::{Bridge, BridgeBuilder, Notification, Options, ProxyKind};
pub use connection::Connection;
pub use dispatch::{Actions, Dispatcher, Outcome, Request, Scope};
pub use error::{Error, Result};
pub use ferry_proto::{Codec, Json, JsonCodec, ObjType, ProxyDescriptor, StackKey, Verb};
pub use host::{Args, Function, HostObject, Record};
pub use proxy::{ChainHandle, DirectHandle, Proxy, RemoteObject};
pub use table::ReferenceTable;
pub use transport::{Inbound, Transport, TransportEvent};
pub use value::{Local, Map, Value};

#[cfg(test)]
pub(crate) mod testing {
    //! Test doubles.

    use std::io;
    use std::sync::{Mutex, PoisonError};

    use bytes::Bytes;
    use ferry_proto::{Framer, JsonCodec, Message};

    use crate::transport::Transport;

    /// Transport that records outbound frames instead of sending them.
    #[derive(Debug, Default)]
    pub(crate) struct Recorder {
        /// Frames in send order.
        frames: Mutex<Vec<Bytes>>,
    }

    impl Recorder {
        /// Decodes everything sent so far.
        pub(crate) fn messages(&self) -> Vec<Message> {
            let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
            let mut framer = Framer::new(JsonCodec);
            frames.iter().flat_map(|f| framer.push(f)).collect()
        }
    }

    impl Transport for Recorder {
        fn send(&self, frame: Bytes) -> io::Result<()> {
            self.frames
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(frame);
            Ok(())
        }
    }
}
