//! Bridge configuration and start-up.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ferry_proto::{Codec, JsonCodec};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::connection::Connection;
use crate::dispatch::{Actions, Dispatcher};
use crate::error::{Error, Result};
use crate::host::Record;
use crate::router::{self, Router};
use crate::transport::{Inbound, Transport};
use crate::value::{Local, Map};

/// Handle flavour minted for descriptors received from the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ProxyKind {
    /// One round trip per operation.
    #[default]
    Direct,
    /// Lazy member paths, one round trip when used.
    Chain,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Chain => "chain",
        })
    }
}

impl FromStr for ProxyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "chain" => Ok(Self::Chain),
            other => Err(Error::Config(format!(
                "unknown proxy kind `{other}` (expected `direct` or `chain`)"
            ))),
        }
    }
}

/// Serializable bridge options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Options {
    /// Handle flavour.
    pub proxy: ProxyKind,
    /// Log every frame payload at debug level.
    pub debug: bool,
}

impl Options {
    /// Parses options from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Connection lifecycle and traffic, published per connection.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Notification {
    /// The transport is up.
    Ready,
    /// The connection closed.
    Closed,
    /// The transport failed; pending requests were failed.
    TransportError(String),
    /// An action request arrived.
    Action {
        /// Wire verb.
        verb: String,
        /// Correlation id, if a reply is expected.
        correlation_id: Option<String>,
    },
    /// An event arrived.
    Event {
        /// Event name.
        name: String,
        /// Decoded payload.
        payload: Map,
    },
}

/// Builder for [`Bridge`].
#[must_use = "a BridgeBuilder does nothing until .build() or .start() is called"]
#[derive(Default)]
pub struct BridgeBuilder {
    /// Root namespace.
    context: Option<Local>,
    /// Serializable options.
    options: Options,
    /// Action executor.
    dispatcher: Option<Arc<dyn Dispatcher>>,
    /// Payload codec.
    codec: Option<Arc<dyn Codec>>,
    /// Transport for [`BridgeBuilder::start`].
    transport: Option<(Arc<dyn Transport>, Inbound)>,
}

impl BridgeBuilder {
    /// Sets the root namespace visible to peers.
    pub fn context(mut self, context: Record) -> Self {
        self.context = Some(Local::new(context));
        self
    }

    /// Shares an existing namespace, e.g. with code that keeps mutating it.
    pub fn shared_context(mut self, context: Arc<Record>) -> Self {
        self.context = Some(Local::shared(context));
        self
    }

    /// Sets the handle flavour.
    pub const fn proxy(mut self, kind: ProxyKind) -> Self {
        self.options.proxy = kind;
        self
    }

    /// Enables frame payload logging.
    pub const fn debug(mut self, on: bool) -> Self {
        self.options.debug = on;
        self
    }

    /// Replaces all serializable options.
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Replaces the action executor.
    pub fn dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.dispatcher = Some(Arc::new(dispatcher));
        self
    }

    /// Replaces the payload codec.
    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Sets the transport used by [`BridgeBuilder::start`].
    pub fn transport(mut self, transport: impl Transport, inbound: Inbound) -> Self {
        self.transport = Some((Arc::new(transport), inbound));
        self
    }

    /// Builds a transport-less bridge. A transport set on the builder is
    /// not used; see [`BridgeBuilder::start`].
    pub fn build(self) -> Bridge {
        Bridge {
            context: self.context.unwrap_or_else(|| Local::new(Record::new())),
            options: self.options,
            router: Router::new(self.dispatcher.unwrap_or_else(|| Arc::new(Actions))),
            codec: self.codec.unwrap_or_else(|| Arc::new(JsonCodec)),
        }
    }

    /// Builds the bridge and attaches the configured transport.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if no transport was set.
    pub fn start(mut self) -> Result<Connection> {
        let (transport, inbound) = self
            .transport
            .take()
            .ok_or_else(|| Error::Config("no transport configured".into()))?;
        Ok(self.build().attach_shared(transport, inbound))
    }
}

impl fmt::Debug for BridgeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeBuilder")
            .field("options", &self.options)
            .field("dispatcher", &self.dispatcher)
            .field("codec", &self.codec)
            .field("transport", &self.transport.as_ref().map(|(t, _)| t))
            .finish_non_exhaustive()
    }
}

/// A configured bridge: context, options, dispatcher and codec.
///
/// Each attached transport becomes one [`Connection`] with its own
/// Reference Table; all connections share the context.
#[derive(Debug, Clone)]
pub struct Bridge {
    /// Root namespace.
    context: Local,
    /// Serializable options.
    options: Options,
    /// Routes inbound messages.
    router: Router,
    /// Payload codec.
    codec: Arc<dyn Codec>,
}

impl Bridge {
    /// Starts a builder.
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Root namespace.
    pub const fn context(&self) -> &Local {
        &self.context
    }

    /// Options in effect.
    pub const fn options(&self) -> &Options {
        &self.options
    }

    /// Attaches a transport and spawns its driver. Must be called inside a
    /// Tokio runtime.
    pub fn attach(&self, transport: impl Transport, inbound: Inbound) -> Connection {
        self.attach_shared(Arc::new(transport), inbound)
    }

    /// [`Bridge::attach`] for an already shared transport.
    pub fn attach_shared(&self, transport: Arc<dyn Transport>, inbound: Inbound) -> Connection {
        let conn = Connection::new(
            transport,
            Arc::clone(&self.codec),
            self.options.proxy,
            self.context.clone(),
            self.options.debug,
        );
        info!(conn = conn.id(), proxy = %self.options.proxy, "connection attached");
        tokio::spawn(router::drive(conn.clone(), self.router.clone(), inbound));
        conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_from_json() {
        let o = Options::from_json(r#"{"proxy": "chain", "debug": true}"#).unwrap();
        assert_eq!(o.proxy, ProxyKind::Chain);
        assert!(o.debug);
        assert_eq!(Options::from_json("{}").unwrap(), Options::default());
        assert!(matches!(
            Options::from_json(r#"{"proxy": "magic"}"#),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn proxy_kind_parses() {
        assert_eq!("chain".parse::<ProxyKind>().unwrap(), ProxyKind::Chain);
        assert_eq!(ProxyKind::Direct.to_string(), "direct");
        assert!("other".parse::<ProxyKind>().is_err());
    }

    #[test]
    fn start_without_transport_is_a_config_error() {
        let err = Bridge::builder().start().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
