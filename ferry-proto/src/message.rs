//! Protocol message types exchanged between bridge peers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A decoded JSON value as carried on the wire.
pub type Json = serde_json::Value;

/// A JSON object as carried on the wire.
pub type JsonMap = serde_json::Map<String, Json>;

/// One step of a call stack: a member name or an integer index.
///
/// Serialized untagged, so a stack reads naturally on the wire:
/// `["items", 0, "name"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StackKey {
    /// Integer index into an array-like value.
    Index(u64),
    /// Named member.
    Name(String),
}

impl StackKey {
    /// Builds a key from a member name, normalizing numeric-looking names
    /// (`"0"`, `"12"`) to [`StackKey::Index`].
    pub fn parse(name: &str) -> Self {
        let numeric = !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit());
        match name.parse::<u64>() {
            Ok(i) if numeric => Self::Index(i),
            _ => Self::Name(name.to_owned()),
        }
    }

    /// Returns the member name, if this key is not an index.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(n) => Some(n),
            Self::Index(_) => None,
        }
    }

    /// Returns the index, if this key is one.
    pub const fn as_index(&self) -> Option<u64> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(_) => None,
        }
    }
}

impl fmt::Display for StackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Name(n) => f.write_str(n),
        }
    }
}

impl From<&str> for StackKey {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<String> for StackKey {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<u64> for StackKey {
    fn from(i: u64) -> Self {
        Self::Index(i)
    }
}

/// Remote-operation verbs understood by the action dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Verb {
    /// Context lookup by name (`value` carries the name).
    Evaluate,
    /// Resolve the operand as an asynchronous value and return its result.
    AwaitProxy,
    /// Invoke the operand.
    CallProxy,
    /// Construct a new instance from the operand.
    CallProxyConstructor,
    /// String / inspect representation of the operand.
    GetProxyRepr,
    /// Indexed read.
    GetProxyIndex,
    /// Member read.
    GetProxyAttribute,
    /// Own member names of the operand.
    GetProxyAttributes,
    /// Indexed write.
    SetProxyIndex,
    /// Member write.
    SetProxyAttribute,
    /// Member existence check.
    HasProxyAttribute,
    /// Member deletion.
    DeleteProxyAttribute,
    /// The operand itself.
    GetPrimitive,
}

impl Verb {
    /// Every verb, in protocol order.
    pub const ALL: [Self; 13] = [
        Self::Evaluate,
        Self::AwaitProxy,
        Self::CallProxy,
        Self::CallProxyConstructor,
        Self::GetProxyRepr,
        Self::GetProxyIndex,
        Self::GetProxyAttribute,
        Self::GetProxyAttributes,
        Self::SetProxyIndex,
        Self::SetProxyAttribute,
        Self::HasProxyAttribute,
        Self::DeleteProxyAttribute,
        Self::GetPrimitive,
    ];

    /// Wire name of the verb.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evaluate => "evaluate",
            Self::AwaitProxy => "await_proxy",
            Self::CallProxy => "call_proxy",
            Self::CallProxyConstructor => "call_proxy_constructor",
            Self::GetProxyRepr => "get_proxy_repr",
            Self::GetProxyIndex => "get_proxy_index",
            Self::GetProxyAttribute => "get_proxy_attribute",
            Self::GetProxyAttributes => "get_proxy_attributes",
            Self::SetProxyIndex => "set_proxy_index",
            Self::SetProxyAttribute => "set_proxy_attribute",
            Self::HasProxyAttribute => "has_proxy_attribute",
            Self::DeleteProxyAttribute => "delete_proxy_attribute",
            Self::GetPrimitive => "get_primitive",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verb {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| Error::UnknownVerb(s.to_owned()))
    }
}

/// Returns `true` for `false`; used to omit default flags on the wire.
#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(b: &bool) -> bool {
    !*b
}

/// Operands of an action message.
///
/// `location` names a Reference Table entry on the receiving side. Without
/// it, the first `stack` element is looked up in the receiver's Context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct ActionRequest {
    /// Reference Table key of the operand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Member path walked from the operand.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<StackKey>>,
    /// Positional call arguments.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Json>,
    /// Keyword call arguments.
    #[serde(skip_serializing_if = "JsonMap::is_empty")]
    pub kwargs: JsonMap,
    /// Value to assign, or the name to evaluate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Json>,
    /// Member name used when no stack is supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<StackKey>,
    /// Caller asked for an isolated evaluation (`$name`).
    #[serde(skip_serializing_if = "is_false")]
    pub isolate: bool,
    /// Caller passes keyword arguments (`name$`).
    #[serde(skip_serializing_if = "is_false")]
    pub use_kwargs: bool,
    /// For `get_proxy_repr`: display form instead of inspect form.
    #[serde(skip_serializing_if = "is_false")]
    pub string: bool,
}

impl ActionRequest {
    /// An empty request targeting the Reference Table entry `location`.
    pub fn at(location: Option<String>) -> Self {
        Self {
            location,
            ..Self::default()
        }
    }

    /// Sets the call stack.
    #[must_use]
    pub fn with_stack(mut self, stack: Vec<StackKey>) -> Self {
        self.stack = Some(stack);
        self
    }

    /// Sets the member name used when no stack is present.
    #[must_use]
    pub fn with_target(mut self, target: StackKey) -> Self {
        self.target = Some(target);
        self
    }

    /// Sets positional and keyword arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<Json>, kwargs: JsonMap) -> Self {
        self.args = args;
        self.kwargs = kwargs;
        self
    }

    /// Sets the value operand.
    #[must_use]
    pub fn with_value(mut self, value: Json) -> Self {
        self.value = Some(value);
        self
    }
}

/// A protocol message.
///
/// Exactly one of `action`, `event` or a bare correlation id (a reply)
/// applies; see [`Message::kind`]. Action operands and event payloads are
/// carried inline next to the routing fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Message {
    /// Pairs a request with its single reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Verb of an action request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Name of a fire-and-forget event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Successful reply payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Json>,
    /// Failure text of a reply, or a protocol fault without correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Json>,
    /// Action operands or event payload.
    #[serde(flatten)]
    pub fields: JsonMap,
}

/// Routing classification of a [`Message`], in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageKind<'a> {
    /// Top-level error without correlation id: abort handling.
    Fault,
    /// Remote-operation request.
    Action {
        /// Reply correlation id; `None` means nobody waits for a reply.
        correlation_id: Option<&'a str>,
        /// Wire verb, possibly unknown to this side.
        verb: &'a str,
    },
    /// Fire-and-forget notification.
    Event {
        /// Event name.
        name: &'a str,
    },
    /// Reply to a request issued by this side.
    Reply {
        /// Correlation id of the original request.
        correlation_id: &'a str,
    },
    /// Nothing to route on.
    Unroutable,
}

impl Message {
    /// Builds an action request message.
    pub fn action(
        correlation_id: impl Into<String>,
        verb: Verb,
        request: &ActionRequest,
    ) -> Result<Self> {
        let Json::Object(fields) = serde_json::to_value(request)? else {
            return Err(Error::Invalid("action request must encode to an object"));
        };
        Ok(Self {
            correlation_id: Some(correlation_id.into()),
            action: Some(verb.as_str().to_owned()),
            fields,
            ..Self::default()
        })
    }

    /// Builds a fire-and-forget event.
    pub fn event(name: impl Into<String>, payload: JsonMap) -> Self {
        Self {
            event: Some(name.into()),
            fields: payload,
            ..Self::default()
        }
    }

    /// Builds a successful reply.
    pub fn reply(correlation_id: impl Into<String>, response: Json) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            response: Some(response),
            ..Self::default()
        }
    }

    /// Builds a failed reply carrying the error text.
    pub fn failure(correlation_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            error: Some(Json::String(error.into())),
            ..Self::default()
        }
    }

    /// Builds a protocol-level fault (no correlation id).
    pub fn fault(error: impl Into<String>) -> Self {
        Self {
            error: Some(Json::String(error.into())),
            ..Self::default()
        }
    }

    /// Classifies the message for routing.
    pub fn kind(&self) -> MessageKind<'_> {
        let id = self.correlation_id.as_deref();
        if self.error.is_some() && id.is_none() {
            return MessageKind::Fault;
        }
        if let Some(verb) = self.action.as_deref() {
            return MessageKind::Action {
                correlation_id: id,
                verb,
            };
        }
        if let Some(name) = self.event.as_deref() {
            return MessageKind::Event { name };
        }
        match id {
            Some(correlation_id) => MessageKind::Reply { correlation_id },
            None => MessageKind::Unroutable,
        }
    }

    /// Parses the inline action operands.
    pub fn request(&self) -> Result<ActionRequest> {
        Ok(serde_json::from_value(Json::Object(self.fields.clone()))?)
    }

    /// Error text, if any; non-string errors are rendered as JSON.
    pub fn error_text(&self) -> Option<String> {
        self.error.as_ref().map(|e| match e {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn numeric_names_become_indices() {
        assert_eq!(StackKey::parse("3"), StackKey::Index(3));
        assert_eq!(StackKey::parse("x3"), StackKey::Name("x3".into()));
        assert_eq!(StackKey::parse("-1"), StackKey::Name("-1".into()));
        assert_eq!(StackKey::parse(""), StackKey::Name(String::new()));
    }

    #[test]
    fn stack_reads_mixed_keys() {
        let stack: Vec<StackKey> = serde_json::from_value(json!(["items", 0, "name"])).unwrap();
        assert_eq!(
            stack,
            vec![
                StackKey::Name("items".into()),
                StackKey::Index(0),
                StackKey::Name("name".into()),
            ]
        );
    }

    #[test]
    fn verb_names_roundtrip() {
        for verb in Verb::ALL {
            assert_eq!(verb.as_str().parse::<Verb>().unwrap(), verb);
        }
        assert!("launch_missiles".parse::<Verb>().is_err());
    }

    #[test]
    fn action_fields_are_inline() {
        let req = ActionRequest::at(Some("L42".into()))
            .with_stack(vec!["x".into(), "y".into()])
            .with_args(vec![json!(1), json!(2)], JsonMap::new());
        let msg = Message::action("c1", Verb::CallProxy, &req).unwrap();
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            wire,
            json!({
                "correlationId": "c1",
                "action": "call_proxy",
                "location": "L42",
                "stack": ["x", "y"],
                "args": [1, 2],
            })
        );

        let back: Message = serde_json::from_value(wire).unwrap();
        assert_eq!(back.request().unwrap(), req);
    }

    #[test]
    fn classification_priority() {
        let fault: Message = serde_json::from_value(json!({"error": "bad"})).unwrap();
        assert_eq!(fault.kind(), MessageKind::Fault);

        let failed = Message::failure("c9", "boom");
        assert_eq!(
            failed.kind(),
            MessageKind::Reply {
                correlation_id: "c9"
            }
        );
        assert_eq!(failed.error_text().as_deref(), Some("boom"));

        let event = Message::event("tick", JsonMap::new());
        assert_eq!(event.kind(), MessageKind::Event { name: "tick" });

        let action: Message =
            serde_json::from_value(json!({"action": "evaluate", "value": "x"})).unwrap();
        assert_eq!(
            action.kind(),
            MessageKind::Action {
                correlation_id: None,
                verb: "evaluate"
            }
        );

        assert_eq!(Message::default().kind(), MessageKind::Unroutable);
    }

    #[test]
    fn null_response_is_still_a_reply() {
        let msg: Message =
            serde_json::from_value(json!({"correlationId": "c2", "response": null})).unwrap();
        assert_eq!(
            msg.kind(),
            MessageKind::Reply {
                correlation_id: "c2"
            }
        );
        assert!(msg.response.is_none());
    }

    #[test]
    fn structured_errors_render_as_json() {
        let msg: Message =
            serde_json::from_value(json!({"correlationId": "c3", "error": {"code": 7}})).unwrap();
        assert_eq!(msg.error_text().as_deref(), Some(r#"{"code":7}"#));
    }
}
