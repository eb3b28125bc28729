//! Correlation-id-tagged message units flowing through the transport channel.
//!
//! Two envelope shapes cross the process boundary, both JSON:
//!
//! Inbound (web server → worker):
//!
//! ```json
//! {"id": "a1b2", "value": ["method_name", 1, "arg2"]}
//! ```
//!
//! Outbound (worker → web server):
//!
//! ```json
//! {"id": "a1b2", "value": {"result": 42, "node_addr": "worker-7"}}
//! ```
//!
//! The first element of the inbound `value` array is the endpoint name;
//! the remaining elements are positional arguments. A faulted or unknown
//! call produces `"result": null` — failure detail lives only in the
//! worker's log stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

/// Opaque token correlating one in-flight request with its response.
///
/// Ids must be unique among in-flight requests; the gateway generates them
/// as UUIDv4 strings, but any caller-provided token works as long as it is
/// not reused while a call is outstanding.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors raised while decoding an inbound envelope from its wire form.
#[derive(Debug, Error, Diagnostic)]
pub enum EnvelopeError {
    /// The `value` array was empty; there is no method to call.
    #[error("request {id}: empty value array, expected [method, args...]")]
    #[diagnostic(code(tickrelay::envelope::empty_call))]
    EmptyCall { id: String },

    /// The first `value` element must be the method name as a string.
    #[error("request {id}: method name must be a string, got {found}")]
    #[diagnostic(
        code(tickrelay::envelope::method_not_string),
        help("The wire schema is {{\"id\": token, \"value\": [method_name, arg1, ...]}}.")
    )]
    MethodNotString { id: String, found: String },
}

/// A remote call, consumed exactly once by the dispatch loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireRequest", into = "WireRequest")]
pub struct RequestEnvelope {
    pub id: CorrelationId,
    pub method: String,
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    #[must_use]
    pub fn new(id: impl Into<CorrelationId>, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }
}

/// Wire form of [`RequestEnvelope`]: method name folded into the value array.
#[derive(Serialize, Deserialize)]
struct WireRequest {
    id: String,
    value: Vec<Value>,
}

impl TryFrom<WireRequest> for RequestEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let mut value = wire.value.into_iter();
        let method = match value.next() {
            None => return Err(EnvelopeError::EmptyCall { id: wire.id }),
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(EnvelopeError::MethodNotString {
                    id: wire.id,
                    found: other.to_string(),
                });
            }
        };
        Ok(Self {
            id: CorrelationId(wire.id),
            method,
            args: value.collect(),
        })
    }
}

impl From<RequestEnvelope> for WireRequest {
    fn from(env: RequestEnvelope) -> Self {
        let mut value = Vec::with_capacity(env.args.len() + 1);
        value.push(Value::String(env.method));
        value.extend(env.args);
        Self {
            id: env.id.0,
            value,
        }
    }
}

/// The payload half of an outbound envelope.
///
/// `result` is `null` for faulted or unknown calls; `node_addr` is the
/// stable address of the answering worker and is present in every reply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplyBody {
    pub result: Value,
    pub node_addr: String,
}

/// A reply to exactly one prior request, produced by the dispatch loop
/// and consumed exactly once by the web-server process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub id: CorrelationId,
    pub value: ReplyBody,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn reply(id: CorrelationId, result: Value, node_addr: impl Into<String>) -> Self {
        Self {
            id,
            value: ReplyBody {
                result,
                node_addr: node_addr.into(),
            },
        }
    }

    /// Reply shape used for faults and unknown methods: a normally-shaped
    /// response carrying `null`.
    #[must_use]
    pub fn null_reply(id: CorrelationId, node_addr: impl Into<String>) -> Self {
        Self::reply(id, Value::Null, node_addr)
    }
}
