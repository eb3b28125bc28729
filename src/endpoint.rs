//! Endpoint declarations and the handler trait remote calls dispatch into.
//!
//! An endpoint is a worker operation explicitly exposed for remote
//! invocation: a unique name, an HTTP verb, an ordered parameter list, a
//! docstring, and the [`Handler`] that runs when a request names it.
//! Declarations are built once at worker startup by capability modules each
//! contributing a fixed list — there is no runtime scanning, so a malformed
//! declaration fails construction instead of surfacing mid-dispatch.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::continuation::Outcome;

/// HTTP verb an endpoint is reachable through.
///
/// The verb is metadata for the externally-generated server; the dispatch
/// loop itself treats all calls alike.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "get"),
            Self::Post => write!(f, "post"),
            Self::Put => write!(f, "put"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Core trait for operations exposed as remote-callable endpoints.
///
/// Handlers receive the request envelope's positional arguments and nothing
/// else — no injected context, no access to the transport. A handler either
/// finishes immediately with [`Outcome::Final`] or postpones itself with
/// [`Outcome::Suspend`], handing the dispatch loop a
/// [`Continuation`](crate::continuation::Continuation) to retry on a later
/// tick.
///
/// # Errors
///
/// A returned error is a *dispatch fault*: the loop logs it with full
/// context and answers the caller with a normally-shaped null reply. Faults
/// never crash the loop. Reserve `Err` for genuine failures; a legitimate
/// "no data" answer should be `Final(Value::Null)` so it is not logged as a
/// fault.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use serde_json::{json, Value};
/// use tickrelay::continuation::Outcome;
/// use tickrelay::endpoint::{Handler, HandlerError};
///
/// struct Add;
///
/// #[async_trait]
/// impl Handler for Add {
///     async fn call(&self, args: Vec<Value>) -> Result<Outcome, HandlerError> {
///         let a = args.first().and_then(Value::as_i64).ok_or(HandlerError::MissingArg { what: "a" })?;
///         let b = args.get(1).and_then(Value::as_i64).ok_or(HandlerError::MissingArg { what: "b" })?;
///         Ok(Outcome::Final(json!(a + b)))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Invoke the operation with the envelope's positional arguments.
    async fn call(&self, args: Vec<Value>) -> Result<Outcome, HandlerError>;
}

/// Errors returned by endpoint handlers and continuation solvers.
#[derive(Debug, Error, Diagnostic)]
pub enum HandlerError {
    /// A required positional or keyword argument was absent.
    #[error("missing required argument: {what}")]
    #[diagnostic(
        code(tickrelay::endpoint::missing_arg),
        help("Check the caller against the endpoint's declared parameter list.")
    )]
    MissingArg { what: &'static str },

    /// An argument was present but had the wrong shape.
    #[error("argument {index} has the wrong type, expected {expected}")]
    #[diagnostic(code(tickrelay::endpoint::invalid_arg))]
    InvalidArg { index: usize, expected: &'static str },

    /// JSON (de)serialization failed inside the handler.
    #[error(transparent)]
    #[diagnostic(code(tickrelay::endpoint::serde_json))]
    Serde(#[from] serde_json::Error),

    /// The operation itself failed.
    #[error("handler failed: {0}")]
    #[diagnostic(code(tickrelay::endpoint::failed))]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// One registered endpoint: name, verb, parameter signature, docstring, and
/// the handler behind it. Immutable once registered.
#[derive(Clone)]
pub struct EndpointDecl {
    name: String,
    verb: Verb,
    params: Vec<String>,
    doc: String,
    handler: Arc<dyn Handler>,
}

impl EndpointDecl {
    /// Declare an endpoint with an empty parameter list and docstring.
    #[must_use]
    pub fn new(name: impl Into<String>, verb: Verb, handler: impl Handler + 'static) -> Self {
        Self {
            name: name.into(),
            verb,
            params: Vec::new(),
            doc: String::new(),
            handler: Arc::new(handler),
        }
    }

    /// Set the ordered parameter names shown to the generated server.
    #[must_use]
    pub fn with_params<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    /// Attach the docstring surfaced in generated route documentation.
    #[must_use]
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Serializable description for external route/template generation.
    #[must_use]
    pub fn route_spec(&self) -> RouteSpec {
        RouteSpec {
            name: self.name.clone(),
            method: self.verb,
            params: self.params.clone(),
            doc: self.doc.clone(),
        }
    }
}

impl fmt::Debug for EndpointDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDecl")
            .field("name", &self.name)
            .field("verb", &self.verb)
            .field("params", &self.params)
            .field("doc", &self.doc)
            .finish_non_exhaustive()
    }
}

/// Wire-friendly description of one endpoint, in registration order the
/// analogue of the template arguments the original server generator consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    pub method: Verb,
    pub params: Vec<String>,
    pub doc: String,
}
