//! Postponed requests: deferred computations retried across worker ticks.
//!
//! A handler that cannot answer within one tick returns
//! [`Outcome::Suspend`] carrying a [`Continuation`] — a solver plus its
//! bound keyword arguments. The dispatch loop stores it and retries it,
//! untouched, on a later tick. A solver may resolve to a final value or to
//! another continuation (chaining is unbounded by default).

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::endpoint::HandlerError;
use crate::envelope::CorrelationId;

/// Result of invoking a handler or solver: either the call is done, or it
/// suspends itself for a later tick. Dispatch switches on this tag — there
/// is no type-sniffing of returned values.
pub enum Outcome {
    /// The computation finished; the value is wrapped into a reply.
    Final(Value),
    /// The computation postponed itself; retry the continuation later.
    Suspend(Continuation),
}

impl fmt::Debug for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Final(v) => f.debug_tuple("Final").field(v).finish(),
            Self::Suspend(c) => f.debug_tuple("Suspend").field(c).finish(),
        }
    }
}

/// A deferred computation. Receives only its bound keyword arguments — no
/// injected context — and returns a final value or another continuation.
#[async_trait]
pub trait Solver: Send + Sync {
    async fn solve(&self, kwargs: &Map<String, Value>) -> Result<Outcome, HandlerError>;
}

/// A solver bound to its keyword arguments, ready to retry on a later tick.
///
/// There is no cancellation primitive: once stored, a continuation is
/// retried every tick until it resolves or the worker is torn down. Retries
/// are unlimited by default; [`with_max_attempts`](Self::with_max_attempts)
/// caps the number of solver invocations the logical request may consume,
/// after which the dispatch loop converts the pending request into a fault.
#[derive(Clone)]
pub struct Continuation {
    solver: Arc<dyn Solver>,
    kwargs: Map<String, Value>,
    max_attempts: Option<NonZeroU32>,
}

impl Continuation {
    #[must_use]
    pub fn new(solver: impl Solver + 'static) -> Self {
        Self {
            solver: Arc::new(solver),
            kwargs: Map::new(),
            max_attempts: None,
        }
    }

    /// Reuse an already-shared solver, e.g. when a solver re-suspends itself.
    #[must_use]
    pub fn from_shared(solver: Arc<dyn Solver>) -> Self {
        Self {
            solver,
            kwargs: Map::new(),
            max_attempts: None,
        }
    }

    /// Bind the keyword arguments passed to every retry.
    #[must_use]
    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Bind a single keyword argument.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Cap the total solver invocations for the logical request. Unlimited
    /// when unset.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: NonZeroU32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn kwargs(&self) -> &Map<String, Value> {
        &self.kwargs
    }

    pub fn max_attempts(&self) -> Option<NonZeroU32> {
        self.max_attempts
    }

    /// Invoke the solver with the bound arguments.
    pub async fn solve(&self) -> Result<Outcome, HandlerError> {
        self.solver.solve(&self.kwargs).await
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("kwargs", &self.kwargs)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

/// One suspended request awaiting retry: the continuation plus the identity
/// of the call it will eventually answer.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub(crate) id: CorrelationId,
    pub(crate) endpoint: String,
    pub(crate) continuation: Continuation,
    /// Solver invocations already spent on this logical request.
    pub(crate) attempts: u32,
}

impl PendingRequest {
    pub(crate) fn new(id: CorrelationId, endpoint: impl Into<String>, continuation: Continuation) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            continuation,
            attempts: 0,
        }
    }

    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// FIFO store of in-flight postponed requests between ticks.
///
/// Exclusively owned by the dispatch loop: the loop snapshots and clears the
/// store at the start of each tick, so re-suspended entries are not retried
/// twice within one tick and new arrivals are never blocked behind them.
#[derive(Debug, Default)]
pub struct ContinuationStore {
    entries: Vec<PendingRequest>,
}

impl ContinuationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, pending: PendingRequest) {
        self.entries.push(pending);
    }

    /// Snapshot and clear: hand the current entries to the caller in FIFO
    /// order, leaving the store empty for re-additions.
    pub fn drain(&mut self) -> Vec<PendingRequest> {
        std::mem::take(&mut self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Fixed(Value);

    #[async_trait]
    impl Solver for Fixed {
        async fn solve(&self, _kwargs: &Map<String, Value>) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Final(self.0.clone()))
        }
    }

    struct EchoKwargs;

    #[async_trait]
    impl Solver for EchoKwargs {
        async fn solve(&self, kwargs: &Map<String, Value>) -> Result<Outcome, HandlerError> {
            Ok(Outcome::Final(Value::Object(kwargs.clone())))
        }
    }

    #[tokio::test]
    async fn solver_receives_bound_kwargs() {
        let c = Continuation::new(EchoKwargs).with_kwarg("job", json!("j-9"));
        match c.solve().await.unwrap() {
            Outcome::Final(v) => assert_eq!(v, json!({"job": "j-9"})),
            Outcome::Suspend(_) => panic!("expected final value"),
        }
    }

    #[test]
    fn drain_is_fifo_and_clears() {
        let mut store = ContinuationStore::new();
        for name in ["first", "second", "third"] {
            store.push(PendingRequest::new(
                name.into(),
                name,
                Continuation::new(Fixed(Value::Null)),
            ));
        }
        let drained = store.drain();
        assert!(store.is_empty());
        let order: Vec<&str> = drained.iter().map(|p| p.endpoint()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn max_attempts_defaults_to_unlimited() {
        let c = Continuation::new(Fixed(Value::Null));
        assert!(c.max_attempts().is_none());
    }
}
