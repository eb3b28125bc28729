//! Tick-driven dispatch loop: drains continuations, then inbound requests.
//!
//! The loop is cooperative and non-preemptive — one [`tick`](DispatchLoop::tick)
//! per worker cycle, no step blocking indefinitely. Each tick runs two
//! independent passes:
//!
//! 1. **Drain continuations**: snapshot and clear the store, retry every
//!    suspended request. Finished requests are answered; re-suspended ones
//!    go back for a later tick.
//! 2. **Drain inbound**: consume queued request envelopes in arrival order,
//!    resolve each method through the registry, and invoke it.
//!
//! Because the passes are independent, long chains of continuations never
//! starve newly arrived requests within the same tick.
//!
//! Handler and solver failures are dispatch faults: logged with full
//! context, recorded on the [`TickReport`], and answered externally with a
//! normally-shaped null reply. Faults never crash the loop. There is no
//! terminal state; the loop runs until the worker tears the transport down,
//! at which point every queue operation fails with [`ChannelError::Closed`]
//! and unresolved continuations never produce a response.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::instrument;

use crate::continuation::{Continuation, ContinuationStore, Outcome, PendingRequest};
use crate::envelope::{CorrelationId, RequestEnvelope, ResponseEnvelope};
use crate::registry::EndpointRegistry;
use crate::transport::{ChannelError, WorkerSide};

/// How one invocation resolved, after the fault boundary has been applied.
///
/// The wire protocol collapses `Faulted` into a null reply; the distinction
/// only exists internally, where logs and tick reports can observe it.
#[derive(Debug)]
pub enum Resolution {
    Final(Value),
    Suspend(Continuation),
    Faulted,
}

/// Structured record of one dispatch fault, kept on the tick report.
#[derive(Clone, Debug, Serialize)]
pub struct FaultEvent {
    pub when: DateTime<Utc>,
    pub id: CorrelationId,
    pub endpoint: String,
    pub cause: String,
}

/// Result of executing one tick.
#[derive(Clone, Debug, Default)]
pub struct TickReport {
    pub tick: u64,
    /// Inbound request envelopes consumed this tick.
    pub handled: usize,
    /// Responses pushed to the outbound queue this tick.
    pub responded: usize,
    /// Requests newly postponed by their endpoint handler.
    pub suspended: usize,
    /// Continuations re-queued for a later tick.
    pub retried: usize,
    /// Faults swallowed by the dispatch boundary this tick.
    pub faults: Vec<FaultEvent>,
}

impl TickReport {
    fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }
}

/// The worker-side engine: resolves methods through the registry, invokes
/// handlers and solvers, and emits correlated responses.
///
/// Owned by a single worker task; the continuation store and registry are
/// touched only from here, so no internal locking is needed.
pub struct DispatchLoop {
    registry: Arc<EndpointRegistry>,
    worker: WorkerSide,
    store: ContinuationStore,
    node_addr: String,
    tick: u64,
}

impl DispatchLoop {
    #[must_use]
    pub fn new(
        registry: Arc<EndpointRegistry>,
        worker: WorkerSide,
        node_addr: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            worker,
            store: ContinuationStore::new(),
            node_addr: node_addr.into(),
            tick: 0,
        }
    }

    /// Suspended requests currently awaiting a later tick.
    pub fn pending(&self) -> usize {
        self.store.len()
    }

    /// Ticks executed so far.
    pub fn ticks(&self) -> u64 {
        self.tick
    }

    pub fn node_addr(&self) -> &str {
        &self.node_addr
    }

    /// Run one tick: continuation pass, then inbound pass.
    ///
    /// Returns [`ChannelError::Closed`] once the transport is shut down;
    /// that error is fatal to the loop and the caller should stop ticking.
    #[instrument(skip(self), fields(tick = self.tick + 1), err)]
    pub async fn tick(&mut self) -> Result<TickReport, ChannelError> {
        // Once the transport is down, leftover continuations must never be
        // retried or answered.
        if self.worker.is_closed() {
            return Err(ChannelError::Closed);
        }
        self.tick += 1;
        let mut report = TickReport::new(self.tick);

        self.drain_continuations(&mut report).await?;
        self.drain_inbound(&mut report).await?;

        tracing::debug!(
            tick = report.tick,
            handled = report.handled,
            responded = report.responded,
            retried = report.retried,
            faults = report.faults.len(),
            "tick complete"
        );
        Ok(report)
    }

    async fn drain_continuations(&mut self, report: &mut TickReport) -> Result<(), ChannelError> {
        let pending = self.store.drain();
        for mut entry in pending {
            entry.attempts += 1;
            let resolution = match entry.continuation.solve().await {
                Ok(Outcome::Final(value)) => Resolution::Final(value),
                Ok(Outcome::Suspend(next)) => Resolution::Suspend(next),
                Err(error) => {
                    self.record_fault(
                        report,
                        &entry.id,
                        &entry.endpoint,
                        &Value::Object(entry.continuation.kwargs().clone()),
                        &error,
                    );
                    Resolution::Faulted
                }
            };
            match resolution {
                Resolution::Final(value) => {
                    self.respond(report, entry.id, value)?;
                }
                Resolution::Suspend(next) => {
                    if next
                        .max_attempts()
                        .is_some_and(|max| entry.attempts >= max.get())
                    {
                        self.record_fault(
                            report,
                            &entry.id,
                            &entry.endpoint,
                            &Value::Object(next.kwargs().clone()),
                            &format!("retry budget exhausted after {} attempts", entry.attempts),
                        );
                        self.respond(report, entry.id, Value::Null)?;
                    } else {
                        report.retried += 1;
                        self.store.push(PendingRequest {
                            id: entry.id,
                            endpoint: entry.endpoint,
                            continuation: next,
                            attempts: entry.attempts,
                        });
                    }
                }
                Resolution::Faulted => {
                    self.respond(report, entry.id, Value::Null)?;
                }
            }
        }
        Ok(())
    }

    async fn drain_inbound(&mut self, report: &mut TickReport) -> Result<(), ChannelError> {
        while let Some(request) = self.worker.poll_inbound()? {
            report.handled += 1;
            let RequestEnvelope { id, method, args } = request;

            let handler = self
                .registry
                .resolve(&method)
                .map(|decl| Arc::clone(decl.handler()));
            let Some(handler) = handler else {
                self.record_fault(
                    report,
                    &id,
                    &method,
                    &Value::Array(args),
                    &"unknown method",
                );
                self.respond(report, id, Value::Null)?;
                continue;
            };

            match handler.call(args.clone()).await {
                Ok(Outcome::Final(value)) => {
                    self.respond(report, id, value)?;
                }
                Ok(Outcome::Suspend(continuation)) => {
                    tracing::debug!(id = %id, endpoint = %method, "request postponed");
                    report.suspended += 1;
                    self.store.push(PendingRequest::new(id, method, continuation));
                }
                Err(error) => {
                    self.record_fault(report, &id, &method, &Value::Array(args), &error);
                    self.respond(report, id, Value::Null)?;
                }
            }
        }
        Ok(())
    }

    fn respond(
        &self,
        report: &mut TickReport,
        id: CorrelationId,
        result: Value,
    ) -> Result<(), ChannelError> {
        self.worker
            .push_outbound(ResponseEnvelope::reply(id, result, self.node_addr.as_str()))?;
        report.responded += 1;
        Ok(())
    }

    /// Fault boundary: log the failure with full context and record it on
    /// the report. The caller still answers with a null reply.
    fn record_fault(
        &self,
        report: &mut TickReport,
        id: &CorrelationId,
        endpoint: &str,
        args: &Value,
        cause: &dyn fmt::Display,
    ) {
        let cause = cause.to_string();
        tracing::error!(
            id = %id,
            endpoint = %endpoint,
            args = %args,
            cause = %cause,
            "dispatch fault; replying null"
        );
        report.faults.push(FaultEvent {
            when: Utc::now(),
            id: id.clone(),
            endpoint: endpoint.to_string(),
            cause,
        });
    }
}
