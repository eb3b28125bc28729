//! Web-server-side correlation: push a request, await the matching reply.
//!
//! The server process handles many HTTP connections concurrently, but the
//! transport exposes a single outbound queue. The gateway demultiplexes it:
//! a background pump drains outbound responses and completes the per-id
//! waiter registered by each caller. A response nobody is waiting for is
//! logged and dropped — replies are consumed at most once.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::envelope::{CorrelationId, ReplyBody, RequestEnvelope};
use crate::transport::{ChannelError, ServerSide};

type PendingMap = FxHashMap<CorrelationId, oneshot::Sender<ReplyBody>>;

/// Errors surfaced to callers awaiting a remote reply.
#[derive(Debug, Error, Diagnostic)]
pub enum GatewayError {
    #[error(transparent)]
    #[diagnostic(code(tickrelay::gateway::channel))]
    Channel(#[from] ChannelError),

    /// The transport closed before a reply for this call arrived.
    #[error("transport closed before the reply arrived")]
    #[diagnostic(code(tickrelay::gateway::disconnected))]
    Disconnected,

    /// Only produced by [`Gateway::call_with_timeout`].
    #[error("timed out waiting for a reply to {method}")]
    #[diagnostic(
        code(tickrelay::gateway::timeout),
        help("A continuation that never resolves keeps its caller waiting forever; use call_with_timeout to bound the wait.")
    )]
    Timeout { method: String },
}

/// Caller-facing handle the generated server routes requests through.
///
/// `call` blocks (asynchronously) until the worker answers. There is no
/// implicit timeout: a request whose continuation never resolves waits
/// until the channel is torn down. [`call_with_timeout`](Self::call_with_timeout)
/// is the bounded variant for deployments that want the hardening.
pub struct Gateway {
    server: ServerSide,
    pending: Arc<Mutex<PendingMap>>,
    pump: JoinHandle<()>,
}

impl Gateway {
    /// Attach to the server side of a channel and start the response pump.
    #[must_use]
    pub fn connect(server: ServerSide) -> Self {
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(FxHashMap::default()));
        let pump = tokio::spawn(Self::pump(server.clone(), Arc::clone(&pending)));
        Self {
            server,
            pending,
            pump,
        }
    }

    async fn pump(server: ServerSide, pending: Arc<Mutex<PendingMap>>) {
        loop {
            match server.pop_outbound().await {
                Ok(response) => {
                    let waiter = pending.lock().unwrap().remove(&response.id);
                    match waiter {
                        Some(tx) => {
                            // A dropped receiver means the caller gave up
                            // (e.g. its HTTP connection closed); nothing to do.
                            let _ = tx.send(response.value);
                        }
                        None => {
                            tracing::warn!(id = %response.id, "response with no waiting caller; dropping");
                        }
                    }
                }
                Err(ChannelError::Closed | ChannelError::BadSecret) => break,
            }
        }
        // Wake every remaining caller with a disconnect instead of leaving
        // them parked forever.
        pending.lock().unwrap().clear();
    }

    /// Invoke `method` on the worker with positional `args` and wait for
    /// the correlated reply.
    pub async fn call(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<ReplyBody, GatewayError> {
        let id = CorrelationId::generate();
        let rx = self.submit(id.clone(), method.into(), args)?;
        rx.await.map_err(|_| GatewayError::Disconnected)
    }

    /// Bounded variant of [`call`](Self::call): gives up after `timeout`
    /// and unregisters the waiter, so a late reply is dropped by the pump.
    pub async fn call_with_timeout(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<ReplyBody, GatewayError> {
        let method = method.into();
        let id = CorrelationId::generate();
        let rx = self.submit(id.clone(), method.clone(), args)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(reply) => reply.map_err(|_| GatewayError::Disconnected),
            Err(_) => {
                self.pending.lock().unwrap().remove(&id);
                Err(GatewayError::Timeout { method })
            }
        }
    }

    fn submit(
        &self,
        id: CorrelationId,
        method: String,
        args: Vec<Value>,
    ) -> Result<oneshot::Receiver<ReplyBody>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.clone(), tx);
        if let Err(error) = self
            .server
            .push_inbound(RequestEnvelope::new(id.clone(), method, args))
        {
            self.pending.lock().unwrap().remove(&id);
            return Err(error.into());
        }
        Ok(rx)
    }

    /// Calls currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
