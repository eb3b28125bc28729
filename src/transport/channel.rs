//! Manager-owned FIFO queue pair with secret-gated role handles.
//!
//! The channel owns two independent queues: inbound (web server → worker)
//! and outbound (worker → web server). FIFO holds within each queue; there
//! is no ordering guarantee across the two. The queues are internally
//! synchronized, so neither process needs additional locking.

use miette::Diagnostic;
use thiserror::Error;
use tokio::sync::watch;

use crate::envelope::{RequestEnvelope, ResponseEnvelope};
use crate::transport::config::{ChannelConfig, ChannelSecret};

/// Errors raised by transport channel operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ChannelError {
    /// The channel was shut down; every subsequent operation fails.
    #[error("transport channel is closed")]
    #[diagnostic(code(tickrelay::transport::closed))]
    Closed,

    /// The presented secret does not match the one fixed at creation.
    #[error("shared secret mismatch")]
    #[diagnostic(
        code(tickrelay::transport::bad_secret),
        help("Both processes must present the secret fixed when the channel was created.")
    )]
    BadSecret,
}

/// The manager half: owns both queues and hands out role handles.
///
/// Only holders of the shared secret can attach. Dropping the manager does
/// not close the queues by itself — [`shutdown`](Self::shutdown) is the
/// teardown path, after which every operation on every handle fails with
/// [`ChannelError::Closed`].
pub struct TransportChannel {
    config: ChannelConfig,
    inbound_tx: flume::Sender<RequestEnvelope>,
    inbound_rx: flume::Receiver<RequestEnvelope>,
    outbound_tx: flume::Sender<ResponseEnvelope>,
    outbound_rx: flume::Receiver<ResponseEnvelope>,
    closed_tx: watch::Sender<bool>,
}

impl TransportChannel {
    /// Create the queue pair described by `config`.
    #[must_use]
    pub fn open(config: ChannelConfig) -> Self {
        let (inbound_tx, inbound_rx) = flume::unbounded();
        let (outbound_tx, outbound_rx) = flume::unbounded();
        let (closed_tx, _) = watch::channel(false);
        Self {
            config,
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
            closed_tx,
        }
    }

    /// Attach the worker role: sole reader of inbound, sole writer of
    /// outbound.
    pub fn worker_side(&self, secret: &ChannelSecret) -> Result<WorkerSide, ChannelError> {
        self.authorize(secret)?;
        Ok(WorkerSide {
            inbound_rx: self.inbound_rx.clone(),
            outbound_tx: self.outbound_tx.clone(),
            closed: self.closed_tx.subscribe(),
        })
    }

    /// Attach the server role: sole writer of inbound, sole reader of
    /// outbound.
    pub fn server_side(&self, secret: &ChannelSecret) -> Result<ServerSide, ChannelError> {
        self.authorize(secret)?;
        Ok(ServerSide {
            inbound_tx: self.inbound_tx.clone(),
            outbound_rx: self.outbound_rx.clone(),
            closed: self.closed_tx.subscribe(),
        })
    }

    fn authorize(&self, secret: &ChannelSecret) -> Result<(), ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if !self.config.secret().matches(secret) {
            return Err(ChannelError::BadSecret);
        }
        Ok(())
    }

    /// Close both queues. Idempotent; wakes any handle blocked on a pop.
    pub fn shutdown(&self) {
        self.closed_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn addr(&self) -> &str {
        self.config.addr()
    }

    /// Queued inbound requests not yet consumed by the worker.
    pub fn inbound_len(&self) -> usize {
        self.inbound_rx.len()
    }

    /// Queued outbound responses not yet consumed by the server.
    pub fn outbound_len(&self) -> usize {
        self.outbound_rx.len()
    }
}

/// Worker-process handle. Not `Clone`: the dispatch loop is the only
/// consumer of inbound and the only producer of outbound.
pub struct WorkerSide {
    inbound_rx: flume::Receiver<RequestEnvelope>,
    outbound_tx: flume::Sender<ResponseEnvelope>,
    closed: watch::Receiver<bool>,
}

impl WorkerSide {
    /// Non-blocking poll of the inbound queue. The worker never blocks on
    /// an empty queue, so a tick completes quickly regardless of state.
    pub fn poll_inbound(&self) -> Result<Option<RequestEnvelope>, ChannelError> {
        if *self.closed.borrow() {
            return Err(ChannelError::Closed);
        }
        match self.inbound_rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    /// Push one response onto the outbound queue.
    pub fn push_outbound(&self, response: ResponseEnvelope) -> Result<(), ChannelError> {
        if *self.closed.borrow() {
            return Err(ChannelError::Closed);
        }
        self.outbound_tx
            .send(response)
            .map_err(|_| ChannelError::Closed)
    }

    pub fn inbound_is_empty(&self) -> bool {
        self.inbound_rx.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Server-process handle. `Clone` so concurrent HTTP handlers within the
/// server process can share it; across processes the server remains the
/// sole writer of inbound and sole reader of outbound.
#[derive(Clone)]
pub struct ServerSide {
    inbound_tx: flume::Sender<RequestEnvelope>,
    outbound_rx: flume::Receiver<ResponseEnvelope>,
    closed: watch::Receiver<bool>,
}

impl ServerSide {
    /// Push one request onto the inbound queue.
    pub fn push_inbound(&self, request: RequestEnvelope) -> Result<(), ChannelError> {
        if *self.closed.borrow() {
            return Err(ChannelError::Closed);
        }
        self.inbound_tx
            .send(request)
            .map_err(|_| ChannelError::Closed)
    }

    /// Block until a response arrives or the channel closes.
    pub async fn pop_outbound(&self) -> Result<ResponseEnvelope, ChannelError> {
        // Clone before the check: a shutdown landing between the check and
        // the select bumps the watch version and wakes `changed()`.
        let mut closed = self.closed.clone();
        if *closed.borrow() {
            return Err(ChannelError::Closed);
        }
        tokio::select! {
            _ = closed.changed() => Err(ChannelError::Closed),
            received = self.outbound_rx.recv_async() => {
                received.map_err(|_| ChannelError::Closed)
            }
        }
    }

    /// Non-blocking poll of the outbound queue.
    pub fn poll_outbound(&self) -> Result<Option<ResponseEnvelope>, ChannelError> {
        if *self.closed.borrow() {
            return Err(ChannelError::Closed);
        }
        match self.outbound_rx.try_recv() {
            Ok(envelope) => Ok(Some(envelope)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    pub fn outbound_is_empty(&self) -> bool {
        self.outbound_rx.is_empty()
    }

    /// Whether the worker has drained everything this side pushed.
    pub fn inbound_is_empty(&self) -> bool {
        self.inbound_tx.is_empty()
    }
}
