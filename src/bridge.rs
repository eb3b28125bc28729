//! Worker-plugin lifecycle: build the registry, open the channel, tick, tear down.
//!
//! The surrounding worker framework owns the loop cadence; this module owns
//! everything in between. [`BridgeBuilder`] collects capability declaration
//! lists and the channel configuration, verifies them at construction time,
//! and produces a [`Bridge`] whose [`tick`](Bridge::tick) is invoked once
//! per worker cycle and whose [`shutdown`](Bridge::shutdown) closes the
//! transport at teardown.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::dispatch::{DispatchLoop, TickReport};
use crate::endpoint::{EndpointDecl, RouteSpec};
use crate::registry::{EndpointRegistry, RegistryError};
use crate::transport::{
    ChannelConfig, ChannelError, ChannelSecret, ServerSide, TransportChannel,
};

/// Errors fatal to worker startup.
#[derive(Debug, Error, Diagnostic)]
pub enum BridgeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(code(tickrelay::bridge::channel))]
    Channel(#[from] ChannelError),

    /// The worker address is framework-provided and has no default.
    #[error("no worker address configured")]
    #[diagnostic(
        code(tickrelay::bridge::missing_node_addr),
        help("Pass the worker's stable address via BridgeBuilder::with_node_addr.")
    )]
    MissingNodeAddr,
}

/// Builder collecting capabilities and configuration before the worker
/// starts ticking.
#[derive(Default)]
pub struct BridgeBuilder {
    decls: Vec<EndpointDecl>,
    config: Option<ChannelConfig>,
    node_addr: Option<String>,
}

impl BridgeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one endpoint declaration.
    #[must_use]
    pub fn add_endpoint(mut self, decl: EndpointDecl) -> Self {
        self.decls.push(decl);
        self
    }

    /// Add a capability module's fixed declaration list.
    #[must_use]
    pub fn with_capability(mut self, decls: impl IntoIterator<Item = EndpointDecl>) -> Self {
        self.decls.extend(decls);
        self
    }

    /// Use an explicit channel configuration instead of resolving one from
    /// the environment.
    #[must_use]
    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// The stable worker address included in every response.
    #[must_use]
    pub fn with_node_addr(mut self, node_addr: impl Into<String>) -> Self {
        self.node_addr = Some(node_addr.into());
        self
    }

    /// Verify the declarations, open the transport channel, and assemble
    /// the dispatch loop. Any registration problem is fatal here, before
    /// the worker starts ticking.
    pub fn build(self) -> Result<Bridge, BridgeError> {
        let node_addr = self.node_addr.ok_or(BridgeError::MissingNodeAddr)?;

        let mut registry = EndpointRegistry::new();
        registry.register_all(self.decls)?;
        let registry = Arc::new(registry);

        let config = self.config.unwrap_or_else(ChannelConfig::from_env);
        let channel = TransportChannel::open(config);
        let worker = channel.worker_side(channel.config().secret())?;

        tracing::info!(
            addr = %channel.addr(),
            node_addr = %node_addr,
            endpoints = registry.len(),
            "transport channel open"
        );

        let dispatch = DispatchLoop::new(Arc::clone(&registry), worker, node_addr);
        Ok(Bridge {
            channel,
            dispatch,
            registry,
        })
    }
}

/// A running worker bridge: registry, transport manager, and dispatch loop.
pub struct Bridge {
    channel: TransportChannel,
    dispatch: DispatchLoop,
    registry: Arc<EndpointRegistry>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("node_addr", &self.dispatch.node_addr())
            .field("pending", &self.dispatch.pending())
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// The per-tick invocation hook. Drive this once per worker cycle.
    pub async fn tick(&mut self) -> Result<TickReport, ChannelError> {
        self.dispatch.tick().await
    }

    /// Attach the server role of the transport for the web-server process.
    pub fn server_side(&self, secret: &ChannelSecret) -> Result<ServerSide, ChannelError> {
        self.channel.server_side(secret)
    }

    /// Serializable route descriptions for external server generation.
    #[must_use]
    pub fn route_specs(&self) -> Vec<RouteSpec> {
        self.registry.route_specs()
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.registry
    }

    pub fn channel(&self) -> &TransportChannel {
        &self.channel
    }

    pub fn config(&self) -> &ChannelConfig {
        self.channel.config()
    }

    pub fn node_addr(&self) -> &str {
        self.dispatch.node_addr()
    }

    /// Suspended requests awaiting a later tick.
    pub fn pending(&self) -> usize {
        self.dispatch.pending()
    }

    /// Teardown hook: close both transport queues. Unresolved
    /// continuations will never produce a response afterwards.
    pub fn shutdown(&self) {
        tracing::info!(addr = %self.channel.addr(), "shutting down transport channel");
        self.channel.shutdown();
    }
}
