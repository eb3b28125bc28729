//! # Tickrelay: Tick-driven Remote-Call Bridge
//!
//! Tickrelay routes HTTP-triggered requests arriving at a separately-running
//! web-server process into the business logic of a long-running worker
//! process. Multi-step computations resolve asynchronously across
//! independent worker ticks without blocking either the HTTP handler or the
//! worker's main loop.
//!
//! ## Core Concepts
//!
//! - **Endpoints**: Worker operations explicitly declared as remote-callable,
//!   each with a name, HTTP verb, parameter signature, and docstring
//! - **Transport Channel**: A manager-owned pair of FIFO queues (inbound,
//!   outbound) reachable only with a shared secret
//! - **Envelopes**: Correlation-id-tagged request/response framing
//! - **Continuations**: Postponed requests retried each tick until they
//!   yield a final value
//! - **Dispatch Loop**: Cooperative, tick-driven draining of continuations
//!   and inbound requests
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use tickrelay::bridge::BridgeBuilder;
//! use tickrelay::continuation::Outcome;
//! use tickrelay::endpoint::{EndpointDecl, Handler, HandlerError, Verb};
//! use tickrelay::gateway::Gateway;
//! use tickrelay::transport::{ChannelConfig, ChannelSecret};
//!
//! struct Status;
//!
//! #[async_trait]
//! impl Handler for Status {
//!     async fn call(&self, _args: Vec<Value>) -> Result<Outcome, HandlerError> {
//!         Ok(Outcome::Final(json!({"healthy": true})))
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let secret = ChannelSecret::generate();
//! let mut bridge = BridgeBuilder::new()
//!     .with_node_addr("worker-1")
//!     .with_channel_config(ChannelConfig::new("local", secret.clone()))
//!     .add_endpoint(
//!         EndpointDecl::new("get_status", Verb::Get, Status).with_doc("Report worker health."),
//!     )
//!     .build()?;
//!
//! // Web-server side: push calls, await correlated replies.
//! let gateway = Gateway::connect(bridge.server_side(&secret)?);
//!
//! // Worker side: one tick per cycle of the surrounding worker loop.
//! tokio::spawn(async move {
//!     loop {
//!         if bridge.tick().await.is_err() {
//!             break;
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!     }
//! });
//!
//! let reply = gateway.call("get_status", vec![]).await?;
//! assert_eq!(reply.result, json!({"healthy": true}));
//! # Ok(())
//! # }
//! ```
//!
//! ## Postponing Work
//!
//! A handler that cannot answer within one tick returns
//! [`Outcome::Suspend`](continuation::Outcome) carrying a
//! [`Continuation`](continuation::Continuation): a solver bound to its
//! keyword arguments, retried untouched on later ticks until it resolves.
//! The caller keeps waiting on the same correlation id; nothing else in the
//! tick is blocked.
//!
//! ## Fault Behavior
//!
//! A handler error or unknown method never crashes the loop: the fault is
//! logged with method, arguments, and cause, recorded on the
//! [`TickReport`](dispatch::TickReport), and answered externally with a
//! normally-shaped reply whose `result` is `null`.
//!
//! ## Module Guide
//!
//! - [`envelope`] - Correlation ids and wire framing
//! - [`endpoint`] - Handler trait and endpoint declarations
//! - [`registry`] - Capability registry with construction-time verification
//! - [`transport`] - Secret-gated dual-queue channel
//! - [`continuation`] - Postponed requests and the continuation store
//! - [`dispatch`] - The tick-driven dispatch loop
//! - [`gateway`] - Web-server-side call/response correlation
//! - [`bridge`] - Worker lifecycle: build, tick, tear down

pub mod bridge;
pub mod continuation;
pub mod dispatch;
pub mod endpoint;
pub mod envelope;
pub mod gateway;
pub mod registry;
pub mod transport;
