//! Dual-queue transport linking the worker and web-server processes.
//!
//! The module is organised around a manager-owned [`TransportChannel`] and
//! the secret-gated role handles ([`WorkerSide`], [`ServerSide`]) the two
//! processes operate through; [`ChannelConfig`] carries the address and
//! shared secret communicated out-of-band at worker startup.

pub mod channel;
pub mod config;

pub use channel::{ChannelError, ServerSide, TransportChannel, WorkerSide};
pub use config::{ChannelConfig, ChannelSecret};
