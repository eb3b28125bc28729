//! Channel configuration: address plus shared secret, no ambient globals.
//!
//! One [`ChannelConfig`] is constructed at worker startup and passed by
//! reference into both the dispatch loop and the externally-generated
//! server; the web-server process receives the same address and secret
//! out-of-band.

use std::fmt;

use rand::Rng;
use rand::distr::Alphanumeric;

/// Length of generated secrets, in alphanumeric characters.
const GENERATED_SECRET_LEN: usize = 32;

/// Shared secret fixed at channel creation.
///
/// Attachment to either queue requires presenting a matching secret;
/// comparisons go through [`matches`](Self::matches). The `Debug` form is
/// redacted so secrets do not leak through logs.
#[derive(Clone)]
pub struct ChannelSecret(String);

impl ChannelSecret {
    /// Generate a random alphanumeric secret.
    #[must_use]
    pub fn generate() -> Self {
        let secret: String = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SECRET_LEN)
            .map(char::from)
            .collect();
        Self(secret)
    }

    /// Compare against another secret without short-circuiting on the
    /// first differing byte.
    #[must_use]
    pub fn matches(&self, other: &ChannelSecret) -> bool {
        let a = self.0.as_bytes();
        let b = other.0.as_bytes();
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }

    /// Expose the secret for out-of-band delivery to the server process.
    #[must_use]
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ChannelSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelSecret(***)")
    }
}

impl From<String> for ChannelSecret {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelSecret {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Explicit configuration for one transport channel.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    addr: String,
    secret: ChannelSecret,
}

impl ChannelConfig {
    pub const DEFAULT_ADDR: &'static str = "local";

    #[must_use]
    pub fn new(addr: impl Into<String>, secret: ChannelSecret) -> Self {
        Self {
            addr: addr.into(),
            secret,
        }
    }

    /// Resolve configuration from the environment, generating a fresh
    /// secret when `TICKRELAY_SECRET` is absent.
    ///
    /// Explicit values set through the builders take precedence; the
    /// environment is only a fallback, loaded through `dotenvy` so a local
    /// `.env` file works during development.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let addr =
            std::env::var("TICKRELAY_ADDR").unwrap_or_else(|_| Self::DEFAULT_ADDR.to_string());
        let secret = std::env::var("TICKRELAY_SECRET")
            .map(ChannelSecret::from)
            .unwrap_or_else(|_| ChannelSecret::generate());
        Self { addr, secret }
    }

    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: ChannelSecret) -> Self {
        self.secret = secret;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn secret(&self) -> &ChannelSecret {
        &self.secret
    }
}
