//! Outbound (driven) ports of the gateway.
//!
//! Everything the gateway needs from the outside world: the HTTP transport,
//! a token store, the account directory and provisioner, an alert channel
//! and a clock.

use crate::domain::account::AccountInfo;
use crate::domain::error::Fault;
use crate::domain::principal::Principal;
use crate::domain::token::SessionToken;
use crate::envelope::{WireRequest, WireResponse};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Failure to complete an HTTP exchange.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the server
    #[error("cannot connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    /// The transport gave up waiting
    #[error("request timed out")]
    Timeout,
    /// Connection broke or the body could not be read
    #[error("http exchange failed: {0}")]
    Io(String),
}

impl From<TransportError> for Fault {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout => Fault::local(
                crate::domain::error::codes::TIMEOUT,
                "Request to mailbox server timed out",
            ),
            other => Fault::transport(other.to_string()),
        }
    }
}

/// Sends an encoded envelope and returns the raw response.
///
/// Implementations return `Ok` for every HTTP response, whatever its status;
/// only failures to complete the exchange are errors.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn post(&self, request: WireRequest) -> Result<WireResponse, TransportError>;
}

/// Token store backend failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("token store unavailable: {0}")]
    Unavailable(String),
    #[error("cannot decode stored token: {0}")]
    Codec(String),
}

/// Key/value storage for session tokens, in-process or shared.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<SessionToken>, StoreError>;

    /// Store `token` under `key`; the entry may be dropped after `ttl`.
    async fn put(&self, key: &str, token: SessionToken, ttl: Duration) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Looks up a mailbox account on the server.
///
/// Returns an `account.NO_SUCH_ACCOUNT` fault when the account does not exist.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn lookup(&self, address: &str) -> Result<AccountInfo, Fault>;
}

/// Creates the remote mailbox account of a user who has none yet.
#[async_trait]
pub trait AccountProvisioner: Send + Sync {
    async fn provision(&self, principal: &Principal) -> anyhow::Result<()>;
}

/// Circuit state change worth telling an operator about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitTransition {
    Opened,
    Closed,
}

/// Notification emitted by the circuit breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitAlert {
    pub target: String,
    pub transition: CircuitTransition,
    /// Failures counted when the circuit opened, 0 on close
    pub failures: u32,
}

impl fmt::Display for CircuitAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.transition {
            CircuitTransition::Opened => write!(
                f,
                "Mailbox circuit breaker {} opened after {} failures",
                self.target, self.failures
            ),
            CircuitTransition::Closed => write!(f, "Closing {} circuit breaker", self.target),
        }
    }
}

/// Receives circuit transitions. Must not block.
pub trait AlertSink: Send + Sync {
    fn notify(&self, alert: CircuitAlert);
}

/// Time source for token validity checks.
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now_ms: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
