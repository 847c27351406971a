//! Fault and error types.
//!
//! A [`Fault`] is what callers of the gateway see: either the structured
//! error the mailbox server put in a response body, or a locally produced
//! one (transport failure, open circuit, unreadable response). Codes keep the
//! server's dotted `namespace.NAME` form so the two kinds share one space.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes understood by the gateway.
pub mod codes {
    // Codes emitted by the mailbox server
    pub const AUTH_REQUIRED: &str = "service.AUTH_REQUIRED";
    pub const AUTH_EXPIRED: &str = "service.AUTH_EXPIRED";
    pub const PERM_DENIED: &str = "service.PERM_DENIED";
    pub const SERVICE_FAILURE: &str = "service.FAILURE";
    pub const TEMPORARILY_UNAVAILABLE: &str = "service.TEMPORARILY_UNAVAILABLE";
    pub const RESOURCE_UNREACHABLE: &str = "service.RESOURCE_UNREACHABLE";
    pub const PROXY_ERROR: &str = "service.PROXY_ERROR";
    pub const AUTH_FAILED: &str = "account.AUTH_FAILED";
    pub const NO_SUCH_ACCOUNT: &str = "account.NO_SUCH_ACCOUNT";
    pub const ACCOUNT_INACTIVE: &str = "account.ACCOUNT_INACTIVE";
    pub const MAINTENANCE_MODE: &str = "account.MAINTENANCE_MODE";
    pub const MAIL_MAINTENANCE: &str = "mail.MAINTENANCE";
    pub const MAIL_TRY_AGAIN: &str = "mail.TRY_AGAIN";
    pub const NO_SUCH_MBOX: &str = "mail.NO_SUCH_MBOX";

    // Codes produced locally by the gateway
    pub const CIRCUIT_OPEN: &str = "gateway.CIRCUIT_OPEN";
    pub const TRANSPORT_ERROR: &str = "gateway.TRANSPORT_ERROR";
    pub const TIMEOUT: &str = "gateway.TIMEOUT";
    pub const MALFORMED_RESPONSE: &str = "gateway.MALFORMED_RESPONSE";
    pub const AUTH_RESPONSE_INVALID: &str = "gateway.AUTH_RESPONSE_INVALID";
    pub const PREAUTH_FAILED: &str = "gateway.PREAUTH_FAILED";
    pub const ACCOUNT_NOT_ACTIVE: &str = "gateway.ACCOUNT_INACTIVE";
    pub const ACCOUNT_REJECTED: &str = "gateway.ACCOUNT_REJECTED";
    pub const PROVISIONING_FAILED: &str = "gateway.PROVISIONING_FAILED";
    pub const INTERNAL: &str = "gateway.INTERNAL";
}

/// Where a fault was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultOrigin {
    /// Reported by the mailbox server inside a response envelope.
    Remote,
    /// Synthesized by the gateway itself.
    Local,
}

/// Coarse grouping of fault codes for upstream services that map faults to
/// user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultCategory {
    Unauthorized,
    NotFound,
    Unavailable,
    Unknown,
}

/// Structured fault returned by every gateway operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    /// Dotted error code, e.g. `service.AUTH_EXPIRED`
    pub code: String,
    /// Human readable reason
    pub message: String,
    /// Remote or locally produced
    pub origin: FaultOrigin,
}

impl Fault {
    /// Fault reported by the server.
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            origin: FaultOrigin::Remote,
        }
    }

    /// Fault produced by the gateway.
    pub fn local(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            origin: FaultOrigin::Local,
        }
    }

    pub fn circuit_open(target: &str) -> Self {
        Self::local(
            codes::CIRCUIT_OPEN,
            format!("Circuit breaker open for {}", target),
        )
    }

    pub fn transport(details: impl Into<String>) -> Self {
        Self::local(
            codes::TRANSPORT_ERROR,
            format!("Transport error: {}", details.into()),
        )
    }

    pub fn timeout(after_ms: u128) -> Self {
        Self::local(
            codes::TIMEOUT,
            format!("No response from mailbox server after {}ms", after_ms),
        )
    }

    pub fn malformed(status: u16, details: impl Into<String>) -> Self {
        Self::local(
            codes::MALFORMED_RESPONSE,
            format!("Malformed response (HTTP {}): {}", status, details.into()),
        )
    }

    pub fn account_inactive(address: &str, status: &str) -> Self {
        Self::local(
            codes::ACCOUNT_NOT_ACTIVE,
            format!("Account {} not active : {}", address, status),
        )
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::local(
            codes::INTERNAL,
            format!("Internal error: {}", details.into()),
        )
    }

    /// True for faults the server reported.
    pub fn is_remote(&self) -> bool {
        self.origin == FaultOrigin::Remote
    }

    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// Group this fault into a [`FaultCategory`].
    pub fn category(&self) -> FaultCategory {
        match self.code.as_str() {
            codes::AUTH_REQUIRED
            | codes::AUTH_EXPIRED
            | codes::AUTH_FAILED
            | codes::PERM_DENIED
            | codes::ACCOUNT_INACTIVE
            | codes::ACCOUNT_NOT_ACTIVE
            | codes::ACCOUNT_REJECTED
            | codes::PREAUTH_FAILED => FaultCategory::Unauthorized,
            codes::TEMPORARILY_UNAVAILABLE
            | codes::RESOURCE_UNREACHABLE
            | codes::PROXY_ERROR
            | codes::MAINTENANCE_MODE
            | codes::MAIL_MAINTENANCE
            | codes::MAIL_TRY_AGAIN
            | codes::CIRCUIT_OPEN
            | codes::TRANSPORT_ERROR
            | codes::TIMEOUT
            | codes::MALFORMED_RESPONSE => FaultCategory::Unavailable,
            code if code.contains(".NO_SUCH_") => FaultCategory::NotFound,
            _ => FaultCategory::Unknown,
        }
    }

    /// Whether this outcome means the backend itself is unhealthy.
    ///
    /// Only these count as circuit breaker failures; any other fault shows
    /// the server answered and is treated as a healthy round-trip.
    pub fn indicates_backend_failure(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::TRANSPORT_ERROR
                | codes::TIMEOUT
                | codes::MALFORMED_RESPONSE
                | codes::TEMPORARILY_UNAVAILABLE
                | codes::RESOURCE_UNREACHABLE
                | codes::MAIL_MAINTENANCE
        )
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for Fault {}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, Fault>;

/// Errors raised while assembling a gateway (not per-call faults).
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration rejected by validation
    #[error("configuration error: {0}")]
    Config(#[from] crate::domain::config::ConfigError),

    /// A required collaborator was not supplied to the builder
    #[error("missing component: {0}")]
    MissingComponent(&'static str),

    /// HTTP client could not be constructed
    #[error("transport setup failed: {0}")]
    Transport(String),
}
