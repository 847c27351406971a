//! Mailbox Gateway - authenticated RPC access to a mailbox SOAP server.
//!
//! Obtains and caches per-principal session tokens, recovers once from
//! expired tokens and missing accounts, and isolates callers from a failing
//! server with a circuit breaker.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          MAILBOX GATEWAY                            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │   call_as_user      call_as_admin      get_valid_token              │
//! │         └────────────────┬─────────────────┘                        │
//! │                  ┌───────┴────────┐                                 │
//! │                  │ CircuitBreaker │  one permit per logical call    │
//! │                  └───────┬────────┘                                 │
//! │                ┌─────────┴──────────┐                               │
//! │                │ RecoveryCoordinator│  classify, recover, resend ≤1 │
//! │                └─────────┬──────────┘                               │
//! │          ┌───────────────┼────────────────┐                         │
//! │   ┌──────┴─────┐  ┌──────┴───────┐  ┌─────┴──────┐                  │
//! │   │ TokenCache │  │ Authenticate │  │ Dispatcher │  encode/timeout  │
//! │   └──────┬─────┘  └──────────────┘  └─────┬──────┘  /decode         │
//! └──────────┼────────────────────────────────┼─────────────────────────┘
//!            ▼                                ▼
//!       TokenStore                      SoapTransport
//!   (in-process / shared)           (pooled reqwest client)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use mailbox_gateway::{GatewayConfig, MailboxGateway};
//!
//! let config = GatewayConfig::load(Path::new("gateway.json"))?;
//! let gateway = MailboxGateway::new(config)?;
//!
//! let user = gateway.user("jdoe");
//! let content = mailbox_gateway::envelope::to_content(&json!({ "_jsns": "urn:zimbraMail" }))?;
//! let folders = gateway.call_as_user(&user, "GetFolderRequest", content).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod auth;
pub mod cache;
pub mod dispatch;
pub mod domain;
pub mod envelope;
pub mod middleware;
pub mod ports;
pub mod recovery;
pub mod service;

// Re-exports for public API
pub use auth::{AuthError, AuthenticationManager};
pub use cache::TokenCache;
pub use domain::config::GatewayConfig;
pub use domain::error::{codes, Fault, FaultCategory, GatewayError, GatewayResult};
pub use domain::principal::{Principal, PrincipalKind};
pub use domain::token::SessionToken;
pub use envelope::{Endpoint, ResponsePayload};
pub use middleware::{CircuitBreaker, CircuitState, GatewayMetrics};
pub use ports::{AccountDirectory, AccountProvisioner, AlertSink, MailboxApi, SoapTransport, TokenStore};
pub use recovery::{AttemptRunner, RecoveryCoordinator};
pub use service::{MailboxGateway, MailboxGatewayBuilder};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
