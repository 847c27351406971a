//! Domain types for the mailbox gateway.
//!
//! Configuration, faults, principals and tokens, plus the pure fault
//! classifier. Nothing in here performs I/O.

pub mod account;
pub mod call_id;
pub mod classifier;
pub mod config;
pub mod error;
pub mod principal;
pub mod token;

pub use account::AccountInfo;
pub use call_id::CallId;
pub use classifier::{classify, resolve_account_check, Classification, RecoveryAction};
pub use config::{ConfigError, GatewayConfig, Secret};
pub use error::{codes, Fault, FaultCategory, FaultOrigin, GatewayError, GatewayResult};
pub use principal::{Principal, PrincipalKind};
pub use token::SessionToken;
