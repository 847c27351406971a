//! Ports (hexagonal architecture boundaries).

pub mod inbound;
pub mod outbound;

pub use inbound::MailboxApi;
pub use outbound::{
    AccountDirectory, AccountProvisioner, AlertSink, CircuitAlert, CircuitTransition,
    ManualTimeSource, SoapTransport, StoreError, SystemTimeSource, TimeSource, TokenStore,
    TransportError,
};
