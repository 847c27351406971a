//! Adapters implementing the outbound ports.

pub mod alert;
pub mod http_transport;
pub mod provisioner;
pub mod token_store;

pub use alert::{FanoutAlertSink, LogAlertSink, SlackAlertSink};
pub use http_transport::ReqwestTransport;
pub use provisioner::UnconfiguredProvisioner;
pub use token_store::{purge_task, InMemoryTokenStore};
