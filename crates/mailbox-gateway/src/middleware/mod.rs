//! Cross-cutting concerns wrapped around every call.

pub mod circuit_breaker;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState, CircuitStats};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
