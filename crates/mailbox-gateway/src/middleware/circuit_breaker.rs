//! Circuit breaker for the mailbox server endpoints.
//!
//! One circuit per backend target (`soap`, `soap-admin`). A whole logical
//! call, recovery cycle included, runs under a single [`CircuitPermit`] and
//! reports one outcome.
//!
//! ```text
//!                 failures >= threshold
//!                 within failure_window
//!      ┌──────────┐ ─────────────────► ┌──────────┐
//!      │  CLOSED  │                    │   OPEN   │ ◄─────┐
//!      │ (normal) │                    │ (reject) │       │ probe fails
//!      └──────────┘                    └──────────┘       │
//!            ▲                               │ open_timeout
//!            │ success_threshold             ▼ elapsed    │
//!            │ probes succeed          ┌──────────┐       │
//!            └──────────────────────── │HALF-OPEN │ ──────┘
//!                                      │ 1 probe  │
//!                                      └──────────┘
//! ```
//!
//! Opening and closing are reported to the configured [`AlertSink`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::config::CircuitBreakerConfig;
use crate::domain::error::Fault;
use crate::ports::outbound::{AlertSink, CircuitAlert, CircuitTransition};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, calls pass through
    Closed,
    /// Calls are rejected without touching the transport
    Open,
    /// One trial call is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct TargetCircuit {
    state: CircuitState,
    /// Failures counted in the current window
    failure_count: u32,
    /// First failure of the current window
    window_started: Option<Instant>,
    half_open_successes: u32,
    probe_in_flight: bool,
    opened_at: Option<Instant>,
    last_transition: Instant,
    total_calls: u64,
    total_failures: u64,
    total_rejections: u64,
}

impl TargetCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            window_started: None,
            half_open_successes: 0,
            probe_in_flight: false,
            opened_at: None,
            last_transition: Instant::now(),
            total_calls: 0,
            total_failures: 0,
            total_rejections: 0,
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition = Instant::now();
    }

    fn open(&mut self) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(Instant::now());
        self.probe_in_flight = false;
        self.half_open_successes = 0;
    }

    fn close(&mut self) {
        self.transition(CircuitState::Closed);
        self.failure_count = 0;
        self.window_started = None;
        self.half_open_successes = 0;
        self.probe_in_flight = false;
        self.opened_at = None;
    }
}

/// Circuit breaker shared by all calls of a gateway.
pub struct CircuitBreaker {
    circuits: RwLock<HashMap<String, TargetCircuit>>,
    config: CircuitBreakerConfig,
    alerts: Arc<dyn AlertSink>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig, alerts: Arc<dyn AlertSink>) -> Self {
        Self {
            circuits: RwLock::new(HashMap::new()),
            config,
            alerts,
        }
    }

    /// Ask to run one call against `target`.
    ///
    /// Fails with a `gateway.CIRCUIT_OPEN` fault while the circuit is open,
    /// or while it is half-open and the trial call is already in flight.
    pub fn acquire(self: &Arc<Self>, target: &str) -> Result<CircuitPermit, Fault> {
        if !self.config.enabled {
            return Ok(CircuitPermit::untracked(Arc::clone(self), target));
        }

        let mut circuits = self.circuits.write();
        let circuit = circuits
            .entry(target.to_string())
            .or_insert_with(TargetCircuit::new);

        let probe = match circuit.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = circuit
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.config.open_timeout);
                if elapsed >= self.config.open_timeout {
                    info!(circuit = target, "Circuit breaker transitioning to half-open");
                    circuit.transition(CircuitState::HalfOpen);
                    circuit.half_open_successes = 0;
                    circuit.probe_in_flight = true;
                    true
                } else {
                    circuit.total_rejections += 1;
                    debug!(
                        circuit = target,
                        remaining_ms = (self.config.open_timeout - elapsed).as_millis() as u64,
                        "Circuit breaker is open, rejecting call"
                    );
                    return Err(Fault::circuit_open(target));
                }
            }
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    circuit.total_rejections += 1;
                    debug!(circuit = target, "Trial call in flight, rejecting call");
                    return Err(Fault::circuit_open(target));
                }
                circuit.probe_in_flight = true;
                true
            }
        };

        circuit.total_calls += 1;
        Ok(CircuitPermit {
            breaker: Arc::clone(self),
            target: target.to_string(),
            probe,
            tracked: true,
            settled: false,
        })
    }

    fn record_success(&self, target: &str, probe: bool) {
        let alert = {
            let mut circuits = self.circuits.write();
            let Some(circuit) = circuits.get_mut(target) else {
                return;
            };
            match circuit.state {
                CircuitState::Closed => {
                    circuit.failure_count = 0;
                    circuit.window_started = None;
                    None
                }
                CircuitState::HalfOpen if probe => {
                    circuit.probe_in_flight = false;
                    circuit.half_open_successes += 1;
                    if circuit.half_open_successes >= self.config.success_threshold {
                        info!(
                            circuit = target,
                            successes = circuit.half_open_successes,
                            "Circuit breaker closing after successful trial"
                        );
                        circuit.close();
                        Some(CircuitAlert {
                            target: target.to_string(),
                            transition: CircuitTransition::Closed,
                            failures: 0,
                        })
                    } else {
                        None
                    }
                }
                // Late completion of a call admitted before the circuit opened
                _ => None,
            }
        };

        if let Some(alert) = alert {
            self.alerts.notify(alert);
        }
    }

    fn record_failure(&self, target: &str, probe: bool) {
        let alert = {
            let mut circuits = self.circuits.write();
            let Some(circuit) = circuits.get_mut(target) else {
                return;
            };
            circuit.total_failures += 1;

            match circuit.state {
                CircuitState::Closed => {
                    let window_expired = circuit
                        .window_started
                        .map(|at| at.elapsed() > self.config.failure_window)
                        .unwrap_or(true);
                    if window_expired {
                        circuit.window_started = Some(Instant::now());
                        circuit.failure_count = 0;
                    }
                    circuit.failure_count += 1;

                    if circuit.failure_count >= self.config.failure_threshold {
                        warn!(
                            circuit = target,
                            failures = circuit.failure_count,
                            threshold = self.config.failure_threshold,
                            timeout_secs = self.config.open_timeout.as_secs(),
                            "Circuit breaker opening due to failures"
                        );
                        let failures = circuit.failure_count;
                        circuit.open();
                        Some(CircuitAlert {
                            target: target.to_string(),
                            transition: CircuitTransition::Opened,
                            failures,
                        })
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen if probe => {
                    warn!(circuit = target, "Circuit breaker reopening after failed trial");
                    circuit.open();
                    Some(CircuitAlert {
                        target: target.to_string(),
                        transition: CircuitTransition::Opened,
                        failures: 1,
                    })
                }
                _ => None,
            }
        };

        if let Some(alert) = alert {
            self.alerts.notify(alert);
        }
    }

    fn release_probe(&self, target: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(target) {
            if circuit.state == CircuitState::HalfOpen {
                debug!(circuit = target, "Trial call abandoned, releasing slot");
                circuit.probe_in_flight = false;
            }
        }
    }

    /// Current state of a target's circuit
    pub fn state(&self, target: &str) -> CircuitState {
        self.circuits
            .read()
            .get(target)
            .map(|c| c.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Statistics for all circuits seen so far
    pub fn stats(&self) -> Vec<CircuitStats> {
        let circuits = self.circuits.read();
        let mut stats: Vec<CircuitStats> = circuits
            .iter()
            .map(|(target, circuit)| CircuitStats {
                target: target.clone(),
                state: circuit.state,
                failure_count: circuit.failure_count,
                total_calls: circuit.total_calls,
                total_failures: circuit.total_failures,
                total_rejections: circuit.total_rejections,
                time_in_state_ms: circuit.last_transition.elapsed().as_millis() as u64,
            })
            .collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }

    /// Force a target's circuit closed (operator action)
    pub fn reset(&self, target: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(target) {
            info!(circuit = target, "Circuit breaker manually reset");
            circuit.close();
        }
    }
}

/// Admission for one call. Report the outcome with [`succeed`](Self::succeed)
/// or [`fail`](Self::fail); dropping it unreported frees a trial slot without
/// counting anything.
pub struct CircuitPermit {
    breaker: Arc<CircuitBreaker>,
    target: String,
    probe: bool,
    tracked: bool,
    settled: bool,
}

impl CircuitPermit {
    fn untracked(breaker: Arc<CircuitBreaker>, target: &str) -> Self {
        Self {
            breaker,
            target: target.to_string(),
            probe: false,
            tracked: false,
            settled: true,
        }
    }

    /// Whether this is the half-open trial call
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        if self.tracked {
            self.breaker.record_success(&self.target, self.probe);
        }
    }

    pub fn fail(mut self) {
        self.settled = true;
        if self.tracked {
            self.breaker.record_failure(&self.target, self.probe);
        }
    }

    /// Report a call outcome: backend failures count against the circuit,
    /// anything else (including protocol faults) counts as a success.
    pub fn settle<T>(self, outcome: &Result<T, Fault>) {
        match outcome {
            Err(fault) if fault.indicates_backend_failure() => self.fail(),
            _ => self.succeed(),
        }
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(&self.target);
        }
    }
}

/// Statistics for one circuit
#[derive(Debug, Clone)]
pub struct CircuitStats {
    pub target: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub total_rejections: u64,
    pub time_in_state_ms: u64,
}

impl Serialize for CircuitStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("CircuitStats", 7)?;
        state.serialize_field("target", &self.target)?;
        state.serialize_field("state", &self.state.to_string())?;
        state.serialize_field("failure_count", &self.failure_count)?;
        state.serialize_field("total_calls", &self.total_calls)?;
        state.serialize_field("total_failures", &self.total_failures)?;
        state.serialize_field("total_rejections", &self.total_rejections)?;
        state.serialize_field("time_in_state_ms", &self.time_in_state_ms)?;
        state.end()
    }
}
