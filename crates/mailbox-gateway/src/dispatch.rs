//! Single protocol round-trip: encode, post with a deadline, decode.

use crate::domain::error::Fault;
use crate::envelope::{self, Endpoint, RequestEnvelope, ResponsePayload};
use crate::middleware::GatewayMetrics;
use crate::ports::outbound::SoapTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Sends envelopes through the transport, bounding each exchange with a timeout.
pub struct Dispatcher {
    transport: Arc<dyn SoapTransport>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn SoapTransport>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            transport,
            timeout,
            metrics,
        }
    }

    /// One round-trip. Faults in the response body come back as `Err`.
    pub async fn send(
        &self,
        request: RequestEnvelope,
        endpoint: Endpoint,
    ) -> Result<ResponsePayload, Fault> {
        let wire = envelope::encode(&request, endpoint)?;
        let name = wire.name.clone();

        debug!(request = %name, endpoint = ?endpoint, "Sending envelope");

        let response = match tokio::time::timeout(self.timeout, self.transport.post(wire)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                self.metrics.record_transport_failure();
                warn!(request = %name, error = %e, "Transport failure");
                return Err(e.into());
            }
            Err(_) => {
                self.metrics.record_transport_failure();
                warn!(
                    request = %name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Mailbox server did not answer in time"
                );
                return Err(Fault::timeout(self.timeout.as_millis()));
            }
        };

        envelope::decode(&response).into_result()
    }
}
