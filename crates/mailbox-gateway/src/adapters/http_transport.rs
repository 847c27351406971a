//! HTTP transport over a pooled `reqwest` client.

use crate::domain::config::GatewayConfig;
use crate::domain::error::GatewayError;
use crate::envelope::{Endpoint, WireRequest, WireResponse, SESSION_COOKIE};
use crate::ports::outbound::{SoapTransport, TransportError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE};
use reqwest::Client;
use tracing::debug;

/// [`SoapTransport`] posting envelopes to the configured endpoints.
///
/// One client (and so one connection pool) is shared by every call.
pub struct ReqwestTransport {
    client: Client,
    user_endpoint: String,
    admin_endpoint: String,
}

impl ReqwestTransport {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = build_client(config)?;
        Ok(Self::with_client(client, config))
    }

    /// Use an existing client (shared pools, custom TLS roots).
    pub fn with_client(client: Client, config: &GatewayConfig) -> Self {
        Self {
            client,
            user_endpoint: config.server.soap_endpoint(),
            admin_endpoint: config.server.admin_uri.clone(),
        }
    }

    fn url(&self, endpoint: Endpoint) -> &str {
        match endpoint {
            Endpoint::User => &self.user_endpoint,
            Endpoint::Admin => &self.admin_endpoint,
        }
    }
}

/// Build the pooled client described by the `http` and `timeouts` sections.
pub fn build_client(config: &GatewayConfig) -> Result<Client, GatewayError> {
    let mut builder = Client::builder()
        .timeout(config.timeouts.request)
        .connect_timeout(config.timeouts.connect)
        .pool_max_idle_per_host(config.http.max_pool_size)
        .danger_accept_invalid_certs(config.http.accept_invalid_certs);

    if let Some(proxy) = &config.http.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|e| GatewayError::Transport(format!("invalid proxy {}: {}", proxy, e)))?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

#[async_trait]
impl SoapTransport for ReqwestTransport {
    async fn post(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let url = self.url(request.endpoint);

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &request.session_cookie {
            builder = builder.header(COOKIE, format!("{}={}", SESSION_COOKIE, token));
        }

        let response = builder
            .body(request.body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        debug!(
            request = %request.name,
            status = status,
            bytes = body.len(),
            "Mailbox server responded"
        );

        Ok(WireResponse { status, body })
    }
}

fn map_reqwest_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect {
            endpoint: url.to_string(),
            reason: e.to_string(),
        }
    } else {
        TransportError::Io(e.to_string())
    }
}
