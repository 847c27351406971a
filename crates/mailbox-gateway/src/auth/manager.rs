//! Login handshakes for end users and the service account.

use super::preauth::{self, PreauthError, BY_NAME};
use crate::cache::TokenCache;
use crate::dispatch::Dispatcher;
use crate::domain::config::{GatewayConfig, Secret};
use crate::domain::error::{codes, Fault};
use crate::domain::principal::Principal;
use crate::domain::token::SessionToken;
use crate::envelope::{self, AuthContext, Endpoint, RequestEnvelope};
use crate::middleware::GatewayMetrics;
use reqwest::Url;
use serde_json::{json, value::RawValue};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const AUTH_REQUEST: &str = "AuthRequest";
const ACCOUNT_NAMESPACE: &str = "urn:zimbraAccount";
const ADMIN_NAMESPACE: &str = "urn:zimbraAdmin";

#[derive(Debug, Error)]
pub enum AuthError {
    /// The login call itself faulted (including transport failures)
    #[error("login rejected: {0}")]
    Rejected(Fault),

    #[error("pre-authentication failed: {0}")]
    Preauth(#[from] PreauthError),

    #[error("unreadable login response: {0}")]
    InvalidResponse(Fault),

    #[error("failed to encode login request: {0}")]
    Encode(Fault),
}

impl From<AuthError> for Fault {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Rejected(fault)
            | AuthError::InvalidResponse(fault)
            | AuthError::Encode(fault) => fault,
            AuthError::Preauth(e) => Fault::local(codes::PREAUTH_FAILED, e.to_string()),
        }
    }
}

/// Performs logins and writes the issued tokens through the [`TokenCache`].
pub struct AuthenticationManager {
    dispatcher: Arc<Dispatcher>,
    cache: Arc<TokenCache>,
    admin_password: Secret,
    preauth_key: Secret,
    preauth_endpoint: String,
    refresh_margin: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl AuthenticationManager {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cache: Arc<TokenCache>,
        config: &GatewayConfig,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            dispatcher,
            cache,
            admin_password: config.admin.password.clone(),
            preauth_key: config.preauth.key.clone(),
            preauth_endpoint: config.server.preauth_endpoint(),
            refresh_margin: config.tokens.refresh_margin,
            metrics,
        }
    }

    /// Log `principal` in and cache the issued token.
    pub async fn login(&self, principal: &Principal) -> Result<SessionToken, AuthError> {
        let now = self.cache.now_millis();

        let (content, endpoint) = match principal {
            Principal::User { address, .. } => (self.user_auth_request(address, now)?, Endpoint::User),
            Principal::Admin { account } => (self.admin_auth_request(account)?, Endpoint::Admin),
        };

        let request = RequestEnvelope::new(AUTH_REQUEST, content, AuthContext::NoSession);
        let payload = match self.dispatcher.send(request, endpoint).await {
            Ok(payload) => payload,
            Err(fault) => {
                self.metrics.record_login(false);
                warn!(principal = %principal, code = %fault.code, "Login rejected");
                return Err(AuthError::Rejected(fault));
            }
        };

        let grant = envelope::parse_auth_response(&payload).map_err(|fault| {
            self.metrics.record_login(false);
            warn!(principal = %principal, error = %fault, "Unreadable login response");
            AuthError::InvalidResponse(fault)
        })?;

        let token = SessionToken::issue(
            grant.token,
            principal,
            now,
            grant.lifetime_ms,
            self.refresh_margin,
        );
        self.cache.put(principal, token.clone()).await;
        self.metrics.record_login(true);

        info!(
            principal = %principal,
            lifetime_ms = grant.lifetime_ms,
            "Logged in to mailbox server"
        );
        Ok(token)
    }

    /// Direct-login URL for `principal`, signed at the current instant.
    pub fn preauth_url(&self, principal: &Principal) -> Result<Url, AuthError> {
        let credential = preauth::sign(
            self.preauth_key.expose(),
            principal.address(),
            self.cache.now_millis(),
        )?;
        Ok(preauth::preauth_url(&self.preauth_endpoint, &credential)?)
    }

    fn user_auth_request(&self, address: &str, now_ms: u64) -> Result<Box<RawValue>, AuthError> {
        let credential = preauth::sign(self.preauth_key.expose(), address, now_ms)?;
        envelope::to_content(&json!({
            "_jsns": ACCOUNT_NAMESPACE,
            "account": { "by": BY_NAME, "_content": credential.address },
            "preauth": {
                "timestamp": credential.timestamp_ms.to_string(),
                "_content": credential.signature,
            },
        }))
        .map_err(AuthError::Encode)
    }

    fn admin_auth_request(&self, account: &str) -> Result<Box<RawValue>, AuthError> {
        envelope::to_content(&json!({
            "_jsns": ADMIN_NAMESPACE,
            "account": { "by": BY_NAME, "_content": account },
            "password": { "_content": self.admin_password.expose() },
        }))
        .map_err(AuthError::Encode)
    }
}
