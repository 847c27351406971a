//! Mailbox gateway service - the facade callers use.
//!
//! Wires the token cache, authentication, recovery and circuit breaker
//! around a [`SoapTransport`].

use crate::adapters::{
    alert, http_transport, purge_task, InMemoryTokenStore, ReqwestTransport, UnconfiguredProvisioner,
};
use crate::auth::AuthenticationManager;
use crate::cache::TokenCache;
use crate::dispatch::Dispatcher;
use crate::domain::account::AccountInfo;
use crate::domain::call_id::CallId;
use crate::domain::config::GatewayConfig;
use crate::domain::error::{Fault, GatewayError, GatewayResult};
use crate::domain::principal::{Principal, PrincipalKind};
use crate::domain::token::SessionToken;
use crate::envelope::{self, AuthContext, Endpoint, RequestEnvelope, ResponsePayload};
use crate::middleware::{CircuitBreaker, CircuitPermit, GatewayMetrics};
use crate::ports::inbound::MailboxApi;
use crate::ports::outbound::{
    AccountDirectory, AccountProvisioner, AlertSink, SoapTransport, SystemTimeSource, TimeSource,
    TokenStore,
};
use crate::recovery::{AttemptRunner, RecoveryCoordinator};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::{json, value::RawValue};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const GET_ACCOUNT_REQUEST: &str = "GetAccountRequest";
const ADMIN_NAMESPACE: &str = "urn:zimbraAdmin";

/// Authenticated gateway to the mailbox server. Cheap to clone.
#[derive(Clone)]
pub struct MailboxGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    config: GatewayConfig,
    admin: Principal,
    dispatcher: Arc<Dispatcher>,
    cache: Arc<TokenCache>,
    auth: AuthenticationManager,
    recovery: RecoveryCoordinator,
    breaker: Arc<CircuitBreaker>,
    provisioner: Arc<dyn AccountProvisioner>,
    directory: Option<Arc<dyn AccountDirectory>>,
    metrics: Arc<GatewayMetrics>,
    purge_handle: Option<JoinHandle<()>>,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        if let Some(handle) = self.purge_handle.take() {
            handle.abort();
        }
    }
}

/// Builder for [`MailboxGateway`]. Every collaborator not supplied falls
/// back to the default adapter built from the configuration.
pub struct MailboxGatewayBuilder {
    config: GatewayConfig,
    transport: Option<Arc<dyn SoapTransport>>,
    token_store: Option<Arc<dyn TokenStore>>,
    provisioner: Option<Arc<dyn AccountProvisioner>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    directory: Option<Arc<dyn AccountDirectory>>,
    clock: Option<Arc<dyn TimeSource>>,
}

impl MailboxGatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            transport: None,
            token_store: None,
            provisioner: None,
            alert_sink: None,
            directory: None,
            clock: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn SoapTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Shared or external token store. Defaults to an in-process map.
    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.token_store = Some(store);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn AccountProvisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    /// Account existence check. Defaults to `GetAccountRequest` through the
    /// gateway itself.
    pub fn account_directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and assemble the gateway.
    ///
    /// The default in-process token store gets a purge task when called from
    /// within a Tokio runtime.
    pub fn build(self) -> Result<MailboxGateway, GatewayError> {
        let config = self.config;
        config.validate()?;

        let metrics = Arc::new(GatewayMetrics::new());

        let transport: Arc<dyn SoapTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };

        let alert_sink = match self.alert_sink {
            Some(sink) => sink,
            None => alert::from_config(&config.alerts, http_transport::build_client(&config)?),
        };

        let mut purge_handle = None;
        let token_store: Arc<dyn TokenStore> = match self.token_store {
            Some(store) => store,
            None => {
                let store = Arc::new(InMemoryTokenStore::new());
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    purge_handle = Some(handle.spawn(purge_task(
                        Arc::clone(&store),
                        config.tokens.purge_interval,
                    )));
                }
                store
            }
        };

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemTimeSource));
        let cache = Arc::new(TokenCache::new(token_store, clock, Arc::clone(&metrics)));
        let dispatcher = Arc::new(Dispatcher::new(
            transport,
            config.timeouts.request,
            Arc::clone(&metrics),
        ));
        let auth = AuthenticationManager::new(
            Arc::clone(&dispatcher),
            Arc::clone(&cache),
            &config,
            Arc::clone(&metrics),
        );
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone(), alert_sink));

        info!(
            endpoint = %config.server.soap_endpoint(),
            admin_endpoint = %config.server.admin_uri,
            breaker_enabled = config.circuit_breaker.enabled,
            "Mailbox gateway ready"
        );

        Ok(MailboxGateway {
            inner: Arc::new(GatewayInner {
                admin: Principal::admin(config.admin.account.clone()),
                config,
                dispatcher,
                cache,
                auth,
                recovery: RecoveryCoordinator::new(Arc::clone(&metrics)),
                breaker,
                provisioner: self.provisioner.unwrap_or_else(|| Arc::new(UnconfiguredProvisioner)),
                directory: self.directory,
                metrics,
                purge_handle,
            }),
        })
    }
}

impl MailboxGateway {
    pub fn builder(config: GatewayConfig) -> MailboxGatewayBuilder {
        MailboxGatewayBuilder::new(config)
    }

    /// Gateway with every default adapter.
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        MailboxGatewayBuilder::new(config).build()
    }

    /// Call `request_name` on the user endpoint as `principal`.
    pub async fn call_as_user(
        &self,
        principal: &Principal,
        request_name: &str,
        content: Box<RawValue>,
    ) -> Result<ResponsePayload, Fault> {
        self.execute(principal, Endpoint::User, request_name, content).await
    }

    /// Call `request_name` on the administrative endpoint as the service account.
    pub async fn call_as_admin(
        &self,
        request_name: &str,
        content: Box<RawValue>,
    ) -> Result<ResponsePayload, Fault> {
        let admin = self.inner.admin.clone();
        self.execute(&admin, Endpoint::Admin, request_name, content).await
    }

    /// Usable token for `principal`, logging in (and provisioning a missing
    /// account) if needed.
    pub async fn get_valid_token(&self, principal: &Principal) -> Result<SessionToken, Fault> {
        let endpoint = match principal.kind() {
            PrincipalKind::User => Endpoint::User,
            PrincipalKind::Admin => Endpoint::Admin,
        };
        let permit = self.admit(endpoint)?;

        let runner = TokenRunner { gateway: self };
        let result = self.inner.recovery.drive(&runner, principal).await;
        permit.settle(&result);
        result
    }

    /// Direct-login URL for `principal`.
    pub fn preauth_url(&self, principal: &Principal) -> Result<Url, Fault> {
        self.inner.auth.preauth_url(principal).map_err(Fault::from)
    }

    /// End-user principal in the configured mail domain.
    pub fn user(&self, user_id: impl Into<String>) -> Principal {
        Principal::user(user_id, &self.inner.config.server.domain)
    }

    /// The service account principal.
    pub fn admin_principal(&self) -> &Principal {
        &self.inner.admin
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.inner.breaker)
    }

    fn admit(&self, endpoint: Endpoint) -> Result<CircuitPermit, Fault> {
        self.inner.breaker.acquire(endpoint.target()).map_err(|fault| {
            self.inner.metrics.record_circuit_rejection();
            fault
        })
    }

    async fn execute(
        &self,
        principal: &Principal,
        endpoint: Endpoint,
        request_name: &str,
        content: Box<RawValue>,
    ) -> Result<ResponsePayload, Fault> {
        let call_id = CallId::new();
        let started = Instant::now();

        let permit = match self.admit(endpoint) {
            Ok(permit) => permit,
            Err(fault) => {
                self.inner.metrics.record_call(false, 0);
                warn!(call_id = %call_id, request = request_name, "Mailbox circuit open, call rejected");
                return Err(fault);
            }
        };

        let runner = CallRunner {
            gateway: self,
            endpoint,
            request_name,
            content: &content,
        };
        let result = self.inner.recovery.drive(&runner, principal).await;
        permit.settle(&result);

        let latency_ms = started.elapsed().as_millis() as u64;
        self.inner.metrics.record_call(result.is_ok(), latency_ms);

        match &result {
            Ok(_) => debug!(
                call_id = %call_id,
                principal = %principal,
                request = request_name,
                latency_ms = latency_ms,
                "Mailbox call succeeded"
            ),
            Err(fault) => warn!(
                call_id = %call_id,
                principal = %principal,
                request = request_name,
                code = %fault.code,
                category = ?fault.category(),
                latency_ms = latency_ms,
                "Mailbox call failed"
            ),
        }

        result
    }

    /// One admin round-trip: token resolution plus a single send, no recovery.
    async fn send_as_admin_once(
        &self,
        request_name: &str,
        content: Box<RawValue>,
    ) -> Result<ResponsePayload, Fault> {
        let token = self.resolve_token(&self.inner.admin).await?;
        let request = RequestEnvelope::new(request_name, content, AuthContext::Session(token));
        self.inner.dispatcher.send(request, Endpoint::Admin).await
    }

    async fn resolve_token(&self, principal: &Principal) -> Result<SessionToken, Fault> {
        if let Some(token) = self.inner.cache.get(principal).await {
            return Ok(token);
        }
        self.inner.auth.login(principal).await.map_err(Fault::from)
    }
}

/// One request attempt: token resolution plus a single send.
struct CallRunner<'a> {
    gateway: &'a MailboxGateway,
    endpoint: Endpoint,
    request_name: &'a str,
    content: &'a RawValue,
}

#[async_trait]
impl<'a> AttemptRunner for CallRunner<'a> {
    type Output = ResponsePayload;

    async fn attempt(&self, principal: &Principal) -> Result<ResponsePayload, Fault> {
        let token = self.gateway.resolve_token(principal).await?;
        let request = RequestEnvelope::new(
            self.request_name,
            self.content.to_owned(),
            AuthContext::Session(token),
        );
        self.gateway.inner.dispatcher.send(request, self.endpoint).await
    }

    async fn invalidate(&self, principal: &Principal) {
        self.gateway.inner.cache.invalidate(principal).await;
    }

    async fn lookup_account(&self, address: &str) -> Result<AccountInfo, Fault> {
        self.gateway.lookup(address).await
    }

    async fn provision(&self, principal: &Principal) -> anyhow::Result<()> {
        self.gateway.inner.provisioner.provision(principal).await
    }
}

/// Token resolution alone, for [`MailboxGateway::get_valid_token`].
struct TokenRunner<'a> {
    gateway: &'a MailboxGateway,
}

#[async_trait]
impl<'a> AttemptRunner for TokenRunner<'a> {
    type Output = SessionToken;

    async fn attempt(&self, principal: &Principal) -> Result<SessionToken, Fault> {
        self.gateway.resolve_token(principal).await
    }

    async fn invalidate(&self, principal: &Principal) {
        self.gateway.inner.cache.invalidate(principal).await;
    }

    async fn lookup_account(&self, address: &str) -> Result<AccountInfo, Fault> {
        self.gateway.lookup(address).await
    }

    async fn provision(&self, principal: &Principal) -> anyhow::Result<()> {
        self.gateway.inner.provisioner.provision(principal).await
    }
}

#[async_trait]
impl AccountDirectory for MailboxGateway {
    /// Injected directory if any, otherwise a single `GetAccountRequest` as
    /// admin. The lookup is one attempt under a `soap-admin` permit and never
    /// enters a recovery cycle of its own.
    async fn lookup(&self, address: &str) -> Result<AccountInfo, Fault> {
        if let Some(directory) = &self.inner.directory {
            return directory.lookup(address).await;
        }

        let content = envelope::to_content(&json!({
            "_jsns": ADMIN_NAMESPACE,
            "account": { "by": "name", "_content": address },
        }))?;
        let permit = self.admit(Endpoint::Admin)?;
        let result = self.send_as_admin_once(GET_ACCOUNT_REQUEST, content).await;
        permit.settle(&result);

        if let Err(fault) = &result {
            debug!(address = address, code = %fault.code, "Account lookup failed");
        }
        envelope::parse_account_response(address, &result?)
    }
}

#[async_trait]
impl MailboxApi for MailboxGateway {
    async fn call_as_user(
        &self,
        principal: &Principal,
        request_name: &str,
        content: Box<RawValue>,
    ) -> GatewayResult<ResponsePayload> {
        MailboxGateway::call_as_user(self, principal, request_name, content).await
    }

    async fn call_as_admin(
        &self,
        request_name: &str,
        content: Box<RawValue>,
    ) -> GatewayResult<ResponsePayload> {
        MailboxGateway::call_as_admin(self, request_name, content).await
    }

    async fn get_valid_token(&self, principal: &Principal) -> GatewayResult<SessionToken> {
        MailboxGateway::get_valid_token(self, principal).await
    }
}
