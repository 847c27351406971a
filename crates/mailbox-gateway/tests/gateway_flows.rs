//! # Gateway Flow Tests
//!
//! End-to-end behaviour of [`MailboxGateway`] against a scripted in-memory
//! mailbox server: token reuse and refresh, the bounded recovery cycle,
//! account provisioning, and circuit breaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mailbox_gateway::adapters::InMemoryTokenStore;
use mailbox_gateway::domain::config::Secret;
use mailbox_gateway::envelope::{to_content, Endpoint, WireRequest, WireResponse};
use mailbox_gateway::ports::{
    AccountProvisioner, AlertSink, CircuitAlert, CircuitTransition, ManualTimeSource,
    SoapTransport, TimeSource, TokenStore, TransportError,
};
use mailbox_gateway::{
    codes, CircuitState, FaultCategory, GatewayConfig, MailboxApi, MailboxGateway, Principal,
    SessionToken,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

const START_MS: u64 = 1_700_000_000_000;
const TWO_HOURS_MS: u64 = 7_200_000;

// =============================================================================
// SCRIPTED SERVER
// =============================================================================

/// One request as the server saw it.
#[derive(Debug, Clone)]
struct Seen {
    endpoint: Endpoint,
    name: String,
    body: Value,
    cookie: Option<String>,
}

type Responder = dyn Fn(&Seen) -> Result<WireResponse, TransportError> + Send + Sync;

struct ScriptedServer {
    responder: Box<Responder>,
    seen: Mutex<Vec<Seen>>,
    auth_delay: Option<Duration>,
    delay: Option<Duration>,
}

impl ScriptedServer {
    fn new<F>(responder: F) -> Self
    where
        F: Fn(&Seen) -> Result<WireResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            seen: Mutex::new(Vec::new()),
            auth_delay: None,
            delay: None,
        }
    }

    fn count(&self, name: &str) -> usize {
        self.seen.lock().iter().filter(|s| s.name == name).count()
    }

    fn logins(&self) -> usize {
        self.count("AuthRequest")
    }

    fn total(&self) -> usize {
        self.seen.lock().len()
    }

    fn last(&self, name: &str) -> Option<Seen> {
        self.seen.lock().iter().rev().find(|s| s.name == name).cloned()
    }
}

#[async_trait]
impl SoapTransport for ScriptedServer {
    async fn post(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let seen = Seen {
            endpoint: request.endpoint,
            name: request.name.clone(),
            body: serde_json::from_str(&request.body).unwrap(),
            cookie: request.session_cookie.clone(),
        };
        self.seen.lock().push(seen.clone());

        let delay = if seen.name == "AuthRequest" {
            self.auth_delay
        } else {
            self.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        (self.responder)(&seen)
    }
}

fn auth_ok(token: &str, lifetime_ms: u64) -> Result<WireResponse, TransportError> {
    let body = json!({ "Body": { "AuthResponse": {
        "authToken": [{ "_content": token }],
        "lifetime": lifetime_ms,
        "skin": [{ "_content": "harmony" }],
    }}});
    Ok(WireResponse::new(200, body.to_string()))
}

fn ok(name: &str, content: Value) -> Result<WireResponse, TransportError> {
    let mut body = serde_json::Map::new();
    body.insert(name.to_string(), content);
    Ok(WireResponse::new(200, json!({ "Body": body }).to_string()))
}

fn fault(code: &str, text: &str) -> Result<WireResponse, TransportError> {
    let body = json!({ "Body": { "Fault": {
        "Code": { "Value": "soap:Sender" },
        "Reason": { "Text": text },
        "Detail": { "Error": { "Code": code, "Trace": "qtp1-1234" } },
    }}});
    Ok(WireResponse::new(500, body.to_string()))
}

fn refused() -> Result<WireResponse, TransportError> {
    Err(TransportError::Connect {
        endpoint: "https://mail.example.org/service/soap".into(),
        reason: "connection refused".into(),
    })
}

/// Token the user login hands out, distinguishable by login count
fn login_token(seen: &Seen) -> String {
    let account = seen.body["Body"]["AuthRequest"]["account"]["_content"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    format!("tok-{}", account)
}

// =============================================================================
// COLLABORATORS
// =============================================================================

#[derive(Default)]
struct RecordingAlerts(Mutex<Vec<CircuitAlert>>);

impl RecordingAlerts {
    fn transitions(&self) -> Vec<CircuitTransition> {
        self.0.lock().iter().map(|a| a.transition).collect()
    }
}

impl AlertSink for RecordingAlerts {
    fn notify(&self, alert: CircuitAlert) {
        self.0.lock().push(alert);
    }
}

struct FlagProvisioner {
    provisioned: Arc<AtomicBool>,
    calls: AtomicU32,
}

#[async_trait]
impl AccountProvisioner for FlagProvisioner {
    async fn provision(&self, _principal: &Principal) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.provisioned.store(true, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// FIXTURE
// =============================================================================

fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.server.base_uri = "https://mail.example.org".into();
    config.server.admin_uri = "https://mail.example.org:7071/service/admin/soap".into();
    config.server.domain = "example.org".into();
    config.admin.account = "admin@example.org".into();
    config.admin.password = Secret::new("s3cret");
    config.preauth.key = Secret::new("0123456789abcdef");
    config.tokens.refresh_margin = Duration::from_secs(3600);
    config
}

struct Fixture {
    gateway: MailboxGateway,
    server: Arc<ScriptedServer>,
    clock: Arc<ManualTimeSource>,
    store: Arc<InMemoryTokenStore>,
    alerts: Arc<RecordingAlerts>,
}

fn fixture_with(config: GatewayConfig, server: ScriptedServer) -> Fixture {
    let server = Arc::new(server);
    let clock = Arc::new(ManualTimeSource::new(START_MS));
    let store = Arc::new(InMemoryTokenStore::new());
    let alerts = Arc::new(RecordingAlerts::default());

    let gateway = MailboxGateway::builder(config)
        .transport(server.clone())
        .token_store(store.clone())
        .alert_sink(alerts.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    Fixture {
        gateway,
        server,
        clock,
        store,
        alerts,
    }
}

fn fixture(server: ScriptedServer) -> Fixture {
    fixture_with(config(), server)
}

/// Server that logs anyone in and answers `GetInfoRequest`
fn healthy_server() -> ScriptedServer {
    ScriptedServer::new(|seen| match seen.name.as_str() {
        "AuthRequest" => auth_ok(&login_token(seen), TWO_HOURS_MS),
        "GetInfoRequest" => ok("GetInfoResponse", json!({ "name": "jdoe@example.org" })),
        other => fault(codes::SERVICE_FAILURE, &format!("unknown request {}", other)),
    })
}

fn empty() -> Box<serde_json::value::RawValue> {
    to_content(&json!({ "_jsns": "urn:zimbraAccount" })).unwrap()
}

async fn seed_token(fx: &Fixture, principal: &Principal, value: &str) {
    let token = SessionToken::issue(
        value,
        principal,
        fx.clock.now_millis(),
        TWO_HOURS_MS,
        Duration::from_secs(3600),
    );
    fx.store
        .put(principal.id(), token, Duration::from_secs(3600))
        .await
        .unwrap();
}

// =============================================================================
// TOKEN HANDLING
// =============================================================================

#[tokio::test]
async fn test_cached_token_is_reused() {
    let fx = fixture(healthy_server());
    let user = fx.gateway.user("jdoe");

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    let payload = fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();

    assert_eq!(payload.name, "GetInfoResponse");
    assert_eq!(fx.server.logins(), 1);
    assert_eq!(fx.server.count("GetInfoRequest"), 2);

    let last = fx.server.last("GetInfoRequest").unwrap();
    assert_eq!(last.cookie.as_deref(), Some("tok-jdoe@example.org"));
    assert_eq!(
        last.body["Header"]["context"]["authToken"],
        "tok-jdoe@example.org"
    );
}

#[tokio::test]
async fn test_seeded_token_skips_login() {
    let fx = fixture(healthy_server());
    let user = fx.gateway.user("jdoe");
    seed_token(&fx, &user, "seeded").await;

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();

    assert_eq!(fx.server.logins(), 0);
    assert_eq!(
        fx.server.last("GetInfoRequest").unwrap().cookie.as_deref(),
        Some("seeded")
    );
}

#[tokio::test]
async fn test_token_refreshed_before_server_expiry() {
    let fx = fixture(healthy_server());
    let user = fx.gateway.user("jdoe");

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    assert_eq!(fx.server.logins(), 1);

    // Still inside the server lifetime, but past the refresh margin
    fx.clock.advance(Duration::from_secs(61 * 60));
    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();

    assert_eq!(fx.server.logins(), 2);
    assert_eq!(fx.server.count("GetInfoRequest"), 2);
}

#[tokio::test]
async fn test_user_login_uses_preauth_without_session() {
    let fx = fixture(healthy_server());
    let user = fx.gateway.user("jdoe");

    fx.gateway.get_valid_token(&user).await.unwrap();

    let login = fx.server.last("AuthRequest").unwrap();
    assert_eq!(login.endpoint, Endpoint::User);
    assert!(login.cookie.is_none());
    assert_eq!(
        login.body["Header"]["context"]["_content"][0]["nosession"],
        json!({})
    );
    let auth = &login.body["Body"]["AuthRequest"];
    assert_eq!(auth["account"]["by"], "name");
    assert_eq!(auth["preauth"]["timestamp"], START_MS.to_string());
    assert_eq!(auth["preauth"]["_content"].as_str().unwrap().len(), 40);
}

#[tokio::test]
async fn test_get_valid_token_through_api_port() {
    let fx = fixture(healthy_server());
    let api: Arc<dyn MailboxApi> = Arc::new(fx.gateway.clone());
    let user = fx.gateway.user("jdoe");

    let first = api.get_valid_token(&user).await.unwrap();
    let second = api.get_valid_token(&user).await.unwrap();

    assert_eq!(first.value(), "tok-jdoe@example.org");
    assert_eq!(first, second);
    assert_eq!(fx.server.logins(), 1);
    assert_eq!(fx.server.total(), 1);
}

#[tokio::test]
async fn test_admin_call_uses_admin_endpoint_and_token() {
    let fx = fixture(ScriptedServer::new(|seen| match seen.name.as_str() {
        "AuthRequest" => auth_ok(&login_token(seen), TWO_HOURS_MS),
        "GetAccountInfoRequest" => ok("GetAccountInfoResponse", json!({ "name": "jdoe@example.org" })),
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    }));

    // A user session for the admin's own address must not be reused
    let same_address = Principal::user("admin", "example.org");
    seed_token(&fx, &same_address, "user-level").await;

    fx.gateway
        .call_as_admin("GetAccountInfoRequest", empty())
        .await
        .unwrap();

    let login = fx.server.last("AuthRequest").unwrap();
    assert_eq!(login.endpoint, Endpoint::Admin);
    assert_eq!(login.body["Body"]["AuthRequest"]["_jsns"], "urn:zimbraAdmin");
    assert_eq!(login.body["Body"]["AuthRequest"]["password"]["_content"], "s3cret");

    let call = fx.server.last("GetAccountInfoRequest").unwrap();
    assert_eq!(call.endpoint, Endpoint::Admin);
    assert_eq!(call.cookie.as_deref(), Some("tok-admin@example.org"));
}

#[tokio::test]
async fn test_concurrent_calls_for_uncached_principal() {
    let mut server = healthy_server();
    server.auth_delay = Some(Duration::from_millis(20));
    let fx = fixture(server);
    let user = fx.gateway.user("jdoe");

    let (a, b) = tokio::join!(
        fx.gateway.call_as_user(&user, "GetInfoRequest", empty()),
        fx.gateway.call_as_user(&user, "GetInfoRequest", empty()),
    );
    assert!(a.is_ok());
    assert!(b.is_ok());

    let logins = fx.server.logins();
    assert!((1..=2).contains(&logins), "unexpected login count {}", logins);

    // Whichever login won, the cache now serves the next call
    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    assert_eq!(fx.server.logins(), logins);
}

#[tokio::test]
async fn test_distinct_principals_get_their_own_tokens() {
    let mut server = healthy_server();
    server.auth_delay = Some(Duration::from_millis(5));
    let fx = fixture(server);
    let users: Vec<Principal> = (0..8).map(|i| fx.gateway.user(format!("user{}", i))).collect();

    let results = futures::future::join_all(
        users
            .iter()
            .map(|user| fx.gateway.get_valid_token(user)),
    )
    .await;

    for (user, result) in users.iter().zip(results) {
        let token = result.unwrap();
        assert_eq!(token.address, user.address());
        assert_eq!(token.value(), format!("tok-{}", user.address()));
    }
    assert_eq!(fx.server.logins(), 8);
    assert_eq!(fx.store.len(), 8);
}

// =============================================================================
// RECOVERY
// =============================================================================

#[tokio::test]
async fn test_expired_token_recovers_once() {
    let expired_once = Arc::new(AtomicBool::new(false));
    let flag = expired_once.clone();
    let fx = fixture(ScriptedServer::new(move |seen| match seen.name.as_str() {
        "AuthRequest" => auth_ok("fresh", TWO_HOURS_MS),
        "GetInfoRequest" if !flag.swap(true, Ordering::SeqCst) => {
            fault(codes::AUTH_EXPIRED, "auth credentials have expired")
        }
        "GetInfoRequest" => ok("GetInfoResponse", json!({})),
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    }));
    let user = fx.gateway.user("jdoe");
    seed_token(&fx, &user, "stale-on-server").await;

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();

    assert_eq!(fx.server.count("GetInfoRequest"), 2);
    assert_eq!(fx.server.logins(), 1);
    assert_eq!(
        fx.server.last("GetInfoRequest").unwrap().cookie.as_deref(),
        Some("fresh")
    );
    assert_eq!(fx.gateway.metrics().snapshot().recoveries, 1);
}

#[tokio::test]
async fn test_always_expired_backend_stops_after_one_resend() {
    let fx = fixture(ScriptedServer::new(|seen| match seen.name.as_str() {
        "AuthRequest" => auth_ok("fresh", TWO_HOURS_MS),
        _ => fault(codes::AUTH_EXPIRED, "auth credentials have expired"),
    }));
    let user = fx.gateway.user("jdoe");
    seed_token(&fx, &user, "cached").await;

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::AUTH_EXPIRED);
    assert_eq!(err.message, "auth credentials have expired");
    assert_eq!(err.category(), FaultCategory::Unauthorized);
    assert_eq!(fx.server.count("GetInfoRequest"), 2);
    assert_eq!(fx.server.logins(), 1);
    assert_eq!(fx.server.total(), 3);
}

#[tokio::test]
async fn test_missing_account_is_provisioned_then_call_resent() {
    let provisioned = Arc::new(AtomicBool::new(false));
    let flag = provisioned.clone();
    let server = ScriptedServer::new(move |seen| match (seen.endpoint, seen.name.as_str()) {
        (Endpoint::User, "AuthRequest") if !flag.load(Ordering::SeqCst) => {
            fault(codes::AUTH_FAILED, "authentication failed for [jdoe@example.org]")
        }
        (_, "AuthRequest") => auth_ok(&login_token(seen), TWO_HOURS_MS),
        (Endpoint::Admin, "GetAccountRequest") => {
            fault(codes::NO_SUCH_ACCOUNT, "no such account: jdoe@example.org")
        }
        (Endpoint::User, "GetInfoRequest") => ok("GetInfoResponse", json!({})),
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    });

    let server = Arc::new(server);
    let provisioner = Arc::new(FlagProvisioner {
        provisioned,
        calls: AtomicU32::new(0),
    });
    let gateway = MailboxGateway::builder(config())
        .transport(server.clone())
        .provisioner(provisioner.clone())
        .alert_sink(Arc::new(RecordingAlerts::default()))
        .clock(Arc::new(ManualTimeSource::new(START_MS)))
        .build()
        .unwrap();
    let user = gateway.user("jdoe");

    gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();

    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    assert_eq!(server.count("GetAccountRequest"), 1);
    assert_eq!(server.count("GetInfoRequest"), 1);

    let lookup = server.last("GetAccountRequest").unwrap();
    assert_eq!(
        lookup.body["Body"]["GetAccountRequest"]["account"]["_content"],
        "jdoe@example.org"
    );
    assert_eq!(lookup.cookie.as_deref(), Some("tok-admin@example.org"));
    assert_eq!(gateway.metrics().snapshot().provisionings, 1);
}

#[tokio::test]
async fn test_inactive_account_is_terminal() {
    let fx = fixture(ScriptedServer::new(|seen| match (seen.endpoint, seen.name.as_str()) {
        (Endpoint::User, "AuthRequest") => fault(codes::AUTH_FAILED, "authentication failed"),
        (Endpoint::Admin, "AuthRequest") => auth_ok("admin", TWO_HOURS_MS),
        (Endpoint::Admin, "GetAccountRequest") => ok(
            "GetAccountResponse",
            json!({ "account": [{
                "name": "jdoe@example.org",
                "id": "5a1c0f2e",
                "a": [
                    { "n": "zimbraMailHost", "_content": "mail.example.org" },
                    { "n": "zimbraAccountStatus", "_content": "locked" },
                ],
            }]}),
        ),
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    }));
    let user = fx.gateway.user("jdoe");

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::ACCOUNT_NOT_ACTIVE);
    assert_eq!(err.message, "Account jdoe@example.org not active : locked");
    assert_eq!(fx.server.count("GetInfoRequest"), 0);
    assert_eq!(fx.gateway.metrics().snapshot().provisionings, 0);
}

#[tokio::test]
async fn test_missing_account_without_provisioner_is_terminal() {
    let fx = fixture(ScriptedServer::new(|seen| match (seen.endpoint, seen.name.as_str()) {
        (Endpoint::User, "AuthRequest") => fault(codes::AUTH_FAILED, "authentication failed"),
        (Endpoint::Admin, "AuthRequest") => auth_ok("admin", TWO_HOURS_MS),
        (Endpoint::Admin, "GetAccountRequest") => fault(codes::NO_SUCH_ACCOUNT, "no such account"),
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    }));
    let user = fx.gateway.user("jdoe");

    let err = fx.gateway.get_valid_token(&user).await.unwrap_err();

    assert_eq!(err.code, codes::PROVISIONING_FAILED);
    assert_eq!(fx.server.count("AuthRequest"), 2);
}

#[tokio::test]
async fn test_unreachable_admin_endpoint_surfaces_as_unavailable() {
    let fx = fixture(ScriptedServer::new(|seen| match seen.endpoint {
        Endpoint::User => fault(codes::AUTH_FAILED, "authentication failed"),
        Endpoint::Admin => refused(),
    }));
    let user = fx.gateway.user("jdoe");

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::TRANSPORT_ERROR);
    assert_eq!(err.category(), FaultCategory::Unavailable);
    assert_eq!(fx.server.count("GetInfoRequest"), 0);
    assert_eq!(fx.gateway.metrics().snapshot().provisionings, 0);
}

#[tokio::test]
async fn test_account_lookup_is_a_single_round_trip() {
    let fx = fixture(ScriptedServer::new(|seen| match (seen.endpoint, seen.name.as_str()) {
        (Endpoint::User, "AuthRequest") => fault(codes::AUTH_FAILED, "authentication failed"),
        (Endpoint::Admin, "AuthRequest") => auth_ok("admin", TWO_HOURS_MS),
        (Endpoint::Admin, "GetAccountRequest") => {
            fault(codes::AUTH_EXPIRED, "auth credentials have expired")
        }
        _ => fault(codes::SERVICE_FAILURE, "unexpected"),
    }));
    let user = fx.gateway.user("jdoe");

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::AUTH_EXPIRED);
    assert_eq!(fx.server.count("GetAccountRequest"), 1);
    let admin_logins = fx
        .server
        .seen
        .lock()
        .iter()
        .filter(|s| s.endpoint == Endpoint::Admin && s.name == "AuthRequest")
        .count();
    assert_eq!(admin_logins, 1);
    assert_eq!(fx.server.count("GetInfoRequest"), 0);
}

// =============================================================================
// CIRCUIT BREAKER
// =============================================================================

fn breaker_config() -> GatewayConfig {
    let mut config = config();
    config.circuit_breaker.failure_threshold = 3;
    config.circuit_breaker.open_timeout = Duration::from_millis(50);
    config
}

fn switchable_server(down: Arc<AtomicBool>) -> ScriptedServer {
    ScriptedServer::new(move |seen| {
        if down.load(Ordering::SeqCst) {
            return refused();
        }
        match seen.name.as_str() {
            "AuthRequest" => auth_ok(&login_token(seen), TWO_HOURS_MS),
            _ => ok("GetInfoResponse", json!({})),
        }
    })
}

#[tokio::test]
async fn test_breaker_opens_and_short_circuits() {
    let down = Arc::new(AtomicBool::new(true));
    let fx = fixture_with(breaker_config(), switchable_server(down.clone()));
    let user = fx.gateway.user("jdoe");

    for _ in 0..3 {
        let err = fx
            .gateway
            .call_as_user(&user, "GetInfoRequest", empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TRANSPORT_ERROR);
    }
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Open);
    assert_eq!(fx.alerts.transitions(), vec![CircuitTransition::Opened]);

    let before = fx.server.total();
    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::CIRCUIT_OPEN);
    assert_eq!(err.category(), FaultCategory::Unavailable);
    assert_eq!(fx.server.total(), before);
    assert_eq!(fx.gateway.metrics().snapshot().circuit_rejections, 1);

    // Admin endpoint has its own circuit
    assert_eq!(
        fx.gateway.circuit_breaker().state("soap-admin"),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_breaker_trial_success_closes() {
    let down = Arc::new(AtomicBool::new(true));
    let fx = fixture_with(breaker_config(), switchable_server(down.clone()));
    let user = fx.gateway.user("jdoe");

    for _ in 0..3 {
        let _ = fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await;
    }
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Open);

    down.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(80)).await;

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Closed);
    assert_eq!(
        fx.alerts.transitions(),
        vec![CircuitTransition::Opened, CircuitTransition::Closed]
    );
}

#[tokio::test]
async fn test_breaker_trial_failure_reopens() {
    let down = Arc::new(AtomicBool::new(true));
    let fx = fixture_with(breaker_config(), switchable_server(down));
    let user = fx.gateway.user("jdoe");

    for _ in 0..3 {
        let _ = fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await;
    }
    tokio::time::sleep(Duration::from_millis(80)).await;

    let before = fx.server.total();
    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::TRANSPORT_ERROR);
    assert_eq!(fx.server.total(), before + 1);
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Open);

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();
    assert_eq!(err.code, codes::CIRCUIT_OPEN);
}

#[tokio::test]
async fn test_protocol_faults_do_not_trip_breaker() {
    let mut config = breaker_config();
    config.circuit_breaker.failure_threshold = 1;
    let fx = fixture_with(
        config,
        ScriptedServer::new(|seen| match seen.name.as_str() {
            "AuthRequest" => auth_ok("tok", TWO_HOURS_MS),
            _ => fault(codes::NO_SUCH_MBOX, "no such mailbox"),
        }),
    );
    let user = fx.gateway.user("jdoe");

    for _ in 0..3 {
        let err = fx
            .gateway
            .call_as_user(&user, "GetFolderRequest", empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::NO_SUCH_MBOX);
        assert_eq!(err.category(), FaultCategory::NotFound);
    }
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Closed);
    assert!(fx.alerts.transitions().is_empty());
}

#[tokio::test]
async fn test_slow_server_times_out_and_counts() {
    let mut config = breaker_config();
    config.circuit_breaker.failure_threshold = 1;
    config.timeouts.request = Duration::from_millis(30);
    config.timeouts.connect = Duration::from_millis(10);

    let mut server = healthy_server();
    server.delay = Some(Duration::from_secs(5));
    let fx = fixture_with(config, server);
    let user = fx.gateway.user("jdoe");

    let err = fx
        .gateway
        .call_as_user(&user, "GetInfoRequest", empty())
        .await
        .unwrap_err();

    assert_eq!(err.code, codes::TIMEOUT);
    assert_eq!(fx.gateway.circuit_breaker().state("soap"), CircuitState::Open);
    assert_eq!(fx.gateway.metrics().snapshot().transport_failures, 1);
}

#[tokio::test]
async fn test_disabled_breaker_never_opens() {
    let mut config = breaker_config();
    config.circuit_breaker.enabled = false;
    let fx = fixture_with(config, switchable_server(Arc::new(AtomicBool::new(true))));
    let user = fx.gateway.user("jdoe");

    for _ in 0..5 {
        let err = fx
            .gateway
            .call_as_user(&user, "GetInfoRequest", empty())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::TRANSPORT_ERROR);
    }
    assert_eq!(fx.server.total(), 5);
}

// =============================================================================
// METRICS
// =============================================================================

#[tokio::test]
async fn test_metrics_track_calls_and_cache() {
    let fx = fixture(healthy_server());
    let user = fx.gateway.user("jdoe");

    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    fx.gateway.call_as_user(&user, "GetInfoRequest", empty()).await.unwrap();
    let _ = fx.gateway.call_as_user(&user, "NoSuchRequest", empty()).await;

    let snapshot = fx.gateway.metrics().snapshot();
    assert_eq!(snapshot.calls_total, 3);
    assert_eq!(snapshot.calls_success, 2);
    assert_eq!(snapshot.calls_fault, 1);
    assert_eq!(snapshot.logins, 1);
    assert_eq!(snapshot.cache_misses, 1);
    assert_eq!(snapshot.cache_hits, 2);

    let encoded: HashMap<String, Value> =
        serde_json::from_value(serde_json::to_value(&snapshot).unwrap()).unwrap();
    assert!(encoded.contains_key("average_latency_ms"));
}
