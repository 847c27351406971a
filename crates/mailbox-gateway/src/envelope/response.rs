use super::{ResponseOutcome, ResponsePayload, WireResponse};
use crate::domain::account::AccountInfo;
use crate::domain::error::{codes, Fault};
use serde::Deserialize;
use serde_json::value::RawValue;
use serde_json::Value;
use std::collections::BTreeMap;

const FAULT_KEY: &str = "Fault";
const ACCOUNT_STATUS_ATTR: &str = "zimbraAccountStatus";

#[derive(Deserialize)]
struct InboundEnvelope {
    #[serde(rename = "Body")]
    body: Option<BTreeMap<String, Box<RawValue>>>,
}

#[derive(Deserialize)]
struct FaultBody {
    #[serde(rename = "Reason")]
    reason: Option<Reason>,
    #[serde(rename = "Detail")]
    detail: Option<Detail>,
}

#[derive(Deserialize)]
struct Reason {
    #[serde(rename = "Text")]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Detail {
    #[serde(rename = "Error")]
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(rename = "Code")]
    code: Option<String>,
}

/// Decode a transport response into a payload or a fault.
///
/// Never fails: anything that cannot be read becomes a
/// `gateway.MALFORMED_RESPONSE` fault carrying the HTTP status.
pub fn decode(response: &WireResponse) -> ResponseOutcome {
    let status = response.status;

    let envelope: InboundEnvelope = match serde_json::from_slice(&response.body) {
        Ok(envelope) => envelope,
        Err(e) => {
            return ResponseOutcome::Fault(Fault::malformed(
                status,
                format!("unreadable envelope: {}", e),
            ))
        }
    };

    let Some(mut body) = envelope.body else {
        return ResponseOutcome::Fault(Fault::malformed(status, "envelope has no Body"));
    };

    if let Some(raw_fault) = body.remove(FAULT_KEY) {
        return ResponseOutcome::Fault(decode_fault(status, &raw_fault));
    }

    if !response.is_success() {
        return ResponseOutcome::Fault(Fault::malformed(status, "error status without Fault"));
    }

    match body.into_iter().next() {
        Some((name, content)) => ResponseOutcome::Success(ResponsePayload { name, content }),
        None => ResponseOutcome::Fault(Fault::malformed(status, "empty Body")),
    }
}

fn decode_fault(status: u16, raw: &RawValue) -> Fault {
    let parsed: FaultBody = match serde_json::from_str(raw.get()) {
        Ok(parsed) => parsed,
        Err(e) => return Fault::malformed(status, format!("unreadable Fault: {}", e)),
    };

    let code = parsed.detail.and_then(|d| d.error).and_then(|e| e.code);
    let text = parsed.reason.and_then(|r| r.text);

    match code {
        Some(code) => {
            let message = text.unwrap_or_else(|| code.clone());
            Fault::remote(code, message)
        }
        None => Fault::malformed(
            status,
            format!(
                "Fault without Detail.Error.Code: {}",
                text.unwrap_or_default()
            ),
        ),
    }
}

/// Token and lifetime read from an `AuthResponse`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthGrant {
    pub token: String,
    pub lifetime_ms: u64,
}

impl std::fmt::Debug for AuthGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGrant")
            .field("token", &"<redacted>")
            .field("lifetime_ms", &self.lifetime_ms)
            .finish()
    }
}

#[derive(Deserialize)]
struct AuthResponseBody {
    #[serde(rename = "authToken")]
    auth_token: Vec<TextNode>,
    lifetime: Value,
}

#[derive(Deserialize)]
struct TextNode {
    #[serde(rename = "_content")]
    content: String,
}

/// Read the token and its lifetime out of an `AuthResponse` payload.
pub fn parse_auth_response(payload: &ResponsePayload) -> Result<AuthGrant, Fault> {
    let invalid = |reason: String| Fault::local(codes::AUTH_RESPONSE_INVALID, reason);

    let body: AuthResponseBody = payload
        .parse()
        .map_err(|e| invalid(format!("unexpected {} content: {}", payload.name, e)))?;

    let token = body
        .auth_token
        .into_iter()
        .next()
        .map(|node| node.content)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| invalid("auth response carries no token".to_string()))?;

    // Lifetime is a number of milliseconds, some server versions quote it
    let lifetime_ms = match &body.lifetime {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
    .ok_or_else(|| invalid(format!("invalid token lifetime: {}", body.lifetime)))?;

    Ok(AuthGrant { token, lifetime_ms })
}

#[derive(Deserialize)]
struct AccountResponseBody {
    #[serde(default)]
    account: Vec<AccountNode>,
}

#[derive(Deserialize)]
struct AccountNode {
    name: Option<String>,
    id: Option<String>,
    #[serde(default)]
    a: Vec<AttributeNode>,
}

#[derive(Deserialize)]
struct AttributeNode {
    n: String,
    #[serde(rename = "_content", default)]
    content: String,
}

/// Read a `GetAccountResponse` payload.
pub fn parse_account_response(address: &str, payload: &ResponsePayload) -> Result<AccountInfo, Fault> {
    let body: AccountResponseBody = payload.parse().map_err(|e| {
        Fault::malformed(200, format!("unexpected {} content: {}", payload.name, e))
    })?;

    let account = body
        .account
        .into_iter()
        .next()
        .ok_or_else(|| Fault::malformed(200, "account lookup returned no account"))?;

    let status = account
        .a
        .into_iter()
        .find(|attr| attr.n == ACCOUNT_STATUS_ATTR)
        .map(|attr| attr.content)
        .unwrap_or_default();

    Ok(AccountInfo {
        address: account.name.unwrap_or_else(|| address.to_string()),
        id: account.id,
        status,
    })
}
