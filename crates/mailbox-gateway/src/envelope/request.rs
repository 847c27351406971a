use super::{AuthContext, Endpoint, RequestEnvelope, WireRequest};
use crate::domain::error::Fault;
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::BTreeMap;

const CONTEXT_NAMESPACE: &str = "urn:zimbra";
const RESPONSE_FORMAT: &str = "js";

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(rename = "Header")]
    header: Header<'a>,
    #[serde(rename = "Body")]
    body: BTreeMap<&'a str, &'a RawValue>,
}

#[derive(Serialize)]
struct Header<'a> {
    context: Context<'a>,
    format: Format,
}

#[derive(Serialize)]
struct Context<'a> {
    #[serde(rename = "_jsns")]
    namespace: &'static str,
    #[serde(rename = "authToken", skip_serializing_if = "Option::is_none")]
    auth_token: Option<&'a str>,
    #[serde(rename = "_content", skip_serializing_if = "Option::is_none")]
    content: Option<[NoSession; 1]>,
}

#[derive(Serialize)]
struct NoSession {
    nosession: Empty,
}

#[derive(Serialize)]
struct Empty {}

#[derive(Serialize)]
struct Format {
    #[serde(rename = "type")]
    kind: &'static str,
}

/// Encode an envelope for `endpoint`.
pub fn encode(envelope: &RequestEnvelope, endpoint: Endpoint) -> Result<WireRequest, Fault> {
    let token = match &envelope.auth {
        AuthContext::NoSession => None,
        AuthContext::Session(token) => Some(token.value()),
    };

    let context = Context {
        namespace: CONTEXT_NAMESPACE,
        auth_token: token,
        content: token.is_none().then(|| [NoSession { nosession: Empty {} }]),
    };

    let mut body = BTreeMap::new();
    body.insert(envelope.name.as_str(), envelope.content.as_ref());

    let wire = Envelope {
        header: Header {
            context,
            format: Format {
                kind: RESPONSE_FORMAT,
            },
        },
        body,
    };

    let body = serde_json::to_string(&wire)
        .map_err(|e| Fault::internal(format!("cannot encode {}: {}", envelope.name, e)))?;

    Ok(WireRequest {
        endpoint,
        name: envelope.name.clone(),
        body,
        session_cookie: token.map(str::to_string),
    })
}

/// Turn any serializable value into an opaque request payload.
pub fn to_content<T: Serialize>(value: &T) -> Result<Box<RawValue>, Fault> {
    serde_json::value::to_raw_value(value)
        .map_err(|e| Fault::internal(format!("cannot serialize request content: {}", e)))
}
