//! Envelope codec for the mailbox server's JSON SOAP dialect.
//!
//! ```text
//! Request:
//!   Header.context: { _jsns: "urn:zimbra", authToken: <token> | _content: [{nosession: {}}] }
//!   Header.format:  { type: "js" }
//!   Body: { <RequestName>: <content> }
//!
//! Response:
//!   Body: { <RequestName>Response: <result> }
//!   Body: { Fault: { Reason: { Text }, Detail: { Error: { Code } } } }
//! ```
//!
//! Business payloads travel as [`RawValue`]: the codec never looks inside
//! them, it only places them in (or lifts them out of) the `Body`.

mod request;
mod response;

pub use request::{encode, to_content};
pub use response::{decode, parse_auth_response, parse_account_response, AuthGrant};

use crate::domain::token::SessionToken;
use bytes::Bytes;
use serde_json::value::RawValue;
use std::fmt;

/// Name of the cookie that carries the session token alongside the header.
pub const SESSION_COOKIE: &str = "ZM_AUTH_TOKEN";

/// Which SOAP endpoint a request goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `<base_uri>/service/soap`
    User,
    /// The administrative endpoint
    Admin,
}

impl Endpoint {
    /// Circuit breaker target for this endpoint.
    pub fn target(&self) -> &'static str {
        match self {
            Endpoint::User => "soap",
            Endpoint::Admin => "soap-admin",
        }
    }
}

/// Authentication context placed in the envelope header.
#[derive(Debug, Clone)]
pub enum AuthContext {
    /// Used for the login call itself
    NoSession,
    Session(SessionToken),
}

/// A request about to be encoded. Built fresh for every attempt.
#[derive(Debug)]
pub struct RequestEnvelope {
    pub name: String,
    pub content: Box<RawValue>,
    pub auth: AuthContext,
}

impl RequestEnvelope {
    pub fn new(name: impl Into<String>, content: Box<RawValue>, auth: AuthContext) -> Self {
        Self {
            name: name.into(),
            content,
            auth,
        }
    }
}

/// Encoded request handed to the transport.
#[derive(Clone)]
pub struct WireRequest {
    pub endpoint: Endpoint,
    /// Request name, kept for logging
    pub name: String,
    /// Serialized JSON envelope
    pub body: String,
    /// Token to send as the session cookie
    pub session_cookie: Option<String>,
}

impl fmt::Debug for WireRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireRequest")
            .field("endpoint", &self.endpoint)
            .field("name", &self.name)
            .field("body_len", &self.body.len())
            .field("has_session", &self.session_cookie.is_some())
            .finish()
    }
}

/// Raw response as returned by the transport.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub body: Bytes,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Successful response body entry.
#[derive(Debug, Clone)]
pub struct ResponsePayload {
    /// Body key, e.g. `GetInfoResponse`
    pub name: String,
    pub content: Box<RawValue>,
}

impl ResponsePayload {
    /// Deserialize the content into a caller type.
    pub fn parse<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(self.content.get())
    }
}

/// Decoded response.
#[derive(Debug, Clone)]
pub enum ResponseOutcome {
    Success(ResponsePayload),
    Fault(crate::domain::error::Fault),
}

impl ResponseOutcome {
    pub fn into_result(self) -> Result<ResponsePayload, crate::domain::error::Fault> {
        match self {
            ResponseOutcome::Success(payload) => Ok(payload),
            ResponseOutcome::Fault(fault) => Err(fault),
        }
    }
}
