//! Session tokens issued by the mailbox server.

use crate::domain::principal::Principal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque, time-limited credential obtained through a login.
///
/// A token is usable until `refresh_at_ms`, which sits a safety margin before
/// the server-declared expiry so that a call never races the real deadline.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    value: String,
    /// Address the token was issued for
    pub address: String,
    /// Issued by the administrative login
    pub admin: bool,
    pub issued_at_ms: u64,
    /// Server-declared expiry
    pub expires_at_ms: u64,
    /// After this instant the token is treated as absent
    pub refresh_at_ms: u64,
}

impl SessionToken {
    /// Build a token from a login response.
    ///
    /// The margin is capped at half the lifetime so a short-lived token is
    /// still usable for a while after issue.
    pub fn issue(
        value: impl Into<String>,
        principal: &Principal,
        now_ms: u64,
        lifetime_ms: u64,
        margin: Duration,
    ) -> Self {
        let margin_ms = (margin.as_millis() as u64).min(lifetime_ms / 2);
        let expires_at_ms = now_ms.saturating_add(lifetime_ms);
        Self {
            value: value.into(),
            address: principal.address().to_string(),
            admin: principal.is_admin(),
            issued_at_ms: now_ms,
            expires_at_ms,
            refresh_at_ms: expires_at_ms.saturating_sub(margin_ms),
        }
    }

    /// Raw token value for the envelope header. Never log this.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms < self.refresh_at_ms
    }

    /// Remaining usable time, zero once stale.
    pub fn remaining(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.refresh_at_ms.saturating_sub(now_ms))
    }

    /// Whether this token was issued for `principal`: same address, same
    /// login kind.
    pub fn matches(&self, principal: &Principal) -> bool {
        self.address == principal.address() && self.admin == principal.is_admin()
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("value", &"<redacted>")
            .field("address", &self.address)
            .field("admin", &self.admin)
            .field("expires_at_ms", &self.expires_at_ms)
            .field("refresh_at_ms", &self.refresh_at_ms)
            .finish()
    }
}
