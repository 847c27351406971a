//! Identities calls are made on behalf of.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which login flow a principal uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrincipalKind {
    /// End user, logs in through pre-authentication
    User,
    /// Privileged service account, logs in with a password
    Admin,
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrincipalKind::User => write!(f, "user"),
            PrincipalKind::Admin => write!(f, "admin"),
        }
    }
}

/// The identity on whose behalf an RPC is made.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Principal {
    User { user_id: String, address: String },
    Admin { account: String },
}

impl Principal {
    /// End user whose mailbox address is `<user_id>@<domain>`.
    pub fn user(user_id: impl Into<String>, domain: &str) -> Self {
        let user_id = user_id.into();
        let address = format!("{}@{}", user_id, domain);
        Principal::User { user_id, address }
    }

    pub fn admin(account: impl Into<String>) -> Self {
        Principal::Admin {
            account: account.into(),
        }
    }

    /// Cache key: the user id, or the admin account name.
    pub fn id(&self) -> &str {
        match self {
            Principal::User { user_id, .. } => user_id,
            Principal::Admin { account } => account,
        }
    }

    /// Login name sent to the server.
    pub fn address(&self) -> &str {
        match self {
            Principal::User { address, .. } => address,
            Principal::Admin { account } => account,
        }
    }

    pub fn kind(&self) -> PrincipalKind {
        match self {
            Principal::User { .. } => PrincipalKind::User,
            Principal::Admin { .. } => PrincipalKind::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.kind() == PrincipalKind::Admin
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.address())
    }
}
