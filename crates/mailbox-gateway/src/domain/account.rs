//! Remote account record returned by the existence check.

use serde::{Deserialize, Serialize};

/// Status value the server reports for a usable account.
pub const ACTIVE_STATUS: &str = "active";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Mailbox address the lookup was made for
    pub address: String,
    /// Server-side account id, when reported
    pub id: Option<String>,
    /// Value of the account status attribute (`active`, `locked`, `closed`, ...)
    pub status: String,
}

impl AccountInfo {
    pub fn is_active(&self) -> bool {
        self.status == ACTIVE_STATUS
    }
}
