//! Fault classification.
//!
//! Maps a fault to the single recovery action the coordinator may take.
//! Both functions are pure; the account lookup they depend on is performed by
//! the caller and its result handed to [`resolve_account_check`].
//!
//! ```text
//! service.AUTH_EXPIRED ─┐
//! service.AUTH_REQUIRED ┴──► re-authenticate (same principal kind) ──► resend
//!
//! account.AUTH_FAILED (user) ──► look up account
//!        ├── account.NO_SUCH_ACCOUNT ──► provision ──► resend
//!        ├── exists, not active      ──► terminal (gateway.ACCOUNT_INACTIVE)
//!        ├── exists, active          ──► terminal (gateway.ACCOUNT_REJECTED)
//!        └── lookup failed otherwise ──► terminal (lookup fault)
//!
//! anything else ──► terminal
//! ```

use crate::domain::account::AccountInfo;
use crate::domain::error::{codes, Fault};
use crate::domain::principal::PrincipalKind;
use serde::Serialize;
use std::fmt;

/// Recovery action prescribed for a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    ReauthenticateThenRetry,
    ReauthenticateAsAdminThenRetry,
    ProvisionAccountThenRetry,
    Terminal,
}

impl RecoveryAction {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryAction::Terminal)
    }
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecoveryAction::ReauthenticateThenRetry => "reauthenticate",
            RecoveryAction::ReauthenticateAsAdminThenRetry => "reauthenticate-admin",
            RecoveryAction::ProvisionAccountThenRetry => "provision",
            RecoveryAction::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Outcome of looking at a fault on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The action is known without further I/O
    Immediate(RecoveryAction),
    /// The account must be looked up before deciding
    NeedsAccountCheck,
}

/// Classify a fault raised by a call made as a principal of `kind`.
pub fn classify(fault: &Fault, kind: PrincipalKind) -> Classification {
    match fault.code.as_str() {
        codes::AUTH_EXPIRED | codes::AUTH_REQUIRED => Classification::Immediate(match kind {
            PrincipalKind::User => RecoveryAction::ReauthenticateThenRetry,
            PrincipalKind::Admin => RecoveryAction::ReauthenticateAsAdminThenRetry,
        }),
        // Bad service account credentials are not fixed by provisioning
        codes::AUTH_FAILED if kind == PrincipalKind::User => Classification::NeedsAccountCheck,
        _ => Classification::Immediate(RecoveryAction::Terminal),
    }
}

/// Decide what to do after the account lookup following `account.AUTH_FAILED`.
///
/// Returns the provisioning action, or the terminal fault to surface. A
/// lookup that fails for any other reason surfaces its own fault, so an
/// unreachable admin endpoint stays distinguishable from a refused login.
pub fn resolve_account_check(
    original: &Fault,
    address: &str,
    lookup: &Result<AccountInfo, Fault>,
) -> Result<RecoveryAction, Fault> {
    match lookup {
        Err(fault) if fault.is_code(codes::NO_SUCH_ACCOUNT) => {
            Ok(RecoveryAction::ProvisionAccountThenRetry)
        }
        Err(fault) => Err(fault.clone()),
        Ok(info) if !info.is_active() => Err(Fault::account_inactive(address, &info.status)),
        Ok(_) => Err(Fault::local(
            codes::ACCOUNT_REJECTED,
            format!(
                "Auth failed for {} with active account: {}",
                address, original.message
            ),
        )),
    }
}
