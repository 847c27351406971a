//! Bounded recovery for faulted calls.
//!
//! ```text
//!   attempt ──ok──► done
//!      │
//!    fault ──► classify ──terminal──► fault
//!                 │
//!                 ├── reauthenticate ──► invalidate token ─┐
//!                 └── account check ──► provision ─────────┤
//!                                                          ▼
//!                                                   final attempt ──► done | fault
//! ```
//!
//! [`RecoveryCoordinator::drive`] is the only place that decides whether a
//! call is attempted again, and it does so at most once.

use crate::domain::account::AccountInfo;
use crate::domain::classifier::{self, Classification, RecoveryAction};
use crate::domain::error::{codes, Fault};
use crate::domain::principal::Principal;
use crate::middleware::GatewayMetrics;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// The unit of work the coordinator retries, plus the side effects recovery
/// actions need.
#[async_trait]
pub trait AttemptRunner: Send + Sync {
    type Output: Send;

    /// Resolve a token (cache or login) and send the request once.
    async fn attempt(&self, principal: &Principal) -> Result<Self::Output, Fault>;

    /// Drop the cached token so the next attempt logs in again.
    async fn invalidate(&self, principal: &Principal);

    async fn lookup_account(&self, address: &str) -> Result<AccountInfo, Fault>;

    async fn provision(&self, principal: &Principal) -> anyhow::Result<()>;
}

pub struct RecoveryCoordinator {
    metrics: Arc<GatewayMetrics>,
}

impl RecoveryCoordinator {
    pub fn new(metrics: Arc<GatewayMetrics>) -> Self {
        Self { metrics }
    }

    /// Run `runner` for `principal`, recovering from at most one fault.
    pub async fn drive<R>(&self, runner: &R, principal: &Principal) -> Result<R::Output, Fault>
    where
        R: AttemptRunner + ?Sized,
    {
        let fault = match runner.attempt(principal).await {
            Ok(output) => return Ok(output),
            Err(fault) => fault,
        };

        let action = match classifier::classify(&fault, principal.kind()) {
            Classification::Immediate(action) => action,
            Classification::NeedsAccountCheck => {
                let lookup = runner.lookup_account(principal.address()).await;
                match classifier::resolve_account_check(&fault, principal.address(), &lookup) {
                    Ok(action) => action,
                    Err(terminal) => {
                        warn!(principal = %principal, code = %terminal.code, "Login refused for existing account");
                        return Err(terminal);
                    }
                }
            }
        };

        match action {
            RecoveryAction::Terminal => return Err(fault),
            RecoveryAction::ReauthenticateThenRetry | RecoveryAction::ReauthenticateAsAdminThenRetry => {
                runner.invalidate(principal).await;
            }
            RecoveryAction::ProvisionAccountThenRetry => {
                self.metrics.record_provisioning();
                info!(principal = %principal, "Account missing on mailbox server, provisioning");
                if let Err(e) = runner.provision(principal).await {
                    warn!(principal = %principal, error = %e, "Provisioning failed");
                    return Err(Fault::local(
                        codes::PROVISIONING_FAILED,
                        format!("Could not provision {}: {}", principal.address(), e),
                    ));
                }
            }
        }

        self.metrics.record_recovery();
        warn!(
            principal = %principal,
            code = %fault.code,
            action = %action,
            "Recovered from fault, resending once"
        );

        runner.attempt(principal).await
    }
}
