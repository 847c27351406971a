//! Fallback account provisioner.

use crate::domain::principal::Principal;
use crate::ports::outbound::AccountProvisioner;
use async_trait::async_trait;

/// Used when no synchronization subsystem is wired in: provisioning always
/// fails, so a missing account surfaces as a terminal fault.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredProvisioner;

#[async_trait]
impl AccountProvisioner for UnconfiguredProvisioner {
    async fn provision(&self, principal: &Principal) -> anyhow::Result<()> {
        anyhow::bail!("no account provisioner configured for {}", principal.address())
    }
}
