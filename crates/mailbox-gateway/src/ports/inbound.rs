//! Inbound (driving) port: what the rest of the application calls.

use crate::domain::error::GatewayResult;
use crate::domain::principal::Principal;
use crate::domain::token::SessionToken;
use crate::envelope::ResponsePayload;
use async_trait::async_trait;
use serde_json::value::RawValue;

/// Authenticated access to the mailbox server.
///
/// Every method returns either the decoded response payload or a terminal
/// [`Fault`](crate::domain::error::Fault); token handling, recovery and
/// circuit breaking happen behind it.
#[async_trait]
pub trait MailboxApi: Send + Sync {
    /// Call `request_name` on the user endpoint as `principal`.
    async fn call_as_user(
        &self,
        principal: &Principal,
        request_name: &str,
        content: Box<RawValue>,
    ) -> GatewayResult<ResponsePayload>;

    /// Call `request_name` on the administrative endpoint as the service account.
    async fn call_as_admin(
        &self,
        request_name: &str,
        content: Box<RawValue>,
    ) -> GatewayResult<ResponsePayload>;

    /// Return a usable token for `principal`, logging in if needed.
    async fn get_valid_token(&self, principal: &Principal) -> GatewayResult<SessionToken>;
}
