//! Per-principal token cache over a pluggable [`TokenStore`].
//!
//! The cache re-checks every token against the clock and the principal it is
//! asked for, so a store that keeps entries past their TTL (or a shared store
//! holding another process's tokens) cannot hand out an unusable token.
//! Store failures degrade to cache misses.

use crate::domain::principal::Principal;
use crate::domain::token::SessionToken;
use crate::middleware::GatewayMetrics;
use crate::ports::outbound::{TimeSource, TokenStore};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TokenCache {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn TimeSource>,
    metrics: Arc<GatewayMetrics>,
}

impl TokenCache {
    pub fn new(
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn TimeSource>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// Usable token for `principal`, if one is cached.
    pub async fn get(&self, principal: &Principal) -> Option<SessionToken> {
        let found = match self.store.get(principal.id()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(principal = %principal, error = %e, "Token store read failed, treating as miss");
                None
            }
        };

        let now = self.now_millis();
        let usable = found.filter(|token| {
            let usable = token.matches(principal) && token.is_fresh(now);
            if !usable {
                debug!(principal = %principal, "Cached token stale or issued for another principal");
            }
            usable
        });

        self.metrics.record_cache(usable.is_some());
        usable
    }

    /// Store a freshly issued token. Stale tokens are not stored.
    pub async fn put(&self, principal: &Principal, token: SessionToken) {
        let ttl = token.remaining(self.now_millis());
        if ttl.is_zero() {
            debug!(principal = %principal, "Not caching token already past its refresh instant");
            return;
        }
        if let Err(e) = self.store.put(principal.id(), token, ttl).await {
            warn!(principal = %principal, error = %e, "Token store write failed");
        }
    }

    pub async fn invalidate(&self, principal: &Principal) {
        if let Err(e) = self.store.remove(principal.id()).await {
            warn!(principal = %principal, error = %e, "Token store remove failed");
        }
    }
}
