//! In-process token store.
//!
//! Sharded concurrent map with a deadline per entry. Reads ignore entries
//! past their deadline; [`purge_task`] removes them in the background.

use crate::domain::token::SessionToken;
use crate::ports::outbound::{StoreError, TokenStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct StoredToken {
    token: SessionToken,
    deadline: Instant,
}

/// Statistics for the in-process store
#[derive(Debug, Default)]
pub struct StoreStats {
    pub total_puts: AtomicU64,
    pub total_hits: AtomicU64,
    pub total_misses: AtomicU64,
    pub total_purged: AtomicU64,
}

/// [`TokenStore`] backed by a `DashMap`.
#[derive(Default)]
pub struct InMemoryTokenStore {
    entries: DashMap<String, StoredToken>,
    stats: StoreStats,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries past their deadline. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.deadline > now);
        let removed = before.saturating_sub(self.entries.len());
        self.stats
            .total_purged
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> Result<Option<SessionToken>, StoreError> {
        let found = self
            .entries
            .get(key)
            .filter(|stored| stored.deadline > Instant::now())
            .map(|stored| stored.token.clone());

        let counter = if found.is_some() {
            &self.stats.total_hits
        } else {
            &self.stats.total_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(found)
    }

    async fn put(&self, key: &str, token: SessionToken, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredToken {
                token,
                deadline: Instant::now() + ttl,
            },
        );
        self.stats.total_puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Background task removing stale tokens from the store
pub async fn purge_task(store: Arc<InMemoryTokenStore>, interval: Duration) {
    let mut purge_interval = tokio::time::interval(interval);
    purge_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        purge_interval.tick().await;
        let removed = store.purge_expired();
        if removed > 0 {
            debug!(removed = removed, "Purged expired session tokens");
        }
    }
}
