//! TTL cache port for process-wide service tokens
//!
//! Server-to-server bearer tokens (one per integration, shared by every
//! operation) are cached with a TTL shorter than the provider's actual
//! expiry. Concurrent reads are safe; a population race just refetches the
//! same token, which is idempotent.

use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;

use crate::error::ConnectResult;

/// Seconds shaved off a provider-reported expiry when caching a service
/// token, so the cached copy always dies before the real one.
pub const SERVICE_TOKEN_TTL_HAIRCUT_SECS: i64 = 60;

/// Compute the cache TTL for a token the provider says lives `expires_in`
/// seconds. Never below one minute so a clock hiccup cannot thrash.
pub fn service_token_ttl(expires_in: i64) -> Duration {
    let secs = (expires_in - SERVICE_TOKEN_TTL_HAIRCUT_SECS).max(60);
    Duration::from_secs(secs as u64)
}

#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> ConnectResult<Option<String>>;

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> ConnectResult<()>;
}

/// In-process cache; suitable for single-node deployments and tests.
#[derive(Default)]
pub struct InMemoryTokenCache {
    entries: tokio::sync::Mutex<std::collections::HashMap<String, (String, OffsetDateTime)>>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn get(&self, key: &str) -> ConnectResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > OffsetDateTime::now_utc() => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> ConnectResult<()> {
        let expires_at = OffsetDateTime::now_utc() + ttl;
        self.entries
            .lock()
            .await
            .insert(key.to_owned(), (value.to_owned(), expires_at));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_live_entries_only() {
        let cache = InMemoryTokenCache::new();
        cache
            .put("zoom:service", "token-1", Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(
            cache.get("zoom:service").await.unwrap().as_deref(),
            Some("token-1")
        );

        cache
            .put("zoom:service", "token-2", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(cache.get("zoom:service").await.unwrap(), None);
    }

    #[test]
    fn ttl_is_haircut_below_provider_expiry() {
        assert_eq!(service_token_ttl(3600), Duration::from_secs(3540));
        // Floor of one minute for pathologically short expiries.
        assert_eq!(service_token_ttl(30), Duration::from_secs(60));
    }
}
