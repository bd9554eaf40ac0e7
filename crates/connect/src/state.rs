//! CSRF state tokens for the authorization flow
//!
//! One state token is issued per `(user, provider)` when authorization
//! begins, then consumed single-use on the callback. `take` removes the
//! stored value regardless of whether the comparison later succeeds, so a
//! failed callback cannot be replayed against the same token.

use async_trait::async_trait;
use flowdesk_shared::UserId;
use rand::RngCore;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::{ConnectError, ConnectResult};
use crate::provider::Provider;

/// Authorization attempts older than this are abandoned.
pub const STATE_TTL_MINUTES: i64 = 10;

/// Generate a cryptographically random state token (32 bytes, hex).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Session-side storage for in-flight authorization state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a state token, replacing any in-flight attempt for the same
    /// user and provider.
    async fn put(&self, user: UserId, provider: Provider, state: &str) -> ConnectResult<()>;

    /// Remove and return the stored token. Expired entries return `None`.
    async fn take(&self, user: UserId, provider: Provider) -> ConnectResult<Option<String>>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> ConnectResult<u64>;
}

/// In-process state store for single-node deployments and tests.
#[derive(Default)]
pub struct InMemoryStateStore {
    entries: tokio::sync::Mutex<
        std::collections::HashMap<(UserId, Provider), (String, OffsetDateTime)>,
    >,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, user: UserId, provider: Provider, state: &str) -> ConnectResult<()> {
        let expires_at = OffsetDateTime::now_utc() + time::Duration::minutes(STATE_TTL_MINUTES);
        self.entries
            .lock()
            .await
            .insert((user, provider), (state.to_owned(), expires_at));
        Ok(())
    }

    async fn take(&self, user: UserId, provider: Provider) -> ConnectResult<Option<String>> {
        let entry = self.entries.lock().await.remove(&(user, provider));
        Ok(entry.and_then(|(state, expires_at)| {
            if expires_at > OffsetDateTime::now_utc() {
                Some(state)
            } else {
                None
            }
        }))
    }

    async fn purge_expired(&self) -> ConnectResult<u64> {
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

/// Database-backed state store for multi-node deployments where the callback
/// may land on a different process than the one that began authorization.
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn put(&self, user: UserId, provider: Provider, state: &str) -> ConnectResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_states (user_id, provider, state, expires_at)
            VALUES ($1, $2, $3, NOW() + make_interval(mins => $4))
            ON CONFLICT (user_id, provider)
            DO UPDATE SET state = EXCLUDED.state, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(user.0)
        .bind(provider.as_str())
        .bind(state)
        .bind(STATE_TTL_MINUTES as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(())
    }

    async fn take(&self, user: UserId, provider: Provider) -> ConnectResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            DELETE FROM oauth_states
            WHERE user_id = $1 AND provider = $2 AND expires_at > NOW()
            RETURNING state
            "#,
        )
        .bind(user.0)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(row.map(|(state,)| state))
    }

    async fn purge_expired(&self) -> ConnectResult<u64> {
        let result = sqlx::query("DELETE FROM oauth_states WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn generated_states_are_unique_and_long() {
        let a = generate_state();
        let b = generate_state();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = InMemoryStateStore::new();
        let user = UserId::new();

        store
            .put(user, Provider::GoogleCalendar, "state-1")
            .await
            .unwrap();

        let first = store.take(user, Provider::GoogleCalendar).await.unwrap();
        assert_eq!(first.as_deref(), Some("state-1"));

        let second = store.take(user, Provider::GoogleCalendar).await.unwrap();
        assert_eq!(second, None, "state must not be reusable");
    }

    #[tokio::test]
    async fn states_are_scoped_per_provider() {
        let store = InMemoryStateStore::new();
        let user = UserId::new();

        store
            .put(user, Provider::GoogleCalendar, "cal-state")
            .await
            .unwrap();
        store.put(user, Provider::Zoom, "zoom-state").await.unwrap();

        assert_eq!(
            store.take(user, Provider::Zoom).await.unwrap().as_deref(),
            Some("zoom-state")
        );
        assert_eq!(
            store
                .take(user, Provider::GoogleCalendar)
                .await
                .unwrap()
                .as_deref(),
            Some("cal-state")
        );
    }

    #[tokio::test]
    async fn replacing_a_state_invalidates_the_old_one() {
        let store = InMemoryStateStore::new();
        let user = UserId::new();

        store.put(user, Provider::Zoom, "old").await.unwrap();
        store.put(user, Provider::Zoom, "new").await.unwrap();

        assert_eq!(
            store.take(user, Provider::Zoom).await.unwrap().as_deref(),
            Some("new")
        );
    }
}
