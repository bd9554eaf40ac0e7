//! Connection persistence port
//!
//! The manager talks to storage through `ConnectionStore`; persistence
//! mechanics stay an external collaborator. `PgConnectionStore` expects an
//! `external_connections` table with a unique index on
//! `(user_id, provider, provider_account_id)`, plus an `oauth_states` table
//! for `PgStateStore`. `InMemoryConnectionStore` backs tests and single
//! process embedders.

use async_trait::async_trait;
use flowdesk_shared::{ConnectionId, UserId};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ConnectError, ConnectResult};
use crate::provider::Provider;

/// A stored token pair for one user's account at one provider.
#[derive(Debug, Clone)]
pub struct ExternalConnection {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub provider: Provider,
    /// Provider-side account identifier; part of the upsert key.
    pub provider_account_id: String,
    /// Account email (or tenant name) for display only.
    pub display_email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<OffsetDateTime>,
    /// Default connection for this provider when an operation does not
    /// name one explicitly.
    pub is_primary: bool,
    pub sync_enabled: bool,
    /// Opaque incremental-sync cursor issued by the provider.
    pub sync_token: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Fields for creating or refreshing a connection on OAuth callback.
#[derive(Debug, Clone)]
pub struct UpsertConnection {
    pub user_id: UserId,
    pub provider: Provider,
    pub provider_account_id: String,
    pub display_email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expires_at: Option<OffsetDateTime>,
    /// Applied only when the row is newly created; re-authorizing an
    /// existing connection never changes primacy.
    pub is_primary: bool,
}

#[async_trait]
pub trait ConnectionStore: Send + Sync {
    /// Create or refresh a connection keyed by
    /// `(user, provider, provider_account_id)`. For single-connection
    /// providers any sibling row for the same user and provider is replaced.
    async fn upsert(&self, new: UpsertConnection) -> ConnectResult<ExternalConnection>;

    async fn find(&self, id: ConnectionId) -> ConnectResult<Option<ExternalConnection>>;

    async fn list_for_user(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Vec<ExternalConnection>>;

    async fn primary_for(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Option<ExternalConnection>>;

    async fn has_primary(&self, user: UserId, provider: Provider) -> ConnectResult<bool>;

    /// Promote a connection to primary, demoting siblings.
    async fn set_primary(&self, id: ConnectionId) -> ConnectResult<()>;

    /// Persist a refreshed token. `refresh_token` of `None` keeps the stored
    /// one (providers only rotate it sometimes).
    async fn update_tokens(
        &self,
        id: ConnectionId,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<OffsetDateTime>,
    ) -> ConnectResult<()>;

    /// Persist (or clear) the incremental sync cursor.
    async fn update_sync_token(
        &self,
        id: ConnectionId,
        sync_token: Option<&str>,
    ) -> ConnectResult<()>;

    async fn list_sync_enabled(&self, provider: Provider)
        -> ConnectResult<Vec<ExternalConnection>>;

    async fn delete(&self, id: ConnectionId) -> ConnectResult<()>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

type ConnectionRow = (
    Uuid,
    Uuid,
    String,
    String,
    Option<String>,
    String,
    Option<String>,
    Option<OffsetDateTime>,
    bool,
    bool,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
);

const CONNECTION_COLUMNS: &str = "id, user_id, provider, provider_account_id, display_email, \
     access_token, refresh_token, token_expires_at, is_primary, sync_enabled, sync_token, \
     created_at, updated_at";

fn from_row(row: ConnectionRow) -> ConnectResult<ExternalConnection> {
    let (
        id,
        user_id,
        provider,
        provider_account_id,
        display_email,
        access_token,
        refresh_token,
        token_expires_at,
        is_primary,
        sync_enabled,
        sync_token,
        created_at,
        updated_at,
    ) = row;

    let provider = Provider::from_str(&provider)
        .ok_or_else(|| ConnectError::Database(format!("unknown provider in row: {}", provider)))?;

    Ok(ExternalConnection {
        id: ConnectionId(id),
        user_id: UserId(user_id),
        provider,
        provider_account_id,
        display_email,
        access_token,
        refresh_token,
        token_expires_at,
        is_primary,
        sync_enabled,
        sync_token,
        created_at,
        updated_at,
    })
}

#[derive(Clone)]
pub struct PgConnectionStore {
    pool: PgPool,
}

impl PgConnectionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PgConnectionStore {
    async fn upsert(&self, new: UpsertConnection) -> ConnectResult<ExternalConnection> {
        // Single-connection providers keep at most one row per user; a
        // re-auth under a different provider account replaces the old one.
        if new.provider.single_connection() {
            sqlx::query(
                r#"
                DELETE FROM external_connections
                WHERE user_id = $1 AND provider = $2 AND provider_account_id <> $3
                "#,
            )
            .bind(new.user_id.0)
            .bind(new.provider.as_str())
            .bind(&new.provider_account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ConnectError::Database(e.to_string()))?;
        }

        let row: ConnectionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO external_connections (
                user_id, provider, provider_account_id, display_email,
                access_token, refresh_token, token_expires_at, is_primary
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (user_id, provider, provider_account_id)
            DO UPDATE SET
                display_email = EXCLUDED.display_email,
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, external_connections.refresh_token),
                token_expires_at = EXCLUDED.token_expires_at,
                updated_at = NOW()
            RETURNING {}
            "#,
            CONNECTION_COLUMNS
        ))
        .bind(new.user_id.0)
        .bind(new.provider.as_str())
        .bind(&new.provider_account_id)
        .bind(&new.display_email)
        .bind(&new.access_token)
        .bind(&new.refresh_token)
        .bind(new.token_expires_at)
        .bind(new.is_primary)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        from_row(row)
    }

    async fn find(&self, id: ConnectionId) -> ConnectResult<Option<ExternalConnection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM external_connections WHERE id = $1",
            CONNECTION_COLUMNS
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        row.map(from_row).transpose()
    }

    async fn list_for_user(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Vec<ExternalConnection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM external_connections
            WHERE user_id = $1 AND provider = $2
            ORDER BY created_at ASC
            "#,
            CONNECTION_COLUMNS
        ))
        .bind(user.0)
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        rows.into_iter().map(from_row).collect()
    }

    async fn primary_for(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Option<ExternalConnection>> {
        let row: Option<ConnectionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM external_connections
            WHERE user_id = $1 AND provider = $2 AND is_primary = TRUE
            LIMIT 1
            "#,
            CONNECTION_COLUMNS
        ))
        .bind(user.0)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        row.map(from_row).transpose()
    }

    async fn has_primary(&self, user: UserId, provider: Provider) -> ConnectResult<bool> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM external_connections
            WHERE user_id = $1 AND provider = $2 AND is_primary = TRUE
            "#,
        )
        .bind(user.0)
        .bind(provider.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(count.0 > 0)
    }

    async fn set_primary(&self, id: ConnectionId) -> ConnectResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ConnectError::Database(e.to_string()))?;

        let target: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT user_id, provider FROM external_connections WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        let (user_id, provider) = target.ok_or(ConnectError::NotFound)?;

        sqlx::query(
            r#"
            UPDATE external_connections
            SET is_primary = (id = $1), updated_at = NOW()
            WHERE user_id = $2 AND provider = $3
            "#,
        )
        .bind(id.0)
        .bind(user_id)
        .bind(&provider)
        .execute(&mut *tx)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(())
    }

    async fn update_tokens(
        &self,
        id: ConnectionId,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<OffsetDateTime>,
    ) -> ConnectResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE external_connections
            SET access_token = $2,
                refresh_token = COALESCE($3, refresh_token),
                token_expires_at = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(access_token)
        .bind(refresh_token)
        .bind(token_expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ConnectError::NotFound);
        }
        Ok(())
    }

    async fn update_sync_token(
        &self,
        id: ConnectionId,
        sync_token: Option<&str>,
    ) -> ConnectResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE external_connections
            SET sync_token = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(sync_token)
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ConnectError::NotFound);
        }
        Ok(())
    }

    async fn list_sync_enabled(
        &self,
        provider: Provider,
    ) -> ConnectResult<Vec<ExternalConnection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM external_connections
            WHERE provider = $1 AND sync_enabled = TRUE
            ORDER BY updated_at ASC
            "#,
            CONNECTION_COLUMNS
        ))
        .bind(provider.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        rows.into_iter().map(from_row).collect()
    }

    async fn delete(&self, id: ConnectionId) -> ConnectResult<()> {
        sqlx::query("DELETE FROM external_connections WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(())
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
pub struct InMemoryConnectionStore {
    rows: tokio::sync::Mutex<std::collections::HashMap<Uuid, ExternalConnection>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn upsert(&self, new: UpsertConnection) -> ConnectResult<ExternalConnection> {
        let mut rows = self.rows.lock().await;
        let now = OffsetDateTime::now_utc();

        if new.provider.single_connection() {
            rows.retain(|_, c| {
                !(c.user_id == new.user_id
                    && c.provider == new.provider
                    && c.provider_account_id != new.provider_account_id)
            });
        }

        let existing = rows
            .values()
            .find(|c| {
                c.user_id == new.user_id
                    && c.provider == new.provider
                    && c.provider_account_id == new.provider_account_id
            })
            .map(|c| c.id);

        let connection = match existing {
            Some(id) => {
                // Re-auth path: refresh token material, keep primacy and cursor.
                let row = rows.get_mut(&id.0).ok_or(ConnectError::NotFound)?;
                row.display_email = new.display_email;
                row.access_token = new.access_token;
                if new.refresh_token.is_some() {
                    row.refresh_token = new.refresh_token;
                }
                row.token_expires_at = new.token_expires_at;
                row.updated_at = now;
                row.clone()
            }
            None => {
                let connection = ExternalConnection {
                    id: ConnectionId::new(),
                    user_id: new.user_id,
                    provider: new.provider,
                    provider_account_id: new.provider_account_id,
                    display_email: new.display_email,
                    access_token: new.access_token,
                    refresh_token: new.refresh_token,
                    token_expires_at: new.token_expires_at,
                    is_primary: new.is_primary,
                    sync_enabled: true,
                    sync_token: None,
                    created_at: now,
                    updated_at: now,
                };
                rows.insert(connection.id.0, connection.clone());
                connection
            }
        };

        Ok(connection)
    }

    async fn find(&self, id: ConnectionId) -> ConnectResult<Option<ExternalConnection>> {
        Ok(self.rows.lock().await.get(&id.0).cloned())
    }

    async fn list_for_user(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Vec<ExternalConnection>> {
        let rows = self.rows.lock().await;
        let mut matches: Vec<ExternalConnection> = rows
            .values()
            .filter(|c| c.user_id == user && c.provider == provider)
            .cloned()
            .collect();
        matches.sort_by_key(|c| c.created_at);
        Ok(matches)
    }

    async fn primary_for(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Option<ExternalConnection>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|c| c.user_id == user && c.provider == provider && c.is_primary)
            .cloned())
    }

    async fn has_primary(&self, user: UserId, provider: Provider) -> ConnectResult<bool> {
        Ok(self.primary_for(user, provider).await?.is_some())
    }

    async fn set_primary(&self, id: ConnectionId) -> ConnectResult<()> {
        let mut rows = self.rows.lock().await;
        let target = rows.get(&id.0).ok_or(ConnectError::NotFound)?;
        let (user, provider) = (target.user_id, target.provider);

        for row in rows.values_mut() {
            if row.user_id == user && row.provider == provider {
                row.is_primary = row.id == id;
            }
        }
        Ok(())
    }

    async fn update_tokens(
        &self,
        id: ConnectionId,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<OffsetDateTime>,
    ) -> ConnectResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id.0).ok_or(ConnectError::NotFound)?;
        row.access_token = access_token.to_owned();
        if let Some(refresh) = refresh_token {
            row.refresh_token = Some(refresh.to_owned());
        }
        row.token_expires_at = token_expires_at;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn update_sync_token(
        &self,
        id: ConnectionId,
        sync_token: Option<&str>,
    ) -> ConnectResult<()> {
        let mut rows = self.rows.lock().await;
        let row = rows.get_mut(&id.0).ok_or(ConnectError::NotFound)?;
        row.sync_token = sync_token.map(str::to_owned);
        row.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn list_sync_enabled(
        &self,
        provider: Provider,
    ) -> ConnectResult<Vec<ExternalConnection>> {
        let rows = self.rows.lock().await;
        let mut matches: Vec<ExternalConnection> = rows
            .values()
            .filter(|c| c.provider == provider && c.sync_enabled)
            .cloned()
            .collect();
        matches.sort_by_key(|c| c.updated_at);
        Ok(matches)
    }

    async fn delete(&self, id: ConnectionId) -> ConnectResult<()> {
        self.rows.lock().await.remove(&id.0);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn upsert_for(user: UserId, provider: Provider, account: &str) -> UpsertConnection {
        UpsertConnection {
            user_id: user,
            provider,
            provider_account_id: account.to_owned(),
            display_email: Some(format!("{}@example.com", account)),
            access_token: "at-initial".into(),
            refresh_token: Some("rt-initial".into()),
            token_expires_at: Some(OffsetDateTime::now_utc() + time::Duration::hours(1)),
            is_primary: true,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_provider_account() {
        let store = InMemoryConnectionStore::new();
        let user = UserId::new();

        let first = store
            .upsert(upsert_for(user, Provider::GoogleCalendar, "acct-1"))
            .await
            .unwrap();
        let again = store
            .upsert(upsert_for(user, Provider::GoogleCalendar, "acct-1"))
            .await
            .unwrap();
        assert_eq!(first.id, again.id, "same account re-auth updates in place");

        let mut second = upsert_for(user, Provider::GoogleCalendar, "acct-2");
        second.is_primary = false;
        let second = store.upsert(second).await.unwrap();
        assert_ne!(first.id, second.id);

        let all = store
            .list_for_user(user, Provider::GoogleCalendar)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn single_connection_provider_replaces_sibling() {
        let store = InMemoryConnectionStore::new();
        let user = UserId::new();

        store
            .upsert(upsert_for(user, Provider::Zoom, "zoom-acct-1"))
            .await
            .unwrap();
        store
            .upsert(upsert_for(user, Provider::Zoom, "zoom-acct-2"))
            .await
            .unwrap();

        let all = store.list_for_user(user, Provider::Zoom).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].provider_account_id, "zoom-acct-2");
    }

    #[tokio::test]
    async fn reauth_without_refresh_token_keeps_stored_one() {
        let store = InMemoryConnectionStore::new();
        let user = UserId::new();

        store
            .upsert(upsert_for(user, Provider::GoogleCalendar, "acct-1"))
            .await
            .unwrap();

        let mut reauth = upsert_for(user, Provider::GoogleCalendar, "acct-1");
        reauth.access_token = "at-new".into();
        reauth.refresh_token = None;
        let updated = store.upsert(reauth).await.unwrap();

        assert_eq!(updated.access_token, "at-new");
        assert_eq!(updated.refresh_token.as_deref(), Some("rt-initial"));
    }

    #[tokio::test]
    async fn set_primary_demotes_siblings() {
        let store = InMemoryConnectionStore::new();
        let user = UserId::new();

        let first = store
            .upsert(upsert_for(user, Provider::GoogleCalendar, "acct-1"))
            .await
            .unwrap();
        let mut second_req = upsert_for(user, Provider::GoogleCalendar, "acct-2");
        second_req.is_primary = false;
        let second = store.upsert(second_req).await.unwrap();

        store.set_primary(second.id).await.unwrap();

        let promoted = store.find(second.id).await.unwrap().unwrap();
        let demoted = store.find(first.id).await.unwrap().unwrap();
        assert!(promoted.is_primary);
        assert!(!demoted.is_primary);
    }

    #[tokio::test]
    async fn update_sync_token_can_clear_cursor() {
        let store = InMemoryConnectionStore::new();
        let user = UserId::new();

        let conn = store
            .upsert(upsert_for(user, Provider::GoogleCalendar, "acct-1"))
            .await
            .unwrap();

        store
            .update_sync_token(conn.id, Some("cursor-1"))
            .await
            .unwrap();
        store.update_sync_token(conn.id, None).await.unwrap();

        let reloaded = store.find(conn.id).await.unwrap().unwrap();
        assert_eq!(reloaded.sync_token, None);
    }
}
