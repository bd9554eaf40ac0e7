//! Connection lifecycle manager
//!
//! Owns the per-connection token state machine:
//! `Disconnected -> Connecting (state issued) -> Connected -> [Refreshing]
//! -> Connected | Expired -> Disconnected`. Persistence and session state go
//! through the injected `ConnectionStore` / `StateStore` ports; provider
//! HTTP goes through one `OAuthClient` per registered provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use flowdesk_shared::{ConnectionId, UserId};
use reqwest::Url;
use time::OffsetDateTime;

use crate::error::{ConnectError, ConnectResult};
use crate::oauth::{OAuthClient, OAuthConfig, PROVIDER_TIMEOUT_SECS};
use crate::provider::Provider;
use crate::state::{generate_state, StateStore};
use crate::store::{ConnectionStore, ExternalConnection, UpsertConnection};

pub struct ConnectionManager {
    store: Arc<dyn ConnectionStore>,
    states: Arc<dyn StateStore>,
    clients: HashMap<Provider, OAuthClient>,
    http: reqwest::Client,
}

impl ConnectionManager {
    pub fn new(
        store: Arc<dyn ConnectionStore>,
        states: Arc<dyn StateStore>,
    ) -> ConnectResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
            .build()
            .map_err(|e| ConnectError::Config(format!("http client: {}", e)))?;

        Ok(Self {
            store,
            states,
            clients: HashMap::new(),
            http,
        })
    }

    /// Register OAuth credentials for a provider. Unregistered providers
    /// fail with a configuration error rather than a broken redirect.
    pub fn register(&mut self, provider: Provider, config: OAuthConfig) {
        self.clients
            .insert(provider, OAuthClient::new(provider, config, self.http.clone()));
    }

    pub fn client(&self, provider: Provider) -> ConnectResult<&OAuthClient> {
        self.clients
            .get(&provider)
            .ok_or_else(|| ConnectError::Config(format!("provider {} not configured", provider)))
    }

    pub fn store(&self) -> &Arc<dyn ConnectionStore> {
        &self.store
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start the authorization flow: issue a CSRF state token and build the
    /// provider redirect URL. No connection record is created yet.
    pub async fn begin_authorization(
        &self,
        user: UserId,
        provider: Provider,
    ) -> ConnectResult<Url> {
        let client = self.client(provider)?;
        let state = generate_state();
        self.states.put(user, provider, &state).await?;

        let url = client.authorization_url(&state)?;
        tracing::info!(
            user_id = %user,
            provider = %provider,
            "Issued authorization redirect"
        );
        Ok(url)
    }

    /// Finish the authorization flow on the provider callback.
    ///
    /// The stored state is consumed before anything else, so a failed
    /// callback can never be replayed. No connection record is created or
    /// mutated unless the exchange fully succeeds.
    pub async fn complete_authorization(
        &self,
        user: UserId,
        provider: Provider,
        returned_state: Option<&str>,
        code: Option<&str>,
        error_param: Option<&str>,
    ) -> ConnectResult<ExternalConnection> {
        let client = self.client(provider)?;

        // Single-use: cleared regardless of how the rest of the flow goes.
        let stored_state = self.states.take(user, provider).await?;
        match (stored_state.as_deref(), returned_state) {
            (Some(stored), Some(returned)) if stored == returned => {}
            _ => {
                tracing::warn!(
                    user_id = %user,
                    provider = %provider,
                    "OAuth state mismatch; aborting flow"
                );
                return Err(ConnectError::StateMismatch { provider });
            }
        }

        let code = match (code, error_param) {
            (_, Some(error)) => {
                return Err(ConnectError::MissingCode {
                    provider,
                    reason: error.to_owned(),
                });
            }
            (None, None) => {
                return Err(ConnectError::MissingCode {
                    provider,
                    reason: "no authorization code returned".into(),
                });
            }
            (Some(code), None) => code,
        };

        let token = client.exchange_code(code).await?;
        let identity = client.fetch_identity(&token.access_token).await?;

        let token_expires_at = token
            .expires_in
            .map(|secs| OffsetDateTime::now_utc() + time::Duration::seconds(secs));

        // First connection for a provider wins primacy; single-connection
        // providers are always primary since the store keeps only one row.
        let is_primary =
            provider.single_connection() || !self.store.has_primary(user, provider).await?;

        let connection = self
            .store
            .upsert(UpsertConnection {
                user_id: user,
                provider,
                provider_account_id: identity.account_id,
                display_email: identity.email,
                access_token: token.access_token,
                refresh_token: token.refresh_token,
                token_expires_at,
                is_primary,
            })
            .await?;

        tracing::info!(
            user_id = %user,
            provider = %provider,
            conn_id = %connection.id,
            is_primary = connection.is_primary,
            "Connected external account"
        );

        Ok(connection)
    }

    /// Return a token valid for at least the provider's safety margin,
    /// refreshing proactively when the stored one is about to expire.
    ///
    /// Not expiring: zero network calls, the stored token comes back as is.
    /// Refresh failure: the stored token is left untouched and the caller
    /// must treat the connection as unusable for this call (fall back, do
    /// not retry inline).
    ///
    /// Two callers racing a refresh may both hit the refresh endpoint; the
    /// store keeps whichever lands last. Providers accept the prior token
    /// for a grace period, so this soft race is tolerated rather than
    /// serialized per connection.
    pub async fn ensure_valid_token(
        &self,
        connection: &ExternalConnection,
    ) -> ConnectResult<String> {
        let provider = connection.provider;

        let Some(expires_at) = connection.token_expires_at else {
            // Non-expiring token; nothing to do.
            return Ok(connection.access_token.clone());
        };

        let margin = provider.refresh_safety_margin();
        if expires_at - margin > OffsetDateTime::now_utc() {
            return Ok(connection.access_token.clone());
        }

        let refresh_token =
            connection
                .refresh_token
                .as_deref()
                .ok_or_else(|| ConnectError::TokenRefresh {
                    provider,
                    message: "token expired and no refresh token stored".into(),
                })?;

        let client = self.client(provider)?;
        let refreshed =
            client
                .refresh(refresh_token)
                .await
                .map_err(|e| ConnectError::TokenRefresh {
                    provider,
                    message: e.to_string(),
                })?;

        let new_expires_at = refreshed
            .expires_in
            .map(|secs| OffsetDateTime::now_utc() + time::Duration::seconds(secs));

        self.store
            .update_tokens(
                connection.id,
                &refreshed.access_token,
                refreshed.refresh_token.as_deref(),
                new_expires_at,
            )
            .await?;

        tracing::info!(
            conn_id = %connection.id,
            provider = %provider,
            rotated_refresh = refreshed.refresh_token.is_some(),
            "Refreshed access token"
        );

        Ok(refreshed.access_token)
    }

    /// Best-effort remote revocation. Failure is logged and swallowed: the
    /// user-visible contract is "stop using my account", not "the provider
    /// must acknowledge".
    pub async fn revoke(&self, connection: &ExternalConnection) -> bool {
        let client = match self.client(connection.provider) {
            Ok(client) => client,
            Err(_) => return false,
        };

        match client.revoke(&connection.access_token).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    conn_id = %connection.id,
                    provider = %connection.provider,
                    error = %e,
                    "Remote token revocation failed; disconnecting locally anyway"
                );
                false
            }
        }
    }

    /// Delete the local record, preceded by best-effort remote revocation.
    /// Local disconnection proceeds regardless of the remote outcome.
    pub async fn disconnect(&self, connection: &ExternalConnection) -> ConnectResult<()> {
        let revoked = self.revoke(connection).await;
        self.store.delete(connection.id).await?;

        tracing::info!(
            conn_id = %connection.id,
            provider = %connection.provider,
            remote_revoked = revoked,
            "Disconnected external account"
        );
        Ok(())
    }

    /// Resolve the connection an operation should use: the one already
    /// linked to the entity when it still exists and belongs to the caller,
    /// otherwise the user's primary connection for the provider.
    pub async fn resolve_connection(
        &self,
        user: UserId,
        provider: Provider,
        preferred: Option<ConnectionId>,
    ) -> ConnectResult<Option<ExternalConnection>> {
        if let Some(id) = preferred {
            if let Some(connection) = self.store.find(id).await? {
                if connection.user_id == user && connection.provider == provider {
                    return Ok(Some(connection));
                }
                tracing::warn!(
                    conn_id = %id,
                    user_id = %user,
                    provider = %provider,
                    "Linked connection does not match caller; falling back to primary"
                );
            }
        }

        self.store.primary_for(user, provider).await
    }

    /// Like `resolve_connection`, for callers that cannot degrade without a
    /// connection.
    pub async fn require_connection(
        &self,
        user: UserId,
        provider: Provider,
        preferred: Option<ConnectionId>,
    ) -> ConnectResult<ExternalConnection> {
        self.resolve_connection(user, provider, preferred)
            .await?
            .ok_or(ConnectError::NoUsableConnection { provider })
    }
}
