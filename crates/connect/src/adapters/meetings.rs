//! Meeting adapter (Zoom)
//!
//! Meeting creation is an enhancement to scheduling, never a gate: when no
//! usable connection exists or the provider call fails, the adapter falls
//! back to a locally generated meeting link so the caller's flow completes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ProviderAdapter, RemoteResourceHandle};
use crate::cache::{service_token_ttl, TokenCache};
use crate::error::{ConnectError, ConnectResult};
use crate::manager::ConnectionManager;
use crate::provider::Provider;
use crate::store::ExternalConnection;
use flowdesk_shared::{ConnectionId, UserId};

/// Base for locally generated fallback links.
pub const SYNTHETIC_LINK_BASE: &str = "https://meet.flowdesk.app";

/// Fields for a meeting to schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub topic: String,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    pub duration_minutes: u32,
    #[serde(default)]
    pub agenda: Option<String>,
}

/// A joinable meeting link, real or synthetic.
#[derive(Debug, Clone, Serialize)]
pub struct MeetingLink {
    pub join_url: String,
    /// Provider meeting id; `None` for synthetic links.
    pub external_id: Option<String>,
    /// True when the link was generated locally instead of by the provider.
    pub synthetic: bool,
}

pub struct MeetingAdapter {
    manager: Arc<ConnectionManager>,
    cache: Arc<dyn TokenCache>,
}

impl MeetingAdapter {
    pub fn new(manager: Arc<ConnectionManager>, cache: Arc<dyn TokenCache>) -> Self {
        Self { manager, cache }
    }

    /// Create a meeting for the user, resolving their Zoom connection and
    /// degrading to a synthetic link on any failure.
    pub async fn create_meeting(
        &self,
        user: UserId,
        preferred: Option<ConnectionId>,
        request: &MeetingRequest,
    ) -> ConnectResult<MeetingLink> {
        let connection = self
            .manager
            .resolve_connection(user, Provider::Zoom, preferred)
            .await?;

        let Some(connection) = connection else {
            tracing::debug!(user_id = %user, "No Zoom connection; issuing synthetic link");
            return Ok(synthetic_link());
        };

        match self.create_on_connection(&connection, request).await {
            Ok(link) => Ok(link),
            Err(e) if e.is_provider_failure() => {
                tracing::warn!(
                    user_id = %user,
                    conn_id = %connection.id,
                    error = %e,
                    "Meeting creation failed; issuing synthetic link"
                );
                Ok(synthetic_link())
            }
            Err(e) => Err(e),
        }
    }

    /// Create a meeting on a specific connection. Unlike `create_meeting`
    /// this surfaces provider failures to the caller.
    pub async fn create_on_connection(
        &self,
        connection: &ExternalConnection,
        request: &MeetingRequest,
    ) -> ConnectResult<MeetingLink> {
        let token = self.manager.ensure_valid_token(connection).await?;
        self.post_meeting(&token, request).await
    }

    /// Create a meeting using the server-to-server account grant instead of
    /// a user connection. The service token is cached with a TTL haircut so
    /// the cached copy expires before the provider-side one.
    pub async fn create_service_meeting(
        &self,
        account_id: &str,
        request: &MeetingRequest,
    ) -> ConnectResult<MeetingLink> {
        let token = self.service_token(account_id).await?;
        self.post_meeting(&token, request).await
    }

    async fn service_token(&self, account_id: &str) -> ConnectResult<String> {
        let key = format!("zoom:service:{}", account_id);
        if let Some(token) = self.cache.get(&key).await? {
            return Ok(token);
        }

        let client = self.manager.client(Provider::Zoom)?;
        let response = client.service_token(Some(account_id)).await?;
        let ttl = service_token_ttl(response.expires_in.unwrap_or(3600));
        self.cache.put(&key, &response.access_token, ttl).await?;
        Ok(response.access_token)
    }

    async fn post_meeting(
        &self,
        token: &str,
        request: &MeetingRequest,
    ) -> ConnectResult<MeetingLink> {
        let base = &self.manager.client(Provider::Zoom)?.endpoints().api_base_url;
        let url = format!("{}/users/me/meetings", base);

        let start_time = request
            .start_time
            .format(&Rfc3339)
            .map_err(|e| ConnectError::Config(format!("timestamp format: {}", e)))?;
        let body = serde_json::json!({
            "topic": request.topic,
            "type": 2,
            "start_time": start_time,
            "duration": request.duration_minutes,
            "agenda": request.agenda,
        });

        let response = self
            .manager
            .http()
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectError::ProviderApi {
                provider: Provider::Zoom,
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let created: serde_json::Value = response.json().await?;
        let join_url = created
            .get("join_url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectError::ProviderApi {
                provider: Provider::Zoom,
                status: status.as_u16(),
                message: "meeting response missing join_url".into(),
            })?
            .to_owned();

        // Zoom meeting ids are numeric.
        let external_id = created.get("id").map(|v| match v.as_str() {
            Some(s) => s.to_owned(),
            None => v.to_string(),
        });

        Ok(MeetingLink {
            join_url,
            external_id,
            synthetic: false,
        })
    }
}

/// Locally generated meeting link, used when the provider path is closed.
fn synthetic_link() -> MeetingLink {
    MeetingLink {
        join_url: format!("{}/{}", SYNTHETIC_LINK_BASE, Uuid::new_v4()),
        external_id: None,
        synthetic: true,
    }
}

#[async_trait]
impl ProviderAdapter for MeetingAdapter {
    fn provider(&self) -> Provider {
        Provider::Zoom
    }

    async fn create_remote_resource(
        &self,
        connection: &ExternalConnection,
        payload: serde_json::Value,
    ) -> ConnectResult<RemoteResourceHandle> {
        let request: MeetingRequest = serde_json::from_value(payload)
            .map_err(|e| ConnectError::Config(format!("bad meeting payload: {}", e)))?;
        let link = self.create_on_connection(connection, &request).await?;
        Ok(RemoteResourceHandle {
            external_id: link.external_id.unwrap_or_else(|| link.join_url.clone()),
            url: Some(link.join_url),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::InMemoryTokenCache;
    use crate::oauth::OAuthConfig;
    use crate::state::InMemoryStateStore;
    use crate::store::{ConnectionStore, InMemoryConnectionStore, UpsertConnection};

    fn request() -> MeetingRequest {
        MeetingRequest {
            topic: "Quarterly review".into(),
            start_time: OffsetDateTime::now_utc() + time::Duration::days(1),
            duration_minutes: 45,
            agenda: None,
        }
    }

    async fn setup(server: &mockito::Server) -> (MeetingAdapter, Arc<InMemoryConnectionStore>) {
        let store = Arc::new(InMemoryConnectionStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let mut manager = ConnectionManager::new(store.clone(), states).unwrap();

        let mut config = OAuthConfig::new(Provider::Zoom, "cid", "secret", "https://app.test/cb");
        config.endpoints.api_base_url = server.url();
        config.endpoints.token_url = format!("{}/token", server.url());
        manager.register(Provider::Zoom, config);

        let cache = Arc::new(InMemoryTokenCache::new());
        (MeetingAdapter::new(Arc::new(manager), cache), store)
    }

    async fn connect_zoom(store: &InMemoryConnectionStore, user: UserId) -> ExternalConnection {
        store
            .upsert(UpsertConnection {
                user_id: user,
                provider: Provider::Zoom,
                provider_account_id: "zoom-acct".into(),
                display_email: None,
                access_token: "at-live".into(),
                refresh_token: None,
                token_expires_at: None,
                is_primary: true,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn no_connection_yields_synthetic_link() {
        let server = mockito::Server::new_async().await;
        let (adapter, _) = setup(&server).await;

        let link = adapter
            .create_meeting(UserId::new(), None, &request())
            .await
            .unwrap();

        assert!(link.synthetic);
        assert!(link.join_url.starts_with(SYNTHETIC_LINK_BASE));
        assert_eq!(link.external_id, None);
    }

    #[tokio::test]
    async fn provider_failure_yields_synthetic_link() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, store) = setup(&server).await;
        let user = UserId::new();
        connect_zoom(&store, user).await;

        server
            .mock("POST", "/users/me/meetings")
            .with_status(503)
            .create_async()
            .await;

        let link = adapter.create_meeting(user, None, &request()).await.unwrap();
        assert!(link.synthetic);
    }

    #[tokio::test]
    async fn successful_creation_returns_provider_link() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, store) = setup(&server).await;
        let user = UserId::new();
        connect_zoom(&store, user).await;

        let mock = server
            .mock("POST", "/users/me/meetings")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":81234567890,"join_url":"https://zoom.us/j/81234567890"}"#)
            .create_async()
            .await;

        let link = adapter.create_meeting(user, None, &request()).await.unwrap();

        assert!(!link.synthetic);
        assert_eq!(link.join_url, "https://zoom.us/j/81234567890");
        assert_eq!(link.external_id.as_deref(), Some("81234567890"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn service_token_is_fetched_once_and_cached() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, _) = setup(&server).await;

        let token = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"svc-token","expires_in":3600}"#)
            .expect(1)
            .create_async()
            .await;
        let meetings = server
            .mock("POST", "/users/me/meetings")
            .match_header("authorization", "Bearer svc-token")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":1,"join_url":"https://zoom.us/j/1"}"#)
            .expect(2)
            .create_async()
            .await;

        for _ in 0..2 {
            let link = adapter
                .create_service_meeting("acct-main", &request())
                .await
                .unwrap();
            assert!(!link.synthetic);
        }
        token.assert_async().await;
        meetings.assert_async().await;
    }
}
