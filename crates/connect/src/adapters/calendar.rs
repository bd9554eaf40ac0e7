//! Calendar adapter (Google Calendar)
//!
//! Event creation/deletion and incremental event sync. Sync follows the
//! provider cursor contract: with a stored `sync_token` the request carries
//! only the cursor (no time filters); a provider-reported invalid cursor
//! clears it and retries exactly once as a full sync over an explicit time
//! window.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{ProviderAdapter, RemoteResourceHandle};
use crate::error::{ConnectError, ConnectResult};
use crate::manager::ConnectionManager;
use crate::provider::Provider;
use crate::store::ExternalConnection;

/// Default full-sync window: 7 days behind, 60 days ahead.
pub const DEFAULT_SYNC_DAYS_BACK: i64 = 7;
pub const DEFAULT_SYNC_DAYS_AHEAD: i64 = 60;

/// Options for one sync call.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Ignore any stored cursor and sync the full window.
    pub full_sync: bool,
    pub days_back: i64,
    pub days_ahead: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            full_sync: false,
            days_back: DEFAULT_SYNC_DAYS_BACK,
            days_ahead: DEFAULT_SYNC_DAYS_AHEAD,
        }
    }
}

/// Event fields sent to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub summary: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
    #[serde(default)]
    pub attendee_emails: Vec<String>,
    /// Meeting link appended to the event location when present.
    #[serde(default)]
    pub meeting_url: Option<String>,
}

/// Provider event mapped into internal fields.
#[derive(Debug, Clone, Serialize)]
pub struct CalendarEvent {
    pub external_id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    /// `None` for all-day events, which carry a date but no instant.
    pub start: Option<OffsetDateTime>,
    pub end: Option<OffsetDateTime>,
    pub status: Option<String>,
    pub meeting_url: Option<String>,
}

/// Result of one sync call.
#[derive(Debug, Clone)]
pub struct EventSync {
    pub events: Vec<CalendarEvent>,
    /// Cursor for the next incremental sync, already persisted.
    pub sync_token: Option<String>,
    /// Whether this call ran as a full-window sync.
    pub full_sync: bool,
}

#[derive(Clone)]
pub struct CalendarAdapter {
    manager: Arc<ConnectionManager>,
}

impl CalendarAdapter {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }

    fn api_base(&self) -> ConnectResult<String> {
        Ok(self
            .manager
            .client(Provider::GoogleCalendar)?
            .endpoints()
            .api_base_url
            .clone())
    }

    /// Create an event on the connected calendar.
    pub async fn create_event(
        &self,
        connection: &ExternalConnection,
        payload: &EventPayload,
    ) -> ConnectResult<RemoteResourceHandle> {
        let token = self.manager.ensure_valid_token(connection).await?;
        let url = format!("{}/calendars/primary/events", self.api_base()?);

        let body = serde_json::json!({
            "summary": payload.summary,
            "description": payload.description,
            "location": payload.meeting_url,
            "start": { "dateTime": format_rfc3339(payload.start)? },
            "end": { "dateTime": format_rfc3339(payload.end)? },
            "attendees": payload
                .attendee_emails
                .iter()
                .map(|email| serde_json::json!({ "email": email }))
                .collect::<Vec<_>>(),
        });

        let response = self
            .manager
            .http()
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(provider_error(status.as_u16(), response).await);
        }

        let created: serde_json::Value = response.json().await?;
        let external_id = created
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ConnectError::ProviderApi {
                provider: Provider::GoogleCalendar,
                status: status.as_u16(),
                message: "event response missing id".into(),
            })?
            .to_owned();

        tracing::info!(
            conn_id = %connection.id,
            event_id = %external_id,
            "Created calendar event"
        );

        Ok(RemoteResourceHandle {
            external_id,
            url: created
                .get("htmlLink")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
        })
    }

    /// Delete an event. Already-gone events count as success.
    pub async fn delete_event(
        &self,
        connection: &ExternalConnection,
        external_id: &str,
    ) -> ConnectResult<()> {
        let token = self.manager.ensure_valid_token(connection).await?;
        let url = format!(
            "{}/calendars/primary/events/{}",
            self.api_base()?,
            external_id
        );

        let response = self
            .manager
            .http()
            .delete(&url)
            .bearer_auth(&token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status.as_u16() == 404 || status.as_u16() == 410 {
            return Ok(());
        }
        Err(provider_error(status.as_u16(), response).await)
    }

    /// Fetch changed events since the last sync.
    ///
    /// With a stored cursor (and no full-sync override) the request sends
    /// only the cursor. If the provider reports the cursor invalid, the
    /// cursor is cleared and the call retries exactly once as a full sync;
    /// a second rejection surfaces as `SyncCursorInvalidated`.
    pub async fn list_events(
        &self,
        connection: &ExternalConnection,
        options: SyncOptions,
    ) -> ConnectResult<EventSync> {
        let token = self.manager.ensure_valid_token(connection).await?;

        let cursor = if options.full_sync {
            None
        } else {
            connection.sync_token.clone()
        };

        if let Some(cursor) = cursor {
            match self.fetch_window(&token, Some(&cursor), options).await {
                Ok(mut sync) => {
                    self.persist_cursor(connection, sync.sync_token.as_deref())
                        .await?;
                    sync.full_sync = false;
                    return Ok(sync);
                }
                Err(ConnectError::SyncCursorInvalidated { .. }) => {
                    tracing::warn!(
                        conn_id = %connection.id,
                        "Sync cursor invalidated; falling back to one full sync"
                    );
                    self.manager
                        .store()
                        .update_sync_token(connection.id, None)
                        .await?;
                    // Fall through to the single full-sync retry below.
                }
                Err(other) => return Err(other),
            }
        }

        let mut sync = self.fetch_window(&token, None, options).await?;
        self.persist_cursor(connection, sync.sync_token.as_deref())
            .await?;
        sync.full_sync = true;
        Ok(sync)
    }

    async fn persist_cursor(
        &self,
        connection: &ExternalConnection,
        cursor: Option<&str>,
    ) -> ConnectResult<()> {
        if cursor.is_some() {
            self.manager
                .store()
                .update_sync_token(connection.id, cursor)
                .await?;
        }
        Ok(())
    }

    /// One sync pass, following pagination to the end. Cursor mode sends
    /// only the cursor; full mode sends the explicit time window.
    async fn fetch_window(
        &self,
        token: &str,
        cursor: Option<&str>,
        options: SyncOptions,
    ) -> ConnectResult<EventSync> {
        let url = format!("{}/calendars/primary/events", self.api_base()?);
        let now = OffsetDateTime::now_utc();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;
        let next_sync_token;

        loop {
            let mut params: Vec<(&str, String)> = Vec::new();
            match cursor {
                Some(cursor) => params.push(("syncToken", cursor.to_owned())),
                None => {
                    params.push((
                        "timeMin",
                        format_rfc3339(now - time::Duration::days(options.days_back))?,
                    ));
                    params.push((
                        "timeMax",
                        format_rfc3339(now + time::Duration::days(options.days_ahead))?,
                    ));
                    params.push(("singleEvents", "true".to_owned()));
                }
            }
            if let Some(ref page) = page_token {
                params.push(("pageToken", page.clone()));
            }

            let response = self
                .manager
                .http()
                .get(&url)
                .bearer_auth(token)
                .query(&params)
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 410 {
                return Err(ConnectError::SyncCursorInvalidated {
                    provider: Provider::GoogleCalendar,
                });
            }
            if !status.is_success() {
                return Err(provider_error(status.as_u16(), response).await);
            }

            let body: serde_json::Value = response.json().await?;
            if let Some(items) = body.get("items").and_then(|v| v.as_array()) {
                events.extend(items.iter().filter_map(parse_event));
            }

            match body.get("nextPageToken").and_then(|v| v.as_str()) {
                Some(next_page) => page_token = Some(next_page.to_owned()),
                None => {
                    next_sync_token = body
                        .get("nextSyncToken")
                        .and_then(|v| v.as_str())
                        .map(str::to_owned);
                    break;
                }
            }
        }

        Ok(EventSync {
            events,
            sync_token: next_sync_token,
            full_sync: cursor.is_none(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for CalendarAdapter {
    fn provider(&self) -> Provider {
        Provider::GoogleCalendar
    }

    async fn create_remote_resource(
        &self,
        connection: &ExternalConnection,
        payload: serde_json::Value,
    ) -> ConnectResult<RemoteResourceHandle> {
        let payload: EventPayload = serde_json::from_value(payload)
            .map_err(|e| ConnectError::Config(format!("bad event payload: {}", e)))?;
        self.create_event(connection, &payload).await
    }
}

fn format_rfc3339(at: OffsetDateTime) -> ConnectResult<String> {
    at.format(&Rfc3339)
        .map_err(|e| ConnectError::Config(format!("timestamp format: {}", e)))
}

fn parse_instant(value: Option<&serde_json::Value>) -> Option<OffsetDateTime> {
    value
        .and_then(|v| v.get("dateTime"))
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
}

fn parse_event(item: &serde_json::Value) -> Option<CalendarEvent> {
    let external_id = item.get("id")?.as_str()?.to_owned();
    Some(CalendarEvent {
        external_id,
        summary: item
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        description: item
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        start: parse_instant(item.get("start")),
        end: parse_instant(item.get("end")),
        status: item
            .get("status")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
        meeting_url: item
            .get("hangoutLink")
            .and_then(|v| v.as_str())
            .map(str::to_owned),
    })
}

async fn provider_error(status: u16, response: reqwest::Response) -> ConnectError {
    ConnectError::ProviderApi {
        provider: Provider::GoogleCalendar,
        status,
        message: response.text().await.unwrap_or_default(),
    }
}
