//! Provider adapters
//!
//! Each adapter wraps the connection manager with provider-specific request
//! shaping. The shared pattern is always: resolve a usable connection,
//! ensure a valid token, shape the payload, call, map the response. When a
//! feature is optional, the adapter degrades to a locally generated
//! placeholder instead of failing the outer operation.

pub mod calendar;
pub mod financial;
pub mod meetings;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::ConnectResult;
use crate::provider::Provider;
use crate::store::ExternalConnection;

/// Handle to a resource created on the provider side.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteResourceHandle {
    /// Provider-side identifier (event id, meeting id, import batch id).
    pub external_id: String,
    /// User-facing URL when the provider supplies one.
    pub url: Option<String>,
}

/// Capability interface over provider-specific resource creation: calendar
/// event, meeting, or import batch, depending on the adapter.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    async fn create_remote_resource(
        &self,
        connection: &ExternalConnection,
        payload: serde_json::Value,
    ) -> ConnectResult<RemoteResourceHandle>;
}

pub use calendar::{CalendarAdapter, CalendarEvent, EventPayload, EventSync, SyncOptions};
pub use financial::{
    FinancialAdapter, ImportSummary, ImportedTransaction, InMemoryTransactionStore,
    PgTransactionStore, TransactionQuery, TransactionStore,
};
pub use meetings::{MeetingAdapter, MeetingLink, MeetingRequest};
