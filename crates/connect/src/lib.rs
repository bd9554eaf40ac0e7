// Connect crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Flowdesk Connect Module
//!
//! Manages OAuth connections to external providers and the adapters built
//! on top of them.
//!
//! ## Features
//!
//! - **Authorization Flow**: single-use CSRF state, code exchange, identity lookup
//! - **Token Lifecycle**: proactive refresh with per-provider safety margins
//! - **Connection Records**: keyed by provider account, first connection wins primacy
//! - **Calendar Sync**: incremental cursor sync with one full-sync fallback
//! - **Meetings**: provider meetings with synthetic-link degradation
//! - **Financial Import**: idempotent transaction landing keyed by provider reference
//! - **Revocation**: best-effort remote revoke, local disconnect always succeeds

pub mod adapters;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod oauth;
pub mod provider;
pub mod state;
pub mod store;

// Adapters
pub use adapters::{
    CalendarAdapter, CalendarEvent, EventPayload, EventSync, FinancialAdapter, ImportSummary,
    ImportedTransaction, InMemoryTransactionStore, MeetingAdapter, MeetingLink, MeetingRequest,
    PgTransactionStore, ProviderAdapter, RemoteResourceHandle, SyncOptions, TransactionQuery,
    TransactionStore,
};

// Cache
pub use cache::{service_token_ttl, InMemoryTokenCache, TokenCache};

// Config
pub use config::{redirect_uri, ConnectConfig};

// Error
pub use error::{ConnectError, ConnectResult};

// Manager
pub use manager::ConnectionManager;

// OAuth
pub use oauth::{OAuthClient, OAuthConfig, ProviderIdentity, TokenResponse};

// Provider
pub use provider::{Provider, ProviderEndpoints, ProviderKind, TokenAuthStyle};

// State
pub use state::{generate_state, InMemoryStateStore, PgStateStore, StateStore};

// Store
pub use store::{
    ConnectionStore, ExternalConnection, InMemoryConnectionStore, PgConnectionStore,
    UpsertConnection,
};

use std::sync::Arc;

use sqlx::PgPool;

/// Main connect service that combines the manager and all adapters
pub struct ConnectService {
    pub manager: Arc<ConnectionManager>,
    pub calendar: CalendarAdapter,
    pub meetings: MeetingAdapter,
    pub quickbooks: FinancialAdapter,
    pub xero: FinancialAdapter,
}

impl ConnectService {
    /// Create a new connect service from environment variables
    pub fn from_env(pool: PgPool) -> ConnectResult<Self> {
        Self::new(ConnectConfig::from_env()?, pool)
    }

    /// Create a new connect service with explicit config
    pub fn new(config: ConnectConfig, pool: PgPool) -> ConnectResult<Self> {
        let store = Arc::new(PgConnectionStore::new(pool.clone()));
        let states = Arc::new(PgStateStore::new(pool.clone()));
        let transactions = Arc::new(PgTransactionStore::new(pool));
        Self::build(config, store, states, transactions)
    }

    /// In-memory variant for tests and single-node tooling
    pub fn new_in_memory(config: ConnectConfig) -> ConnectResult<Self> {
        Self::build(
            config,
            Arc::new(InMemoryConnectionStore::new()),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryTransactionStore::new()),
        )
    }

    fn build(
        config: ConnectConfig,
        store: Arc<dyn ConnectionStore>,
        states: Arc<dyn StateStore>,
        transactions: Arc<dyn TransactionStore>,
    ) -> ConnectResult<Self> {
        let mut manager = ConnectionManager::new(store, states)?;
        for (provider, oauth) in config.providers {
            manager.register(provider, oauth);
        }
        let manager = Arc::new(manager);

        let cache = Arc::new(InMemoryTokenCache::new());
        Ok(Self {
            calendar: CalendarAdapter::new(manager.clone()),
            meetings: MeetingAdapter::new(manager.clone(), cache),
            quickbooks: FinancialAdapter::new(
                manager.clone(),
                transactions.clone(),
                Provider::QuickBooks,
            )?,
            xero: FinancialAdapter::new(manager.clone(), transactions, Provider::Xero)?,
            manager,
        })
    }
}
