//! Financial adapter (QuickBooks, Xero)
//!
//! Pulls transactions from a connected accounting provider and lands them
//! locally keyed by provider reference, so re-running an import window is
//! idempotent: already-seen transactions count as duplicates, never as new
//! rows.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{ProviderAdapter, RemoteResourceHandle};
use crate::error::{ConnectError, ConnectResult};
use crate::manager::ConnectionManager;
use crate::provider::{Provider, ProviderKind};
use crate::store::ExternalConnection;
use flowdesk_shared::{Money, UserId};

/// Time window to import.
#[derive(Debug, Clone, Copy)]
pub struct TransactionQuery {
    pub start: OffsetDateTime,
    pub end: OffsetDateTime,
}

/// One transaction as landed locally. `external_ref` embeds the provider so
/// the same upstream id from two providers never collides.
#[derive(Debug, Clone, Serialize)]
pub struct ImportedTransaction {
    pub external_ref: String,
    pub description: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub posted_at: Option<OffsetDateTime>,
}

/// Counters for one import run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub fetched: usize,
    pub imported: usize,
    pub duplicates: usize,
}

/// Persistence port for imported transactions.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert unless a row with the same `(user, external_ref)` exists.
    /// Returns whether a row was inserted.
    async fn upsert_by_external_ref(
        &self,
        user: UserId,
        transaction: &ImportedTransaction,
    ) -> ConnectResult<bool>;
}

pub struct PgTransactionStore {
    pool: sqlx::PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn upsert_by_external_ref(
        &self,
        user: UserId,
        transaction: &ImportedTransaction,
    ) -> ConnectResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO imported_transactions
                (id, user_id, external_ref, description, amount_cents, currency,
                 posted_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (user_id, external_ref) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.0)
        .bind(&transaction.external_ref)
        .bind(&transaction.description)
        .bind(transaction.amount.cents())
        .bind(&transaction.currency)
        .bind(transaction.posted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| ConnectError::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

/// In-process store; suitable for tests.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    rows: tokio::sync::Mutex<Vec<(UserId, ImportedTransaction)>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_for(&self, user: UserId) -> usize {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|(owner, _)| *owner == user)
            .count()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn upsert_by_external_ref(
        &self,
        user: UserId,
        transaction: &ImportedTransaction,
    ) -> ConnectResult<bool> {
        let mut rows = self.rows.lock().await;
        let exists = rows
            .iter()
            .any(|(owner, row)| *owner == user && row.external_ref == transaction.external_ref);
        if exists {
            return Ok(false);
        }
        rows.push((user, transaction.clone()));
        Ok(true)
    }
}

pub struct FinancialAdapter {
    manager: Arc<ConnectionManager>,
    transactions: Arc<dyn TransactionStore>,
    provider: Provider,
}

impl FinancialAdapter {
    pub fn new(
        manager: Arc<ConnectionManager>,
        transactions: Arc<dyn TransactionStore>,
        provider: Provider,
    ) -> ConnectResult<Self> {
        if provider.kind() != ProviderKind::Accounting {
            return Err(ConnectError::Config(format!(
                "{} is not a financial provider",
                provider
            )));
        }
        Ok(Self {
            manager,
            transactions,
            provider,
        })
    }

    /// Fetch transactions in the window and land them locally. Re-running
    /// the same window only bumps the duplicate counter.
    pub async fn import_transactions(
        &self,
        connection: &ExternalConnection,
        query: TransactionQuery,
    ) -> ConnectResult<ImportSummary> {
        let fetched = self.fetch_transactions(connection, query).await?;

        let mut summary = ImportSummary {
            fetched: fetched.len(),
            ..ImportSummary::default()
        };
        for transaction in &fetched {
            if self
                .transactions
                .upsert_by_external_ref(connection.user_id, transaction)
                .await?
            {
                summary.imported += 1;
            } else {
                summary.duplicates += 1;
            }
        }

        tracing::info!(
            conn_id = %connection.id,
            provider = %self.provider,
            fetched = summary.fetched,
            imported = summary.imported,
            duplicates = summary.duplicates,
            "Imported transactions"
        );
        Ok(summary)
    }

    async fn fetch_transactions(
        &self,
        connection: &ExternalConnection,
        query: TransactionQuery,
    ) -> ConnectResult<Vec<ImportedTransaction>> {
        let token = self.manager.ensure_valid_token(connection).await?;
        let base = &self.manager.client(self.provider)?.endpoints().api_base_url;
        let url = format!("{}/transactions", base);

        let response = self
            .manager
            .http()
            .get(&url)
            .bearer_auth(&token)
            .query(&[
                ("start", format_rfc3339(query.start)?),
                ("end", format_rfc3339(query.end)?),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectError::ProviderApi {
                provider: self.provider,
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let body: serde_json::Value = response.json().await?;
        let items = body
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| self.parse_transaction(item))
            .collect())
    }

    fn parse_transaction(&self, item: &serde_json::Value) -> Option<ImportedTransaction> {
        let external_id = item.get("id")?.as_str()?;
        // Provider amounts are decimal currency units.
        let amount = item.get("amount")?.as_f64()?;
        let cents = (amount * 100.0).round() as i64;

        Some(ImportedTransaction {
            external_ref: format!("{}:{}", self.provider, external_id),
            description: item
                .get("description")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            amount: Money::from_cents(cents),
            currency: item
                .get("currency")
                .and_then(|v| v.as_str())
                .unwrap_or("USD")
                .to_owned(),
            posted_at: item
                .get("posted_at")
                .and_then(|v| v.as_str())
                .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok()),
        })
    }
}

fn format_rfc3339(at: OffsetDateTime) -> ConnectResult<String> {
    at.format(&Rfc3339)
        .map_err(|e| ConnectError::Config(format!("timestamp format: {}", e)))
}

#[async_trait]
impl ProviderAdapter for FinancialAdapter {
    fn provider(&self) -> Provider {
        self.provider
    }

    /// Runs an import over the window in the payload and returns a handle
    /// for the batch.
    async fn create_remote_resource(
        &self,
        connection: &ExternalConnection,
        payload: serde_json::Value,
    ) -> ConnectResult<RemoteResourceHandle> {
        let start = payload
            .get("start")
            .and_then(|v| v.as_str())
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .ok_or_else(|| ConnectError::Config("bad import payload: start".into()))?;
        let end = payload
            .get("end")
            .and_then(|v| v.as_str())
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .ok_or_else(|| ConnectError::Config("bad import payload: end".into()))?;

        let summary = self
            .import_transactions(connection, TransactionQuery { start, end })
            .await?;
        Ok(RemoteResourceHandle {
            external_id: format!("import-{}-{}", self.provider, summary.imported),
            url: None,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::oauth::OAuthConfig;
    use crate::state::InMemoryStateStore;
    use crate::store::{ConnectionStore, InMemoryConnectionStore, UpsertConnection};

    async fn setup(
        server: &mockito::Server,
    ) -> (
        FinancialAdapter,
        Arc<InMemoryTransactionStore>,
        ExternalConnection,
    ) {
        let store = Arc::new(InMemoryConnectionStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let mut manager = ConnectionManager::new(store.clone(), states).unwrap();

        let mut config =
            OAuthConfig::new(Provider::QuickBooks, "cid", "secret", "https://app.test/cb");
        config.endpoints.api_base_url = server.url();
        config.endpoints.token_url = format!("{}/token", server.url());
        manager.register(Provider::QuickBooks, config);

        let connection = store
            .upsert(UpsertConnection {
                user_id: UserId::new(),
                provider: Provider::QuickBooks,
                provider_account_id: "realm-1".into(),
                display_email: None,
                access_token: "at-live".into(),
                refresh_token: None,
                token_expires_at: None,
                is_primary: true,
            })
            .await
            .unwrap();

        let transactions = Arc::new(InMemoryTransactionStore::new());
        let adapter = FinancialAdapter::new(
            Arc::new(manager),
            transactions.clone(),
            Provider::QuickBooks,
        )
        .unwrap();
        (adapter, transactions, connection)
    }

    fn window() -> TransactionQuery {
        TransactionQuery {
            start: OffsetDateTime::now_utc() - time::Duration::days(30),
            end: OffsetDateTime::now_utc(),
        }
    }

    const TWO_TRANSACTIONS: &str = r#"{"transactions":[
        {"id":"txn-1","amount":120.50,"currency":"USD","description":"Invoice 1001",
         "posted_at":"2026-08-15T00:00:00Z"},
        {"id":"txn-2","amount":-19.99,"currency":"USD","description":"Refund"}
    ]}"#;

    #[tokio::test]
    async fn import_lands_transactions_with_provider_scoped_refs() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, transactions, connection) = setup(&server).await;

        server
            .mock("GET", "/transactions")
            .match_query(mockito::Matcher::Regex("start=".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TWO_TRANSACTIONS)
            .create_async()
            .await;

        let summary = adapter
            .import_transactions(&connection, window())
            .await
            .unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                fetched: 2,
                imported: 2,
                duplicates: 0
            }
        );
        assert_eq!(transactions.count_for(connection.user_id).await, 2);
    }

    #[tokio::test]
    async fn repeat_import_counts_duplicates_not_new_rows() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, transactions, connection) = setup(&server).await;

        server
            .mock("GET", "/transactions")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(TWO_TRANSACTIONS)
            .expect(2)
            .create_async()
            .await;

        adapter
            .import_transactions(&connection, window())
            .await
            .unwrap();
        let second = adapter
            .import_transactions(&connection, window())
            .await
            .unwrap();

        assert_eq!(
            second,
            ImportSummary {
                fetched: 2,
                imported: 0,
                duplicates: 2
            }
        );
        assert_eq!(transactions.count_for(connection.user_id).await, 2);
    }

    #[tokio::test]
    async fn amounts_round_to_cents() {
        let mut server = mockito::Server::new_async().await;
        let (adapter, transactions, connection) = setup(&server).await;

        server
            .mock("GET", "/transactions")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"transactions":[{"id":"txn-3","amount":10.005}]}"#)
            .create_async()
            .await;

        adapter
            .import_transactions(&connection, window())
            .await
            .unwrap();

        let rows = transactions.rows.lock().await;
        assert_eq!(rows[0].1.amount, Money::from_cents(1001));
        assert_eq!(rows[0].1.external_ref, "quickbooks:txn-3");
    }

    #[tokio::test]
    async fn non_financial_provider_is_rejected() {
        let store = Arc::new(InMemoryConnectionStore::new());
        let states = Arc::new(InMemoryStateStore::new());
        let manager = Arc::new(ConnectionManager::new(store, states).unwrap());

        let err = FinancialAdapter::new(
            manager,
            Arc::new(InMemoryTransactionStore::new()),
            Provider::Zoom,
        )
        .err();
        assert!(matches!(err, Some(ConnectError::Config(_))));
    }
}
