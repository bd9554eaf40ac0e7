//! Connection manager error types

use thiserror::Error;

use crate::provider::Provider;

#[derive(Debug, Error)]
pub enum ConnectError {
    /// CSRF state returned by the provider does not match the stored value.
    /// The flow is aborted and no connection record is created or mutated.
    #[error("OAuth state mismatch for {provider}")]
    StateMismatch { provider: Provider },

    /// The provider returned no authorization code (consent denied or the
    /// callback carried an error parameter).
    #[error("authorization code missing for {provider}: {reason}")]
    MissingCode { provider: Provider, reason: String },

    /// Token refresh failed. The stored token is left untouched; the
    /// connection is temporarily unusable and callers should fall back.
    #[error("token refresh failed for {provider}: {message}")]
    TokenRefresh { provider: Provider, message: String },

    /// Remote call failed after a valid token was obtained.
    #[error("{provider} API error (status {status}): {message}")]
    ProviderApi {
        provider: Provider,
        status: u16,
        message: String,
    },

    /// Incremental sync cursor rejected by the provider after the one
    /// permitted full-resync retry already ran.
    #[error("sync cursor invalidated for {provider}")]
    SyncCursorInvalidated { provider: Provider },

    /// No linked or primary connection was usable for the operation.
    #[error("no usable {provider} connection")]
    NoUsableConnection { provider: Provider },

    #[error("connection not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ConnectResult<T> = Result<T, ConnectError>;

impl ConnectError {
    /// True when the failure is a third-party outage/rejection rather than a
    /// local bug, i.e. the cases where callers degrade to a placeholder
    /// instead of failing the parent workflow.
    pub fn is_provider_failure(&self) -> bool {
        matches!(
            self,
            ConnectError::TokenRefresh { .. }
                | ConnectError::ProviderApi { .. }
                | ConnectError::NoUsableConnection { .. }
                | ConnectError::Http(_)
        )
    }
}
