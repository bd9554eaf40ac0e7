//! Environment-driven OAuth configuration
//!
//! Each provider is configured through `{PREFIX}_CLIENT_ID` /
//! `{PREFIX}_CLIENT_SECRET` (prefixes: `GOOGLE_CALENDAR`, `ZOOM`,
//! `QUICKBOOKS`, `XERO`, `STRIPE_CONNECT`). Providers with no credentials in
//! the environment are simply not registered; calls against them fail with a
//! configuration error instead of a broken redirect.

use crate::error::{ConnectError, ConnectResult};
use crate::oauth::OAuthConfig;
use crate::provider::Provider;

/// Env var holding the public base URL callbacks are registered under.
pub const REDIRECT_BASE_VAR: &str = "OAUTH_REDIRECT_BASE";

/// All providers this build knows how to talk to.
pub const ALL_PROVIDERS: [Provider; 5] = [
    Provider::GoogleCalendar,
    Provider::Zoom,
    Provider::QuickBooks,
    Provider::Xero,
    Provider::Stripe,
];

/// Resolved configuration for every provider with credentials present.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub providers: Vec<(Provider, OAuthConfig)>,
}

impl ConnectConfig {
    /// Read provider credentials from the environment.
    ///
    /// `OAUTH_REDIRECT_BASE` is required; per-provider credentials are
    /// optional and control which providers get registered.
    pub fn from_env() -> ConnectResult<Self> {
        let redirect_base = std::env::var(REDIRECT_BASE_VAR)
            .map_err(|_| ConnectError::Config(format!("{} must be set", REDIRECT_BASE_VAR)))?;

        let mut providers = Vec::new();
        for provider in ALL_PROVIDERS {
            let prefix = provider.env_prefix();
            let client_id = std::env::var(format!("{}_CLIENT_ID", prefix));
            let client_secret = std::env::var(format!("{}_CLIENT_SECRET", prefix));

            match (client_id, client_secret) {
                (Ok(id), Ok(secret)) => {
                    providers.push((
                        provider,
                        OAuthConfig::new(provider, id, secret, redirect_uri(&redirect_base, provider)),
                    ));
                }
                _ => {
                    tracing::debug!(
                        provider = %provider,
                        "No OAuth credentials in environment; provider not registered"
                    );
                }
            }
        }

        Ok(Self { providers })
    }
}

/// Callback URL for one provider under the public base.
pub fn redirect_uri(base: &str, provider: Provider) -> String {
    format!("{}/oauth/{}/callback", base.trim_end_matches('/'), provider)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_is_provider_scoped() {
        assert_eq!(
            redirect_uri("https://app.flowdesk.io/", Provider::GoogleCalendar),
            "https://app.flowdesk.io/oauth/google_calendar/callback"
        );
        assert_eq!(
            redirect_uri("https://app.flowdesk.io", Provider::Zoom),
            "https://app.flowdesk.io/oauth/zoom/callback"
        );
    }
}
