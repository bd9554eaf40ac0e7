//! Supported external providers
//!
//! Providers are a closed enum so adding one is a compile-time-checked
//! change, not a new string in a match.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Category of functionality a provider supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Calendar,
    Meeting,
    Accounting,
    Payments,
}

/// Supported external providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    GoogleCalendar,
    Zoom,
    QuickBooks,
    Xero,
    Stripe,
}

/// How a provider's token endpoint expects client credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenAuthStyle {
    /// `client_id` / `client_secret` in the form body.
    Body,
    /// HTTP basic auth header.
    BasicHeader,
}

/// Provider endpoint URLs. Defaults point at the real services; tests
/// override them to target a mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub revoke_url: Option<String>,
    pub identity_url: String,
    pub api_base_url: String,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GoogleCalendar => "google_calendar",
            Provider::Zoom => "zoom",
            Provider::QuickBooks => "quickbooks",
            Provider::Xero => "xero",
            Provider::Stripe => "stripe",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "google_calendar" => Some(Provider::GoogleCalendar),
            "zoom" => Some(Provider::Zoom),
            "quickbooks" => Some(Provider::QuickBooks),
            "xero" => Some(Provider::Xero),
            "stripe" => Some(Provider::Stripe),
            _ => None,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Provider::GoogleCalendar => ProviderKind::Calendar,
            Provider::Zoom => ProviderKind::Meeting,
            Provider::QuickBooks | Provider::Xero => ProviderKind::Accounting,
            Provider::Stripe => ProviderKind::Payments,
        }
    }

    /// Providers that support only one connection per user. A re-auth
    /// replaces the existing record instead of adding a sibling.
    pub fn single_connection(&self) -> bool {
        matches!(self, Provider::Zoom)
    }

    /// How close to expiry a token may get before it is refreshed
    /// proactively.
    pub fn refresh_safety_margin(&self) -> Duration {
        match self {
            // QuickBooks access tokens are short-lived (1h) and their API
            // rejects tokens in the final minutes; refresh earlier.
            Provider::QuickBooks => Duration::from_secs(10 * 60),
            _ => Duration::from_secs(5 * 60),
        }
    }

    /// Environment variable prefix for this provider's OAuth credentials
    /// (`{PREFIX}_CLIENT_ID`, `{PREFIX}_CLIENT_SECRET`).
    pub fn env_prefix(&self) -> &'static str {
        match self {
            Provider::GoogleCalendar => "GOOGLE_CALENDAR",
            Provider::Zoom => "ZOOM",
            Provider::QuickBooks => "QUICKBOOKS",
            Provider::Xero => "XERO",
            Provider::Stripe => "STRIPE_CONNECT",
        }
    }

    pub fn token_auth_style(&self) -> TokenAuthStyle {
        match self {
            Provider::GoogleCalendar | Provider::Stripe => TokenAuthStyle::Body,
            Provider::Zoom | Provider::QuickBooks | Provider::Xero => TokenAuthStyle::BasicHeader,
        }
    }

    /// Extra query parameters for the authorization URL.
    pub fn extra_authorize_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            // Google only issues a refresh token with offline access and a
            // forced consent screen.
            Provider::GoogleCalendar => {
                &[("access_type", "offline"), ("prompt", "consent")]
            }
            _ => &[],
        }
    }

    pub fn default_scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::GoogleCalendar => &[
                "https://www.googleapis.com/auth/calendar.events",
                "https://www.googleapis.com/auth/userinfo.email",
            ],
            Provider::Zoom => &["meeting:write", "user:read"],
            Provider::QuickBooks => &["com.intuit.quickbooks.accounting"],
            Provider::Xero => &["accounting.transactions.read", "offline_access"],
            Provider::Stripe => &["read_write"],
        }
    }

    pub fn default_endpoints(&self) -> ProviderEndpoints {
        match self {
            Provider::GoogleCalendar => ProviderEndpoints {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
                token_url: "https://oauth2.googleapis.com/token".into(),
                revoke_url: Some("https://oauth2.googleapis.com/revoke".into()),
                identity_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
                api_base_url: "https://www.googleapis.com/calendar/v3".into(),
            },
            Provider::Zoom => ProviderEndpoints {
                authorize_url: "https://zoom.us/oauth/authorize".into(),
                token_url: "https://zoom.us/oauth/token".into(),
                revoke_url: Some("https://zoom.us/oauth/revoke".into()),
                identity_url: "https://api.zoom.us/v2/users/me".into(),
                api_base_url: "https://api.zoom.us/v2".into(),
            },
            Provider::QuickBooks => ProviderEndpoints {
                authorize_url: "https://appcenter.intuit.com/connect/oauth2".into(),
                token_url: "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".into(),
                revoke_url: Some(
                    "https://developer.api.intuit.com/v2/oauth2/tokens/revoke".into(),
                ),
                identity_url: "https://accounts.platform.intuit.com/v1/openid_connect/userinfo"
                    .into(),
                api_base_url: "https://quickbooks.api.intuit.com/v3".into(),
            },
            Provider::Xero => ProviderEndpoints {
                authorize_url: "https://login.xero.com/identity/connect/authorize".into(),
                token_url: "https://identity.xero.com/connect/token".into(),
                revoke_url: Some("https://identity.xero.com/connect/revocation".into()),
                identity_url: "https://api.xero.com/connections".into(),
                api_base_url: "https://api.xero.com/api.xro/2.0".into(),
            },
            Provider::Stripe => ProviderEndpoints {
                authorize_url: "https://connect.stripe.com/oauth/authorize".into(),
                token_url: "https://connect.stripe.com/oauth/token".into(),
                revoke_url: Some("https://connect.stripe.com/oauth/deauthorize".into()),
                identity_url: "https://api.stripe.com/v1/account".into(),
                api_base_url: "https://api.stripe.com/v1".into(),
            },
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_string_round_trip() {
        for provider in [
            Provider::GoogleCalendar,
            Provider::Zoom,
            Provider::QuickBooks,
            Provider::Xero,
            Provider::Stripe,
        ] {
            assert_eq!(Provider::from_str(provider.as_str()), Some(provider));
        }
        assert_eq!(Provider::from_str("facetime"), None);
    }

    #[test]
    fn only_meeting_provider_is_single_connection() {
        assert!(Provider::Zoom.single_connection());
        assert!(!Provider::GoogleCalendar.single_connection());
        assert!(!Provider::QuickBooks.single_connection());
    }
}
