//! OAuth2 HTTP plumbing per provider
//!
//! Authorization-URL construction, code-for-token exchange, refresh,
//! server-to-server grants, best-effort revocation, and identity lookup.
//! All calls go through one `reqwest::Client` with a 30 second timeout.

use base64::Engine as _;
use reqwest::Url;
use serde::Deserialize;

use crate::error::{ConnectError, ConnectResult};
use crate::provider::{Provider, ProviderEndpoints, TokenAuthStyle};

/// Per-call timeout budget for provider endpoints.
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;

/// OAuth client configuration for one provider.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub endpoints: ProviderEndpoints,
}

impl OAuthConfig {
    /// Config with the provider's default scopes and endpoints.
    pub fn new(
        provider: Provider,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: provider
                .default_scopes()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            endpoints: provider.default_endpoints(),
        }
    }
}

/// Token endpoint response (`authorization_code`, `refresh_token`, and
/// server-to-server grants all share this shape).
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Provider account identity used for display and connection keying.
#[derive(Debug, Clone)]
pub struct ProviderIdentity {
    pub account_id: String,
    pub email: Option<String>,
}

/// HTTP client for one provider's OAuth endpoints.
#[derive(Clone)]
pub struct OAuthClient {
    provider: Provider,
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    pub fn new(provider: Provider, config: OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            provider,
            config,
            http,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn endpoints(&self) -> &ProviderEndpoints {
        &self.config.endpoints
    }

    /// Build the provider authorization URL with the CSRF state embedded.
    pub fn authorization_url(&self, state: &str) -> ConnectResult<Url> {
        let scope = self.config.scopes.join(" ");
        let mut params: Vec<(&str, &str)> = vec![
            ("client_id", &self.config.client_id),
            ("redirect_uri", &self.config.redirect_uri),
            ("response_type", "code"),
            ("scope", &scope),
            ("state", state),
        ];
        params.extend_from_slice(self.provider.extra_authorize_params());

        Url::parse_with_params(&self.config.endpoints.authorize_url, &params)
            .map_err(|e| ConnectError::Config(format!("bad authorize url: {}", e)))
    }

    /// Exchange an authorization code for a token pair.
    pub async fn exchange_code(&self, code: &str) -> ConnectResult<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
        ];
        self.token_request(&params).await
    }

    /// Redeem a refresh token for a fresh access token (and possibly a
    /// rotated refresh token).
    pub async fn refresh(&self, refresh_token: &str) -> ConnectResult<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    /// Server-to-server grant: `client_credentials`, or Zoom's
    /// `account_credentials` variant when an account id is supplied.
    pub async fn service_token(&self, account_id: Option<&str>) -> ConnectResult<TokenResponse> {
        let params: Vec<(&str, &str)> = match account_id {
            Some(id) => vec![("grant_type", "account_credentials"), ("account_id", id)],
            None => vec![("grant_type", "client_credentials")],
        };
        self.token_request(&params).await
    }

    /// Best-effort remote token revocation. Providers without a revocation
    /// endpoint are a successful no-op.
    pub async fn revoke(&self, token: &str) -> ConnectResult<()> {
        let Some(revoke_url) = self.config.endpoints.revoke_url.as_deref() else {
            tracing::debug!(provider = %self.provider, "No revocation endpoint; skipping");
            return Ok(());
        };

        let response = self
            .authorized_form(self.http.post(revoke_url))
            .form(&[("token", token)])
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
        Ok(())
    }

    /// Fetch the provider-side account identity for a freshly issued token.
    pub async fn fetch_identity(&self, access_token: &str) -> ConnectResult<ProviderIdentity> {
        let response = self
            .http
            .get(&self.config.endpoints.identity_url)
            .bearer_auth(access_token)
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
        parse_identity(self.provider, &body)
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> ConnectResult<TokenResponse> {
        let mut request = self.http.post(&self.config.endpoints.token_url);

        request = match self.provider.token_auth_style() {
            TokenAuthStyle::BasicHeader => self.authorized_form(request).form(params),
            TokenAuthStyle::Body => {
                let mut body: Vec<(&str, &str)> = params.to_vec();
                body.push(("client_id", &self.config.client_id));
                body.push(("client_secret", &self.config.client_secret));
                request.form(&body)
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            // Body may describe the failure (invalid_grant etc.) but can also
            // echo request details; never log it at error level with tokens.
            let message = response.text().await.unwrap_or_default();
            return Err(ConnectError::ProviderApi {
                provider: self.provider,
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json::<TokenResponse>().await?)
    }

    fn authorized_form(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.provider.token_auth_style() {
            TokenAuthStyle::BasicHeader => {
                let credentials = base64::engine::general_purpose::STANDARD.encode(format!(
                    "{}:{}",
                    self.config.client_id, self.config.client_secret
                ));
                request.header("Authorization", format!("Basic {}", credentials))
            }
            TokenAuthStyle::Body => request,
        }
    }
}

/// Map a provider identity payload onto `(account_id, email)`.
///
/// Field names differ per provider; unknown shapes fall back to the common
/// OIDC claims before giving up.
fn parse_identity(provider: Provider, body: &serde_json::Value) -> ConnectResult<ProviderIdentity> {
    let account_id = match provider {
        Provider::GoogleCalendar | Provider::QuickBooks => body.get("sub"),
        Provider::Zoom | Provider::Stripe => body.get("id"),
        // Xero's connections endpoint returns an array of tenants; take the
        // first tenant id.
        Provider::Xero => body.get(0).and_then(|t| t.get("tenantId")),
    }
    .or_else(|| body.get("sub"))
    .or_else(|| body.get("id"))
    .and_then(|v| v.as_str())
    .map(str::to_owned)
    .ok_or_else(|| ConnectError::ProviderApi {
        provider,
        status: 200,
        message: "identity response missing account id".into(),
    })?;

    let email = body
        .get("email")
        .or_else(|| body.get(0).and_then(|t| t.get("tenantName")))
        .and_then(|v| v.as_str())
        .map(str::to_owned);

    Ok(ProviderIdentity { account_id, email })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn test_config(provider: Provider, base: &str) -> OAuthConfig {
        let mut config = OAuthConfig::new(provider, "cid", "secret", "https://app.test/callback");
        config.endpoints.token_url = format!("{}/token", base);
        config.endpoints.identity_url = format!("{}/identity", base);
        config.endpoints.revoke_url = Some(format!("{}/revoke", base));
        config
    }

    fn client(provider: Provider, base: &str) -> OAuthClient {
        OAuthClient::new(provider, test_config(provider, base), reqwest::Client::new())
    }

    #[test]
    fn authorization_url_embeds_state_and_scopes() {
        let client = client(Provider::GoogleCalendar, "http://unused");
        let url = client.authorization_url("abc123").unwrap();
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        assert!(query.contains(&("state".into(), "abc123".into())));
        assert!(query.contains(&("response_type".into(), "code".into())));
        assert!(query.contains(&("access_type".into(), "offline".into())));
        assert!(query
            .iter()
            .any(|(k, v)| k == "scope" && v.contains("calendar.events")));
    }

    #[tokio::test]
    async fn exchange_code_parses_token_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"at-1","refresh_token":"rt-1","expires_in":3600,"token_type":"Bearer"}"#,
            )
            .create_async()
            .await;

        let client = client(Provider::GoogleCalendar, &server.url());
        let token = client.exchange_code("the-code").await.unwrap();

        assert_eq!(token.access_token, "at-1");
        assert_eq!(token.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(token.expires_in, Some(3600));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn basic_header_providers_send_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at-2","expires_in":3600}"#)
            .create_async()
            .await;

        let client = client(Provider::Zoom, &server.url());
        let token = client.refresh("rt-old").await.unwrap();

        assert_eq!(token.access_token, "at-2");
        assert_eq!(token.refresh_token, None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn failed_exchange_surfaces_provider_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = client(Provider::GoogleCalendar, &server.url());
        let err = client.exchange_code("stale").await.unwrap_err();

        match err {
            ConnectError::ProviderApi { status, .. } => assert_eq!(status, 400),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn identity_parsing_handles_oidc_and_tenant_arrays() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/identity")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sub":"user-9","email":"ops@example.com"}"#)
            .create_async()
            .await;

        let google = client(Provider::GoogleCalendar, &server.url());
        let identity = google.fetch_identity("at").await.unwrap();
        assert_eq!(identity.account_id, "user-9");
        assert_eq!(identity.email.as_deref(), Some("ops@example.com"));

        let xero_body = serde_json::json!([
            {"tenantId": "tenant-1", "tenantName": "Acme Ltd"}
        ]);
        let identity = parse_identity(Provider::Xero, &xero_body).unwrap();
        assert_eq!(identity.account_id, "tenant-1");
        assert_eq!(identity.email.as_deref(), Some("Acme Ltd"));
    }
}
