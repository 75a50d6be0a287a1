use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::info;

use super::store::{TokenSet, TokenStore};
use crate::error::{Result, TrackerError};

/// Google's OAuth2 token endpoint, used for both code exchange and refresh.
pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

/// Refresh this long before the recorded expiry so a token never goes
/// stale mid-request.
const TOKEN_REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// OAuth client settings shared by the consent flow and token refresh.
#[derive(Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Token endpoint response body, same shape for both grant types.
///
/// `refresh_token` is only present on the initial code exchange; refresh
/// responses omit it and the previous one stays valid.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    pub token_type: String,
}

impl TokenSet {
    /// Build a persistable token set from a token endpoint response.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<String>,
        now_ms: i64,
    ) -> Self {
        Self {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token.or(previous_refresh),
            scope: response.scope,
            token_type: Some(response.token_type),
            expiry_date: Some(now_ms + response.expires_in * 1000),
        }
    }
}

/// An authorized credential: the current token set plus everything needed
/// to refresh it. Tokens are persisted through the store on every refresh,
/// so a restart picks up where this process left off.
pub struct Credential {
    oauth: OAuthConfig,
    store: TokenStore,
    tokens: Mutex<TokenSet>,
}

impl Credential {
    pub fn new(oauth: OAuthConfig, store: TokenStore, tokens: TokenSet) -> Self {
        Self {
            oauth,
            store,
            tokens: Mutex::new(tokens),
        }
    }

    /// Snapshot of the current token set.
    #[allow(dead_code)] // Read by the authorization flow tests
    pub async fn tokens(&self) -> TokenSet {
        self.tokens.lock().await.clone()
    }

    /// An access token valid for at least the refresh margin.
    ///
    /// Refreshes through the token endpoint when the stored token is
    /// missing or close to expiry, and persists the updated set before
    /// returning so the file on disk never lags behind.
    pub async fn bearer_token(&self, http: &reqwest::Client) -> Result<String> {
        let mut tokens = self.tokens.lock().await;

        if let Some(token) = usable_access_token(&tokens, Utc::now().timestamp_millis()) {
            return Ok(token.to_string());
        }

        let refresh_token =
            tokens
                .refresh_token
                .clone()
                .ok_or_else(|| TrackerError::NoRefreshToken {
                    path: self.store.path().display().to_string(),
                })?;

        let response = http
            .post(TOKEN_ENDPOINT)
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| TrackerError::TokenEndpoint {
                message: format!("refresh request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::TokenEndpoint {
                message: format!("refresh rejected with HTTP {}: {}", status, body),
            });
        }

        let parsed: TokenResponse =
            response
                .json()
                .await
                .map_err(|e| TrackerError::TokenEndpoint {
                    message: format!("unparseable refresh response: {}", e),
                })?;

        let access_token = parsed.access_token.clone();
        *tokens =
            TokenSet::from_response(parsed, Some(refresh_token), Utc::now().timestamp_millis());

        info!("Saving updated tokens");
        self.store.save(&tokens).await?;

        Ok(access_token)
    }
}

/// The stored access token, if it is still good for the refresh margin.
fn usable_access_token(tokens: &TokenSet, now_ms: i64) -> Option<&str> {
    let token = tokens.access_token.as_deref()?;
    let expiry = tokens.expiry_date?;
    (now_ms + TOKEN_REFRESH_MARGIN_MS < expiry).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usable_access_token_checks_margin() {
        let now_ms = 1_700_000_000_000;
        let mut tokens = TokenSet {
            access_token: Some("a".to_string()),
            refresh_token: Some("b".to_string()),
            scope: None,
            token_type: Some("Bearer".to_string()),
            expiry_date: Some(now_ms + 60 * 60 * 1000),
        };
        assert_eq!(usable_access_token(&tokens, now_ms), Some("a"));

        // Inside the 5 minute margin the token counts as expired.
        tokens.expiry_date = Some(now_ms + 60 * 1000);
        assert_eq!(usable_access_token(&tokens, now_ms), None);

        tokens.expiry_date = Some(now_ms - 1);
        assert_eq!(usable_access_token(&tokens, now_ms), None);
    }

    #[test]
    fn test_usable_access_token_requires_fields() {
        let now_ms = 1_700_000_000_000;
        let no_expiry = TokenSet {
            access_token: Some("a".to_string()),
            ..TokenSet::default()
        };
        assert_eq!(usable_access_token(&no_expiry, now_ms), None);

        let no_token = TokenSet {
            expiry_date: Some(now_ms + 60 * 60 * 1000),
            ..TokenSet::default()
        };
        assert_eq!(usable_access_token(&no_token, now_ms), None);
    }

    #[test]
    fn test_token_set_from_response() {
        let now_ms = 1_700_000_000_000;
        let response = TokenResponse {
            access_token: "fresh".to_string(),
            expires_in: 3599,
            refresh_token: None,
            scope: Some("https://www.googleapis.com/auth/spreadsheets".to_string()),
            token_type: "Bearer".to_string(),
        };

        let tokens = TokenSet::from_response(response, Some("kept".to_string()), now_ms);
        assert_eq!(tokens.access_token.as_deref(), Some("fresh"));
        // Refresh responses omit the refresh token; the previous one survives.
        assert_eq!(tokens.refresh_token.as_deref(), Some("kept"));
        assert_eq!(tokens.expiry_date, Some(now_ms + 3599 * 1000));
    }

    #[test]
    fn test_token_set_from_response_prefers_new_refresh_token() {
        let response = TokenResponse {
            access_token: "fresh".to_string(),
            expires_in: 3600,
            refresh_token: Some("new".to_string()),
            scope: None,
            token_type: "Bearer".to_string(),
        };

        let tokens = TokenSet::from_response(response, Some("old".to_string()), 0);
        assert_eq!(tokens.refresh_token.as_deref(), Some("new"));
    }
}
