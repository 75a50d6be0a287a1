use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};
use url::Url;

use super::credential::{Credential, OAuthConfig, TokenResponse, TOKEN_ENDPOINT};
use super::store::{TokenSet, TokenStore};
use crate::config::Config;
use crate::error::{Result, TrackerError};

/// Google's consent page.
const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Scope granting spreadsheet read/write access.
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

/// Fixed callback route; the path of the configured redirect URI is not
/// consulted, only its port.
const CALLBACK_PATH: &str = "/oauth2callback";

/// Obtain an authorized credential.
///
/// Reuses the persisted token set when one is present (the normal case on
/// every restart after the first). Otherwise runs the interactive consent
/// flow: the default browser is pointed at the consent page and a
/// short-lived local listener captures the authorization code, which is
/// then exchanged and persisted.
pub async fn authorize(config: &Config) -> Result<Credential> {
    let oauth = OAuthConfig {
        client_id: config.oauth_client_id.clone(),
        client_secret: config.oauth_client_secret.clone(),
        redirect_uri: config.oauth_redirect_uri.clone(),
    };
    let store = TokenStore::new(&config.token_file);

    // An unusable redirect URI is a configuration error even when the
    // stored tokens would make the listener unnecessary.
    let port = redirect_port(&oauth.redirect_uri)?;

    if let Some(tokens) = store.load().await? {
        info!("Using existing tokens from '{}'", store.path().display());
        if tokens.refresh_token.is_none() {
            warn!(
                "Token file '{}' has no refresh token; delete it and restart to authorize again",
                store.path().display()
            );
        }
        return Ok(Credential::new(oauth, store, tokens));
    }

    let authorize_url = consent_url(&oauth);

    // Bind before opening the browser so the redirect cannot race the
    // listener coming up.
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!(
        "Waiting for OAuth consent on http://127.0.0.1:{}{}",
        port, CALLBACK_PATH
    );

    info!("Authorize this app by visiting: {}", authorize_url);
    if let Err(e) = open::that_detached(&authorize_url) {
        warn!("Could not open a browser ({}), follow the URL above manually", e);
    }

    let code = wait_for_code(listener).await?;

    let http = reqwest::Client::new();
    let tokens = exchange_code(&http, &oauth, &code).await?;
    info!("Tokens acquired.");
    store.save(&tokens).await?;

    Ok(Credential::new(oauth, store, tokens))
}

/// Build the consent page URL, requesting offline access so the exchange
/// also yields a refresh token.
fn consent_url(oauth: &OAuthConfig) -> String {
    format!(
        "{}\
        ?client_id={}\
        &redirect_uri={}\
        &response_type=code\
        &scope={}\
        &access_type=offline",
        AUTH_ENDPOINT,
        urlencoding::encode(&oauth.client_id),
        urlencoding::encode(&oauth.redirect_uri),
        urlencoding::encode(SHEETS_SCOPE),
    )
}

/// Port the callback listener must bind, taken from the redirect URI.
fn redirect_port(redirect_uri: &str) -> Result<u16> {
    let url = Url::parse(redirect_uri).map_err(|e| TrackerError::RedirectUri {
        uri: redirect_uri.to_string(),
        message: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(TrackerError::RedirectUri {
            uri: redirect_uri.to_string(),
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }

    url.port_or_known_default()
        .ok_or_else(|| TrackerError::RedirectUri {
            uri: redirect_uri.to_string(),
            message: "no usable port".to_string(),
        })
}

/// Shared handler state: a one-shot sender slot for the first captured
/// code. Requests after the first find the slot empty.
#[derive(Clone)]
struct CallbackState {
    code_tx: Arc<parking_lot::Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

/// Query parameters from the OAuth callback
#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
}

/// Serve the callback route on `listener` until one callback arrives,
/// then tear the listener down. The listener is gone by the time this
/// returns, on the error path too.
async fn wait_for_code(listener: TcpListener) -> Result<String> {
    let (code_tx, code_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let state = CallbackState {
        code_tx: Arc::new(parking_lot::Mutex::new(Some(code_tx))),
    };
    let app = Router::new()
        .route(CALLBACK_PATH, get(oauth_callback))
        .with_state(state);

    let server = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
    });

    // A RecvError here means the server task died without ever taking the
    // sender out of the slot.
    let outcome = code_rx.await.unwrap_or(Err(TrackerError::CallbackClosed));

    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server.await {
        warn!("OAuth callback listener did not shut down cleanly: {}", e);
    }

    outcome
}

/// GET /oauth2callback - capture the authorization code
async fn oauth_callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let Some(sender) = state.code_tx.lock().take() else {
        return Html("Authorization already completed. You can close this tab.");
    };

    match params.code {
        Some(code) => {
            let _ = sender.send(Ok(code));
            Html("Authentication successful! Please return to the console.")
        }
        None => {
            let _ = sender.send(Err(TrackerError::MissingCode));
            Html("No authorization code in the callback. Check the console.")
        }
    }
}

/// Exchange an authorization code for the initial token set.
async fn exchange_code(
    http: &reqwest::Client,
    oauth: &OAuthConfig,
    code: &str,
) -> Result<TokenSet> {
    let response = http
        .post(TOKEN_ENDPOINT)
        .form(&[
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", oauth.redirect_uri.as_str()),
        ])
        .send()
        .await
        .map_err(|e| TrackerError::TokenEndpoint {
            message: format!("code exchange failed: {}", e),
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(TrackerError::TokenEndpoint {
            message: format!("code exchange rejected with HTTP {}: {}", status, body),
        });
    }

    let parsed: TokenResponse = response
        .json()
        .await
        .map_err(|e| TrackerError::TokenEndpoint {
            message: format!("unparseable token response: {}", e),
        })?;

    Ok(TokenSet::from_response(
        parsed,
        None,
        chrono::Utc::now().timestamp_millis(),
    ))
}
