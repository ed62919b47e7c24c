//! OAuth client and token authenticator for the drive API.

use std::fmt;
use std::sync::{Arc, Mutex as StdMutex};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::config::OAuthConfig;
use crate::util::{compact_text, unix_timestamp_now};

const EXPIRY_SKEW_SECONDS: i64 = 60;

/// Signed-in account shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds
    pub expires_at: i64,
    #[serde(default)]
    pub account: Option<AccountInfo>,
}

impl OAuthSession {
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_timestamp_now() + EXPIRY_SKEW_SECONDS
    }
}

impl fmt::Debug for OAuthSession {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OAuthSession")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("account", &self.account)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Drive access is not authorized")]
    NotConfigured,
    #[error("Invalid auth configuration: {0}")]
    InvalidConfiguration(&'static str),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to parse JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Auth API error: {0}")]
    Api(String),
    #[error("Authorization rejected: {0}")]
    Unauthorized(String),
    #[error("Secure storage error: {0}")]
    SecureStorage(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Durable storage for the session between runs.
pub trait SessionPersistence: Send + Sync + 'static {
    fn load_session(&self) -> AuthResult<Option<OAuthSession>>;
    fn save_session(&self, session: &OAuthSession) -> AuthResult<()>;
    fn clear_session(&self) -> AuthResult<()>;
}

/// Session store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    session: StdMutex<Option<OAuthSession>>,
}

impl MemorySessionStore {
    #[must_use]
    pub fn new(session: Option<OAuthSession>) -> Self {
        Self {
            session: StdMutex::new(session),
        }
    }

    fn slot(&self) -> AuthResult<std::sync::MutexGuard<'_, Option<OAuthSession>>> {
        self.session
            .lock()
            .map_err(|_| AuthError::SecureStorage("session store lock poisoned".to_string()))
    }
}

impl SessionPersistence for MemorySessionStore {
    fn load_session(&self) -> AuthResult<Option<OAuthSession>> {
        Ok(self.slot()?.clone())
    }

    fn save_session(&self, session: &OAuthSession) -> AuthResult<()> {
        *self.slot()? = Some(session.clone());
        Ok(())
    }

    fn clear_session(&self) -> AuthResult<()> {
        *self.slot()? = None;
        Ok(())
    }
}

/// Authorization-code flow against the OAuth endpoints.
#[derive(Clone)]
pub struct OAuthClient {
    config: OAuthConfig,
    client: Client,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, client: Client) -> AuthResult<Self> {
        if config.client_id.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "OAuth client id must not be empty",
            ));
        }
        if config.redirect_uri.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "OAuth redirect URI must not be empty",
            ));
        }
        Ok(Self { config, client })
    }

    /// URL the user opens to grant access.
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> String {
        let scope = self.config.scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ];
        let query = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.config.auth_url)
    }

    /// Trade an authorization code for a session.
    pub async fn exchange_code(&self, code: &str) -> AuthResult<OAuthSession> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Authorization code must not be empty",
            ));
        }

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let token = self.send_token_request(&form).await?;
        Ok(token.into_session(None))
    }

    /// Obtain a fresh access token. The refresh token is kept when the
    /// endpoint does not rotate it.
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<OAuthSession> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::InvalidConfiguration(
                "Refresh token must not be empty",
            ));
        }

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
        ];
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        let token = self.send_token_request(&form).await?;
        Ok(token.into_session(Some(refresh_token)))
    }

    /// Profile fields of the signed-in account.
    pub async fn fetch_account(&self, access_token: &str) -> AuthResult<AccountInfo> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AuthError::Unauthorized(
                "userinfo endpoint rejected the access token".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Api(parse_api_error(status, &body)));
        }
        Ok(response.json::<AccountInfo>().await?)
    }

    async fn send_token_request(&self, form: &[(&str, &str)]) -> AuthResult<TokenResponse> {
        let response = self
            .client
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<TokenResponse>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let message = parse_api_error(status, &body);
        if is_rejected_grant(status, &body) {
            Err(AuthError::Unauthorized(message))
        } else {
            Err(AuthError::Api(message))
        }
    }
}

/// Holds the current session and refreshes it on demand.
///
/// Refreshes are single-flight: callers that hit a 401 with the same stale
/// token share one token-endpoint call.
pub struct TokenAuthenticator {
    oauth: OAuthClient,
    session: RwLock<Option<OAuthSession>>,
    refresh_lock: Mutex<()>,
    store: Arc<dyn SessionPersistence>,
}

impl TokenAuthenticator {
    /// Start from whatever session `store` holds.
    pub fn new(oauth: OAuthClient, store: Arc<dyn SessionPersistence>) -> AuthResult<Self> {
        let session = store.load_session()?;
        Ok(Self {
            oauth,
            session: RwLock::new(session),
            refresh_lock: Mutex::new(()),
            store,
        })
    }

    pub fn oauth(&self) -> &OAuthClient {
        &self.oauth
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> Option<OAuthSession> {
        self.session.read().await.clone()
    }

    /// Complete the authorization-code flow and persist the session.
    pub async fn sign_in(&self, code: &str) -> AuthResult<OAuthSession> {
        let mut session = self.oauth.exchange_code(code).await?;
        match self.oauth.fetch_account(&session.access_token).await {
            Ok(account) => session.account = Some(account),
            Err(error) => tracing::warn!("Signed in but failed to load account profile: {error}"),
        }

        self.store.save_session(&session)?;
        *self.session.write().await = Some(session.clone());
        tracing::info!("Drive authorization stored");
        Ok(session)
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.store.clear_session()?;
        *self.session.write().await = None;
        Ok(())
    }

    /// Current access token, refreshed first when it has expired.
    pub async fn access_token(&self) -> AuthResult<String> {
        let current = self.session().await.ok_or(AuthError::NotConfigured)?;
        if !current.is_expired() {
            return Ok(current.access_token);
        }

        tracing::debug!("Access token expired, refreshing before request");
        self.refresh_after_unauthorized(&current.access_token).await
    }

    /// Refresh after `stale` was rejected.
    ///
    /// When another caller already replaced `stale`, the newer token is
    /// returned without contacting the token endpoint.
    pub async fn refresh_after_unauthorized(&self, stale: &str) -> AuthResult<String> {
        let _refresh = self.refresh_lock.lock().await;

        let current = self.session().await.ok_or(AuthError::NotConfigured)?;
        if current.access_token != stale {
            return Ok(current.access_token);
        }

        let Some(refresh_token) = current.refresh_token.as_deref() else {
            return Err(AuthError::Unauthorized(
                "session has no refresh token".to_string(),
            ));
        };

        let mut refreshed = self.oauth.refresh(refresh_token).await?;
        refreshed.account = refreshed.account.or(current.account);

        self.store.save_session(&refreshed)?;
        let token = refreshed.access_token.clone();
        *self.session.write().await = Some(refreshed);
        tracing::debug!("Access token refreshed");
        Ok(token)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

impl TokenResponse {
    fn into_session(self, previous_refresh_token: Option<&str>) -> OAuthSession {
        OAuthSession {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous_refresh_token.map(ToString::to_string)),
            expires_at: unix_timestamp_now().saturating_add(self.expires_in.unwrap_or(3600)),
            account: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: Option<String>,
    error_description: Option<String>,
}

fn is_rejected_grant(status: StatusCode, body: &str) -> bool {
    if status == StatusCode::UNAUTHORIZED {
        return true;
    }
    serde_json::from_str::<OAuthErrorResponse>(body)
        .ok()
        .and_then(|payload| payload.error)
        .is_some_and(|error| error == "invalid_grant")
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<OAuthErrorResponse>(body) {
        if let Some(message) = payload.error_description.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer) -> OAuthConfig {
        let mut config = OAuthConfig::new("client-123", "http://127.0.0.1:8765/callback");
        config.auth_url = format!("{}/auth", server.uri());
        config.token_url = format!("{}/token", server.uri());
        config.userinfo_url = format!("{}/userinfo", server.uri());
        config
    }

    fn session(access_token: &str, expires_at: i64) -> OAuthSession {
        OAuthSession {
            access_token: access_token.to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expires_at,
            account: None,
        }
    }

    fn authenticator(server: &MockServer, initial: OAuthSession) -> TokenAuthenticator {
        let oauth = OAuthClient::new(config(server), Client::new()).unwrap();
        let store = Arc::new(MemorySessionStore::new(Some(initial)));
        TokenAuthenticator::new(oauth, store).unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn authorization_url_requests_fixed_scopes() {
        let server = MockServer::start().await;
        let oauth = OAuthClient::new(config(&server), Client::new()).unwrap();

        let url = oauth.authorization_url("state-9");
        assert!(url.starts_with(&format!("{}/auth?", server.uri())));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("drive.appdata"));
        assert!(url.contains("userinfo.email"));
        assert!(url.contains("state=state-9"));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(config(&server), Client::new()).unwrap();
        let session = oauth.refresh("refresh-1").await.unwrap();
        assert_eq!(session.access_token, "fresh");
        assert_eq!(session.refresh_token.as_deref(), Some("refresh-1"));
        assert!(!session.is_expired());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn revoked_refresh_token_is_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(config(&server), Client::new()).unwrap();
        let error = oauth.refresh("refresh-1").await.unwrap_err();
        assert!(matches!(error, AuthError::Unauthorized(_)));
        assert!(error.to_string().contains("revoked"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_refreshes_share_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({
                        "access_token": "fresh",
                        "expires_in": 3600
                    }))
                    .set_delay(std::time::Duration::from_millis(100)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = Arc::new(authenticator(&server, session("stale", i64::MAX / 2)));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let auth = Arc::clone(&auth);
            tasks.push(tokio::spawn(async move {
                auth.refresh_after_unauthorized("stale").await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), "fresh");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn expired_token_is_refreshed_before_use() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh",
                "refresh_token": "refresh-2",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let auth = authenticator(&server, session("old", 0));
        assert_eq!(auth.access_token().await.unwrap(), "fresh");
        assert_eq!(auth.access_token().await.unwrap(), "fresh");

        let stored = auth.store.load_session().unwrap().unwrap();
        assert_eq!(stored.refresh_token.as_deref(), Some("refresh-2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sign_in_stores_session_with_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "first",
                "refresh_token": "refresh-1",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .and(header("authorization", "Bearer first"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "email": "writer@example.com",
                "name": "Writer"
            })))
            .mount(&server)
            .await;

        let oauth = OAuthClient::new(config(&server), Client::new()).unwrap();
        let auth = TokenAuthenticator::new(oauth, Arc::new(MemorySessionStore::default())).unwrap();
        let session = auth.sign_in("auth-code").await.unwrap();

        assert_eq!(
            session.account.and_then(|account| account.email).as_deref(),
            Some("writer@example.com")
        );
        assert!(auth.store.load_session().unwrap().is_some());

        auth.sign_out().await.unwrap();
        assert!(matches!(
            auth.access_token().await,
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn session_debug_redacts_tokens() {
        let session = OAuthSession {
            access_token: "secret-access-token".to_string(),
            refresh_token: Some("secret-refresh-token".to_string()),
            expires_at: 1_700_000_000,
            account: None,
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("secret-access-token"));
        assert!(!rendered.contains("secret-refresh-token"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
