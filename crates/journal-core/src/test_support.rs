//! Helpers shared by HTTP-backed tests.

use std::sync::{Arc, OnceLock};

use reqwest::Client;
use tokio::sync::{Mutex, MutexGuard};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::auth::{MemorySessionStore, OAuthClient, OAuthSession, TokenAuthenticator};
use crate::config::{DriveConfig, OAuthConfig};
use crate::drive::DriveClient;

pub const TOKEN_PATH: &str = "/oauth/token";

/// Authenticator holding a valid `access_token`, refreshing against the
/// mock server's token endpoint.
pub fn authenticator(server: &MockServer, access_token: &str) -> Arc<TokenAuthenticator> {
    let mut config = OAuthConfig::new("test-client", "http://127.0.0.1/callback");
    config.token_url = format!("{}{TOKEN_PATH}", server.uri());
    config.userinfo_url = format!("{}/oauth/userinfo", server.uri());

    let session = OAuthSession {
        access_token: access_token.to_string(),
        refresh_token: Some("refresh-token".to_string()),
        expires_at: i64::MAX / 2,
        account: None,
    };
    let oauth = OAuthClient::new(config, Client::new()).unwrap();
    Arc::new(
        TokenAuthenticator::new(oauth, Arc::new(MemorySessionStore::new(Some(session)))).unwrap(),
    )
}

/// Drive client whose API and upload endpoints both live on `server`.
pub fn drive(server: &MockServer, access_token: &str) -> DriveClient {
    DriveClient::with_client(
        DriveConfig::with_base_url(&server.uri()),
        Client::new(),
        authenticator(server, access_token),
    )
}

/// Token endpoint that hands out `access_token`, expected `times` times.
pub async fn mount_token_endpoint(server: &MockServer, access_token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": access_token,
            "expires_in": 3600
        })))
        .expect(times)
        .mount(server)
        .await;
}

/// Serializes tests that start a sync pass; only one may run per process.
pub async fn exclusive_pass() -> MutexGuard<'static, ()> {
    static PASSES: OnceLock<Mutex<()>> = OnceLock::new();
    PASSES.get_or_init(|| Mutex::new(())).lock().await
}
