//! Runtime configuration for the drive client and OAuth flow.
//!
//! Both configs are read from `JOURNAL_*` environment variables. Parsing goes
//! through a lookup closure so tests never touch the process environment.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_DRIVE_API_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
pub const DEFAULT_DRIVE_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload/drive/v3";
pub const DEFAULT_OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";

/// Folder token of the application's private storage area.
pub const APP_DATA_FOLDER: &str = "appDataFolder";

/// Scopes requested during authorization: private app storage plus the
/// profile fields shown as the signed-in account.
pub const OAUTH_SCOPES: [&str; 3] = [
    "https://www.googleapis.com/auth/drive.appdata",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/userinfo.email",
];

const ENV_DRIVE_API_BASE_URL: &str = "JOURNAL_DRIVE_API_BASE_URL";
const ENV_DRIVE_UPLOAD_BASE_URL: &str = "JOURNAL_DRIVE_UPLOAD_BASE_URL";
const ENV_DRIVE_PAGE_SIZE: &str = "JOURNAL_DRIVE_PAGE_SIZE";
const ENV_HTTP_TIMEOUT_SECS: &str = "JOURNAL_HTTP_TIMEOUT_SECS";
const ENV_OAUTH_CLIENT_ID: &str = "JOURNAL_OAUTH_CLIENT_ID";
const ENV_OAUTH_CLIENT_SECRET: &str = "JOURNAL_OAUTH_CLIENT_SECRET";
const ENV_OAUTH_REDIRECT_URI: &str = "JOURNAL_OAUTH_REDIRECT_URI";
const ENV_OAUTH_AUTH_URL: &str = "JOURNAL_OAUTH_AUTH_URL";
const ENV_OAUTH_TOKEN_URL: &str = "JOURNAL_OAUTH_TOKEN_URL";

/// Remote object store endpoints and transport settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    pub api_base_url: String,
    pub upload_base_url: String,
    pub app_folder: String,
    /// Requested listing page size. `None` leaves it to the server.
    pub page_size: Option<u32>,
    /// Per-request timeout. `None` keeps the transport default.
    pub http_timeout: Option<Duration>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_DRIVE_API_BASE_URL.to_string(),
            upload_base_url: DEFAULT_DRIVE_UPLOAD_BASE_URL.to_string(),
            app_folder: APP_DATA_FOLDER.to_string(),
            page_size: None,
            http_timeout: None,
        }
    }
}

impl DriveConfig {
    /// Config pointing both API and upload endpoints at `base_url`.
    #[must_use]
    pub fn with_base_url(base_url: &str) -> Self {
        let base_url = base_url.trim_end_matches('/');
        Self {
            api_base_url: base_url.to_string(),
            upload_base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            api_base_url: http_url_or(&lookup, ENV_DRIVE_API_BASE_URL, &defaults.api_base_url)?,
            upload_base_url: http_url_or(
                &lookup,
                ENV_DRIVE_UPLOAD_BASE_URL,
                &defaults.upload_base_url,
            )?,
            app_folder: defaults.app_folder,
            page_size: parse_number(&lookup, ENV_DRIVE_PAGE_SIZE)?,
            http_timeout: parse_number(&lookup, ENV_HTTP_TIMEOUT_SECS)?.map(Duration::from_secs),
        })
    }

    /// HTTP client honouring the configured timeout.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.http_timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder.build()?)
    }
}

/// OAuth endpoints and client registration.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthConfig {
    pub auth_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("OAuthConfig")
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .field("userinfo_url", &self.userinfo_url)
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl OAuthConfig {
    /// Config for the given client registration with default endpoints.
    #[must_use]
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            auth_url: DEFAULT_OAUTH_AUTH_URL.to_string(),
            token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
            userinfo_url: DEFAULT_USERINFO_URL.to_string(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: OAUTH_SCOPES.iter().map(ToString::to_string).collect(),
        }
    }

    /// Load from the environment. `Ok(None)` when nothing is configured.
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let client_id = normalize_text_option(lookup(ENV_OAUTH_CLIENT_ID));
        let redirect_uri = normalize_text_option(lookup(ENV_OAUTH_REDIRECT_URI));

        let (client_id, redirect_uri) = match (client_id, redirect_uri) {
            (None, None) => return Ok(None),
            (Some(client_id), Some(redirect_uri)) => (client_id, redirect_uri),
            (client_id, redirect_uri) => {
                let missing = [
                    (client_id.is_none(), ENV_OAUTH_CLIENT_ID),
                    (redirect_uri.is_none(), ENV_OAUTH_REDIRECT_URI),
                ]
                .iter()
                .filter(|(absent, _)| *absent)
                .map(|(_, name)| *name)
                .collect::<Vec<_>>()
                .join(", ");
                return Err(Error::InvalidInput(format!(
                    "incomplete OAuth configuration, missing {missing}"
                )));
            }
        };

        let mut config = Self::new(client_id, redirect_uri);
        config.client_secret = normalize_text_option(lookup(ENV_OAUTH_CLIENT_SECRET));
        config.auth_url = http_url_or(&lookup, ENV_OAUTH_AUTH_URL, DEFAULT_OAUTH_AUTH_URL)?;
        config.token_url = http_url_or(&lookup, ENV_OAUTH_TOKEN_URL, DEFAULT_OAUTH_TOKEN_URL)?;
        Ok(Some(config))
    }
}

fn http_url_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Result<String> {
    match normalize_text_option(lookup(key)) {
        None => Ok(default.to_string()),
        Some(value) if is_http_url(&value) => Ok(value.trim_end_matches('/').to_string()),
        Some(_) => Err(Error::InvalidInput(format!(
            "{key} must include http:// or https://"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    normalize_text_option(lookup(key))
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| Error::InvalidInput(format!("{key} must be a positive number")))
        })
        .transpose()
}
