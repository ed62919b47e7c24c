//! Remote object client for the drive's private application folder.
//!
//! Every request carries the authenticator's bearer token. A 401 triggers one
//! refresh and one retry; a second 401 is surfaced as an authentication
//! failure. Other non-2xx responses become [`Error::Remote`]. Retrying
//! transient failures is left to callers.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;

use crate::auth::{AuthError, TokenAuthenticator};
use crate::config::DriveConfig;
use crate::error::{Error, Result};
use crate::util::compact_text;

/// Read and write granularity for streamed transfers.
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

const FILE_FIELDS: &str = "id,name,size";
const LIST_FIELDS: &str = "nextPageToken,files(id,name,size)";

/// An object in the application folder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    /// Size in bytes. The drive reports it as a decimal string.
    #[serde(default, deserialize_with = "deserialize_size")]
    pub size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<RemoteFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadMetadata<'a> {
    name: &'a str,
    mime_type: &'a str,
    parents: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct DriveErrorResponse {
    error: DriveErrorBody,
}

#[derive(Debug, Deserialize)]
struct DriveErrorBody {
    message: String,
}

/// HTTP client for the drive API.
pub struct DriveClient {
    config: DriveConfig,
    client: Client,
    auth: Arc<TokenAuthenticator>,
}

impl DriveClient {
    /// Build a client with a transport configured from `config`.
    pub fn new(config: DriveConfig, auth: Arc<TokenAuthenticator>) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self::with_client(config, client, auth))
    }

    pub const fn with_client(
        config: DriveConfig,
        client: Client,
        auth: Arc<TokenAuthenticator>,
    ) -> Self {
        Self {
            config,
            client,
            auth,
        }
    }

    pub const fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Enumerate the whole application folder, following page tokens.
    pub async fn list_all(&self) -> Result<Vec<RemoteFile>> {
        let url = format!("{}/files", self.config.api_base_url);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        let mut seen_tokens = HashSet::new();

        loop {
            let response = self
                .execute(|| {
                    let mut query = vec![
                        ("spaces", self.config.app_folder.clone()),
                        ("fields", LIST_FIELDS.to_string()),
                    ];
                    if let Some(page_size) = self.config.page_size {
                        query.push(("pageSize", page_size.to_string()));
                    }
                    if let Some(token) = &page_token {
                        query.push(("pageToken", token.clone()));
                    }
                    Ok(self.client.get(&url).query(&query))
                })
                .await?;

            let page: FileList = ensure_success(response).await?.json().await?;
            files.extend(page.files);

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(token) => {
                    if !seen_tokens.insert(token.clone()) {
                        return Err(Error::Remote {
                            status: StatusCode::OK.as_u16(),
                            message: format!("listing repeated page token {token}"),
                        });
                    }
                    page_token = Some(token);
                }
                None => break,
            }
        }

        tracing::debug!("Listed {} remote files", files.len());
        Ok(files)
    }

    /// Upload a local file, streamed from disk.
    pub async fn upload_file(&self, path: &Path, name: &str, mime_type: &str) -> Result<RemoteFile> {
        let length = tokio::fs::metadata(path).await?.len();
        let metadata = self.upload_metadata(name, mime_type)?;

        let response = self
            .execute(|| {
                let file = tokio::fs::File::from_std(std::fs::File::open(path)?);
                let stream = ReaderStream::with_capacity(file, TRANSFER_CHUNK_SIZE);
                let content = Part::stream_with_length(Body::wrap_stream(stream), length)
                    .file_name(name.to_string())
                    .mime_str(mime_type)?;
                Ok(self.upload_request(&metadata, content)?)
            })
            .await?;

        let file: RemoteFile = ensure_success(response).await?.json().await?;
        tracing::debug!("Uploaded {name} ({length} bytes) as {}", file.id);
        Ok(file)
    }

    /// Upload an in-memory payload.
    pub async fn upload_bytes(&self, name: &str, mime_type: &str, bytes: &[u8]) -> Result<RemoteFile> {
        let metadata = self.upload_metadata(name, mime_type)?;

        let response = self
            .execute(|| {
                let content = Part::bytes(bytes.to_vec())
                    .file_name(name.to_string())
                    .mime_str(mime_type)?;
                Ok(self.upload_request(&metadata, content)?)
            })
            .await?;

        let file: RemoteFile = ensure_success(response).await?.json().await?;
        tracing::debug!("Uploaded {name} ({} bytes) as {}", bytes.len(), file.id);
        Ok(file)
    }

    /// Start downloading an object's content.
    pub async fn download(&self, remote_id: &str) -> Result<RemoteDownload> {
        let url = format!(
            "{}/files/{}",
            self.config.api_base_url,
            urlencoding::encode(remote_id)
        );
        let response = self
            .execute(|| Ok(self.client.get(&url).query(&[("alt", "media")])))
            .await?;

        Ok(RemoteDownload {
            response: ensure_success(response).await?,
        })
    }

    /// Delete an object. An object that is already gone counts as deleted.
    pub async fn delete(&self, remote_id: &str) -> Result<()> {
        let url = format!(
            "{}/files/{}",
            self.config.api_base_url,
            urlencoding::encode(remote_id)
        );
        let response = self.execute(|| Ok(self.client.delete(&url))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!("Remote file {remote_id} already deleted");
            return Ok(());
        }
        ensure_success(response).await?;
        Ok(())
    }

    /// Delete every file in `files`, stopping at the first failure.
    pub async fn delete_all(&self, files: &[RemoteFile]) -> Result<usize> {
        let mut deleted = 0;
        for file in files {
            self.delete(&file.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn upload_metadata(&self, name: &str, mime_type: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput(
                "remote file name must not be empty".to_string(),
            ));
        }
        Ok(serde_json::to_string(&UploadMetadata {
            name,
            mime_type,
            parents: [self.config.app_folder.as_str()],
        })?)
    }

    fn upload_request(&self, metadata: &str, content: Part) -> reqwest::Result<RequestBuilder> {
        let metadata = Part::text(metadata.to_string()).mime_str("application/json; charset=UTF-8")?;
        let form = Form::new().part("metadata", metadata).part("file", content);
        Ok(self
            .client
            .post(format!("{}/files", self.config.upload_base_url))
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .multipart(form))
    }

    /// Send a request built by `build`, refreshing the token and rebuilding
    /// once on a 401.
    async fn execute<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> Result<RequestBuilder>,
    {
        let token = self.auth.access_token().await?;
        let response = build()?.bearer_auth(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("Drive rejected the access token, refreshing once");
        let token = self.auth.refresh_after_unauthorized(&token).await?;
        let response = build()?.bearer_auth(&token).send().await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Unauthorized(error_message(&body)).into());
        }
        Ok(response)
    }
}

/// Body of a download, not yet read.
pub struct RemoteDownload {
    response: Response,
}

impl RemoteDownload {
    /// Buffer the whole body in memory.
    pub async fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(self.response.bytes().await?.to_vec())
    }

    /// Copy the body to `path` chunk by chunk.
    ///
    /// The body lands in a sibling `.part` file that is renamed over `path`
    /// only once complete, so `path` holds either its previous contents or
    /// the whole new body.
    pub async fn write_to_file(self, path: &Path) -> Result<u64> {
        let partial = partial_path(path)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let written = match Self::copy(self.response, &partial).await {
            Ok(written) => written,
            Err(error) => {
                tokio::fs::remove_file(&partial).await.ok();
                return Err(error);
            }
        };
        tokio::fs::rename(&partial, path).await?;
        Ok(written)
    }

    async fn copy(mut response: Response, path: &Path) -> Result<u64> {
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(TRANSFER_CHUNK_SIZE, file);
        let mut written = 0u64;

        while let Some(chunk) = response.chunk().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }
}

fn partial_path(path: &Path) -> Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(Error::InvalidInput(format!(
            "download target {} has no file name",
            path.display()
        )));
    };
    let mut partial = name.to_os_string();
    partial.push(".part");
    Ok(path.with_file_name(partial))
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Remote {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<DriveErrorResponse>(body).map_or_else(
        |_| compact_text(body),
        |payload| compact_text(&payload.error.message),
    )
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(
        match Option::<serde_json::Value>::deserialize(deserializer)? {
            Some(serde_json::Value::String(raw)) => raw.parse().ok(),
            Some(serde_json::Value::Number(number)) => number.as_u64(),
            _ => None,
        },
    )
}
