// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! GitHub contents API client

use super::ArtifactStore;
use super::types::{
    ArtifactRecord, ContentItem, DeleteContentRequest, PutContentRequest, PutContentResponse,
};
use crate::config::RegistryConfig;
use crate::error::{OtaError, Result, ValidationError};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{ACCEPT, CACHE_CONTROL, EXPIRES, HeaderMap, HeaderValue, PRAGMA};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Uploads above this size are rejected before any request is made
pub const MAX_ARTIFACT_BYTES: usize = 100 * 1024 * 1024;

const USER_AGENT: &str = concat!("fluxion-ota/", env!("CARGO_PKG_VERSION"));
const GITHUB_API_VERSION: &str = "2022-11-28";

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/vnd.github+json"),
    );
    headers.insert(
        "X-GitHub-Api-Version",
        HeaderValue::from_static(GITHUB_API_VERSION),
    );
    // Listings must reflect the store, not a proxy
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers
}

/// Percent-encode each path segment, keeping `/` separators
fn encode_path(path: &str) -> String {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn ensure_size(content: &[u8]) -> Result<()> {
    if content.len() > MAX_ARTIFACT_BYTES {
        return Err(ValidationError::PayloadTooLarge {
            size: content.len(),
            limit: MAX_ARTIFACT_BYTES,
        }
        .into());
    }
    Ok(())
}

async fn error_from_response(response: Response) -> OtaError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    OtaError::Registry {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or_default().to_string(),
        body,
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_from_response(response).await)
    }
}

/// Client for one GitHub-compatible contents API.
///
/// The client is stateless apart from the HTTP connection pool; every call
/// takes the [`RegistryConfig`] it operates on.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(default_headers())
            .build()?;
        Ok(Self { client })
    }

    /// Public download URL of an artifact: `{base_url}/{ota_dir}/{name}`.
    pub fn resolve_public_url(config: &RegistryConfig, name: &str) -> String {
        let base = config.base_url.trim_end_matches('/');
        format!("{base}/{}", config.artifact_path(name))
    }

    fn contents_url(config: &RegistryConfig, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            config.api_base_url(),
            urlencoding::encode(config.owner.trim()),
            urlencoding::encode(config.repo.trim()),
            encode_path(path)
        )
    }

    fn request(&self, method: Method, url: &str, config: &RegistryConfig) -> RequestBuilder {
        let request = self.client.request(method, url);
        match config.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// List `.bin` files in the configured OTA directory.
    ///
    /// A missing directory is an empty registry, not an error.
    pub async fn list(&self, config: &RegistryConfig) -> Result<Vec<ArtifactRecord>> {
        config.validate()?;
        let url = Self::contents_url(config, &config.ota_dir);
        let cache_buster = chrono::Utc::now().timestamp_millis().to_string();
        debug!(url = %url, branch = %config.branch, "Listing registry directory");

        let response = self
            .request(Method::GET, &url, config)
            .query(&[("ref", config.branch.as_str()), ("_t", cache_buster.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            info!(
                "Registry directory {} not found on {}, treating as empty",
                config.ota_dir, config.branch
            );
            return Ok(Vec::new());
        }

        let body: Value = ensure_success(response).await?.json().await?;
        let Value::Array(_) = body else {
            warn!("Registry path {} is not a directory", config.ota_dir);
            return Ok(Vec::new());
        };

        let items: Vec<ContentItem> = serde_json::from_value(body)?;
        let total = items.len();
        let records: Vec<ArtifactRecord> = items
            .into_iter()
            .filter(ContentItem::is_firmware_file)
            .map(ArtifactRecord::from_item)
            .collect();

        info!(
            "Listed {} firmware files ({} entries in {})",
            records.len(),
            total,
            config.ota_dir
        );
        Ok(records)
    }

    /// Current concurrency token of `path`, `None` if it does not exist.
    pub async fn get_token(&self, config: &RegistryConfig, path: &str) -> Result<Option<String>> {
        config.validate()?;
        let url = Self::contents_url(config, path);
        debug!(path, "Resolving concurrency token");

        let response = self
            .request(Method::GET, &url, config)
            .query(&[("ref", config.branch.as_str())])
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!(path, "No stored artifact");
            return Ok(None);
        }

        let body: Value = ensure_success(response).await?.json().await?;
        Ok(body
            .get("sha")
            .and_then(Value::as_str)
            .filter(|sha| !sha.is_empty())
            .map(str::to_string))
    }

    /// Upload `content` to `path`.
    ///
    /// With `expected_token` the store only applies the write on top of that
    /// exact blob; without it the call is a create and fails if `path` exists.
    pub async fn create_or_update(
        &self,
        config: &RegistryConfig,
        path: &str,
        content: &[u8],
        message: &str,
        expected_token: Option<&str>,
    ) -> Result<ArtifactRecord> {
        ensure_size(content)?;
        config.validate()?;
        let url = Self::contents_url(config, path);
        let body = PutContentRequest {
            message,
            branch: &config.branch,
            content: BASE64.encode(content),
            sha: expected_token,
        };

        info!(
            path,
            bytes = content.len(),
            update = expected_token.is_some(),
            "Uploading firmware artifact"
        );

        let response = self
            .request(Method::PUT, &url, config)
            .json(&body)
            .send()
            .await?;

        let response = match ensure_success(response).await {
            Ok(response) => response,
            Err(e) => {
                warn!(path, "Upload rejected: {e}");
                return Err(e);
            }
        };

        let stored: PutContentResponse = response.json().await?;
        let record = ArtifactRecord::from_item(stored.content);
        info!(
            "Stored {} (token {})",
            record.name, record.concurrency_token
        );
        Ok(record)
    }

    /// Delete `path`; `token` must match the stored blob.
    pub async fn delete(
        &self,
        config: &RegistryConfig,
        path: &str,
        token: &str,
        message: &str,
    ) -> Result<()> {
        config.validate()?;
        let url = Self::contents_url(config, path);
        let body = DeleteContentRequest {
            message,
            branch: &config.branch,
            sha: token,
        };

        info!(path, "Deleting firmware artifact");
        let response = self
            .request(Method::DELETE, &url, config)
            .json(&body)
            .send()
            .await?;

        if let Err(e) = ensure_success(response).await {
            warn!(path, "Delete rejected: {e}");
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for RegistryClient {
    async fn list(&self, config: &RegistryConfig) -> Result<Vec<ArtifactRecord>> {
        RegistryClient::list(self, config).await
    }

    async fn get_token(&self, config: &RegistryConfig, path: &str) -> Result<Option<String>> {
        RegistryClient::get_token(self, config, path).await
    }

    async fn create_or_update(
        &self,
        config: &RegistryConfig,
        path: &str,
        content: &[u8],
        message: &str,
        expected_token: Option<&str>,
    ) -> Result<ArtifactRecord> {
        RegistryClient::create_or_update(self, config, path, content, message, expected_token)
            .await
    }

    async fn delete(
        &self,
        config: &RegistryConfig,
        path: &str,
        token: &str,
        message: &str,
    ) -> Result<()> {
        RegistryClient::delete(self, config, path, token, message).await
    }
}
