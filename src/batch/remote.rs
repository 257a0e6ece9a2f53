//! Remote dependencies of a batch pass
//!
//! The manifest file lists menu ids; the catalog maps an id to an image URL;
//! the results API receives the scaled boxes for each menu.

use anyhow::Context;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::config::{RemoteConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::vision::TextLine;

/// Catalog entry for one menu
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuImagePair {
    #[serde(rename = "menuId")]
    pub menu_id: String,
    #[serde(rename = "menuImage")]
    pub menu_image: String,
}

/// Body posted to the results API
#[derive(Debug, Serialize)]
pub struct ReportPayload<'a> {
    #[serde(rename = "menuId")]
    pub menu_id: &'a str,
    #[serde(rename = "scaledBoxBound")]
    pub scaled_box_bound: &'a [TextLine],
}

/// Catalog and results API base URLs
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub catalog_url: String,
    pub results_url: String,
}

impl From<&RemoteConfig> for Endpoints {
    fn from(config: &RemoteConfig) -> Self {
        Self {
            catalog_url: config.catalog_url.clone(),
            results_url: config.results_url.clone(),
        }
    }
}

/// Read menu ids from a manifest
///
/// The manifest is a JSON array of objects whose keys are the ids, e.g.
/// `[{"m1": true}, {"m2": true, "m3": true}]`. Ids are returned in file
/// order, keys in object order.
pub fn read_manifest(path: &Path) -> Result<Vec<String>> {
    let manifest_error = |reason: String| Error::Manifest {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| manifest_error(e.to_string()))?;
    let entries: Vec<serde_json::Map<String, serde_json::Value>> =
        serde_json::from_str(&content).map_err(|e| manifest_error(e.to_string()))?;

    Ok(entries
        .into_iter()
        .flat_map(|entry| entry.into_iter().map(|(id, _)| id))
        .collect())
}

/// HTTP client for the catalog, image hosts and results API
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    retry: RetryConfig,
    max_image_bytes: u64,
}

impl RemoteClient {
    pub fn new(config: &RemoteConfig, retry: RetryConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            retry,
            max_image_bytes: config.max_image_bytes,
        })
    }

    /// Look up the image URL for a menu id
    pub async fn lookup(&self, catalog_url: &str, id: &str) -> Result<MenuImagePair> {
        let catalog_error = |reason: String| Error::Catalog {
            id: id.to_string(),
            reason,
        };

        let mut url = Url::parse(catalog_url).map_err(|e| catalog_error(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| catalog_error(format!("{} cannot be a base URL", catalog_url)))?
            .pop_if_empty()
            .push(id);

        let response = self
            .get_with_retry(|| {
                self.http
                    .get(url.clone())
                    .header(CONTENT_TYPE, "application/json")
            })
            .await
            .map_err(|e| catalog_error(e.to_string()))?;

        let pair: MenuImagePair = response
            .json()
            .await
            .map_err(|e| catalog_error(e.to_string()))?;
        debug!("Catalog: {} -> {}", pair.menu_id, pair.menu_image);
        Ok(pair)
    }

    /// Download an image, refusing bodies over the configured size
    pub async fn download_image(&self, url: &str) -> Result<Vec<u8>> {
        let download_error = |reason: String| Error::Download {
            url: url.to_string(),
            reason,
        };

        let response = self
            .get_with_retry(|| self.http.get(url))
            .await
            .map_err(|e| download_error(e.to_string()))?;

        if let Some(len) = response.content_length() {
            if len > self.max_image_bytes {
                return Err(download_error(format!(
                    "{} bytes exceeds limit of {}",
                    len, self.max_image_bytes
                )));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| download_error(e.to_string()))?;
            if (bytes.len() + chunk.len()) as u64 > self.max_image_bytes {
                return Err(download_error(format!(
                    "body exceeds limit of {} bytes",
                    self.max_image_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!("Downloaded {} bytes from {}", bytes.len(), url);
        Ok(bytes)
    }

    /// Post detected lines to the results API (never retried)
    pub async fn report(&self, results_url: &str, payload: &ReportPayload<'_>) -> Result<()> {
        let report_error = |reason: String| Error::Report {
            menu_id: payload.menu_id.to_string(),
            reason,
        };

        self.http
            .post(results_url)
            .json(payload)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| report_error(e.to_string()))?;

        debug!(
            "Reported {} line(s) for menu {}",
            payload.scaled_box_bound.len(),
            payload.menu_id
        );
        Ok(())
    }

    /// Send an idempotent request, retrying transient failures with backoff
    async fn get_with_retry(
        &self,
        request: impl Fn() -> RequestBuilder,
    ) -> reqwest::Result<Response> {
        let mut attempt = 1;
        loop {
            let result = request()
                .send()
                .await
                .and_then(Response::error_for_status);

            match result {
                Err(e) if attempt < self.retry.max_attempts && is_transient(&e) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        "Attempt {}/{} failed ({}), retrying in {:?}",
                        attempt, self.retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    if let Some(status) = err.status() {
        return status.is_server_error();
    }
    err.is_timeout() || err.is_connect() || err.is_request()
}
