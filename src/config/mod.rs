//! Application Configuration
//!
//! Service settings stored in TOML format. Every section has defaults, so a
//! partial file only needs the keys it overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::vision::decode::DecodeParams;
use crate::vision::ResizePolicy;

/// Service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,
    /// Detector settings
    pub model: ModelConfig,
    /// Artifact storage settings
    pub storage: StorageConfig,
    /// Catalog and results API settings
    pub remote: RemoteConfig,
    /// Retry policy for idempotent remote calls
    pub retry: RetryConfig,
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8769,
        }
    }
}

impl ServerConfig {
    /// Socket address to bind
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}

/// Detector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Checkpoint directory holding the `checkpoint` state file
    pub checkpoint_path: PathBuf,
    /// Maximum number of loaded predictors kept in memory
    pub cache_capacity: usize,
    /// Intra-op threads for ONNX Runtime
    pub intra_threads: usize,
    /// Expected SHA256 of the model file (skip verification when unset)
    pub sha256: Option<String>,
    /// Load the predictor at startup instead of on the first request
    pub preload: bool,
    /// Minimum score-map value for a cell to restore a box
    pub score_map_thresh: f32,
    /// Minimum mean score under a final box
    pub box_thresh: f32,
    /// IoU above which boxes are merged or suppressed
    pub nms_thresh: f32,
    /// Longest working-image side before snapping
    pub max_side_len: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from("./tmp/east_icdar2015_resnet_v1_50_rbox/"),
            cache_capacity: 1,
            intra_threads: 4,
            sha256: None,
            preload: false,
            score_map_thresh: 0.8,
            box_thresh: 0.1,
            nms_thresh: 0.2,
            max_side_len: 2400,
        }
    }
}

impl ModelConfig {
    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams {
            score_map_thresh: self.score_map_thresh,
            box_thresh: self.box_thresh,
            nms_thresh: self.nms_thresh,
        }
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        ResizePolicy {
            max_side_len: self.max_side_len,
            ..ResizePolicy::default()
        }
    }
}

/// Artifact storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for session directories
    pub results_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_root: PathBuf::from("static/results"),
        }
    }
}

/// Catalog and results API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the menu image catalog; ids are appended as a path segment
    pub catalog_url: String,
    /// Endpoint receiving detection reports
    pub results_url: String,
    /// Local manifest listing the menu ids to look up
    pub manifest_path: PathBuf,
    /// Per-request timeout
    pub request_timeout_secs: u64,
    /// Connection establishment timeout
    pub connect_timeout_secs: u64,
    /// Largest image body accepted from a download
    pub max_image_bytes: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            catalog_url: "https://2vdqlmfjbk.execute-api.us-west-2.amazonaws.com/dev/menuimage"
                .to_string(),
            results_url: "https://2vdqlmfjbk.execute-api.us-west-2.amazonaws.com/dev/menujson"
                .to_string(),
            manifest_path: PathBuf::from("./tmp/menuIDs.json"),
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            max_image_bytes: 32 * 1024 * 1024,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Retry policy for catalog lookups and image downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first (1 disables retry)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further attempt
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {:?}", path))?;
    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse config {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
