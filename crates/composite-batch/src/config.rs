//! Configuration for the compositing service

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositeConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Remote compositor configuration
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Batch processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Session lifetime configuration
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Local storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
}

impl CompositeConfig {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&raw)?
            }
            None => Self::default(),
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("Invalid configuration: {}", e)))
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("COMPOSITE_API_KEY") {
            if !key.trim().is_empty() {
                self.remote.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("COMPOSITE_REMOTE_URL") {
            self.remote.base_url = url;
        }
        if let Ok(host) = std::env::var("COMPOSITE_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("COMPOSITE_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid COMPOSITE_PORT '{}'", port),
            }
        }
        if let Ok(dir) = std::env::var("COMPOSITE_STORAGE_DIR") {
            self.storage.root = PathBuf::from(dir);
        }
    }

    /// Reject settings the dispatcher cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.processing.chunk_size == 0 {
            return Err(Error::Config("processing.chunk_size must be at least 1".to_string()));
        }
        if self.processing.worker_width == 0 {
            return Err(Error::Config("processing.worker_width must be at least 1".to_string()));
        }
        if self.remote.max_attempts == 0 {
            return Err(Error::Config("remote.max_attempts must be at least 1".to_string()));
        }
        if !(self.remote.safety_margin > 0.0 && self.remote.safety_margin <= 1.0) {
            return Err(Error::Config(format!(
                "remote.safety_margin must be in (0, 1], got {}",
                self.remote.safety_margin
            )));
        }
        if self.remote.pixel_limit == 0 {
            return Err(Error::Config("remote.pixel_limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Maximum upload size in bytes (default: 512MB)
    pub max_upload_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_upload_size: 512 * 1024 * 1024, // 512MB
        }
    }
}

/// Remote compositor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Compositor endpoint
    pub base_url: String,
    /// API credential, usually supplied through COMPOSITE_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    /// Wall-clock timeout per call in seconds
    pub timeout_secs: u64,
    /// Attempts per task, including the first
    pub max_attempts: u32,
    /// Base delay for exponential backoff in milliseconds
    pub base_delay_ms: u64,
    /// Hard pixel limit enforced by the remote service
    pub pixel_limit: u64,
    /// Fraction of the hard limit actually used
    pub safety_margin: f64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9000/v1/composite".to_string(),
            api_key: None,
            timeout_secs: 120,
            max_attempts: 3,
            base_delay_ms: 1000,
            pixel_limit: 5_000_000,
            safety_margin: 0.9,
        }
    }
}

impl RemoteConfig {
    /// Return the API credential or a configuration error
    pub fn require_api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(Error::Config(
                "remote API key is not set (COMPOSITE_API_KEY)".to_string(),
            )),
        }
    }

    /// Pixel budget kept below the remote hard limit
    pub fn pixel_budget(&self) -> u64 {
        (self.pixel_limit as f64 * self.safety_margin).floor() as u64
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Batch processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Tasks per chunk; each chunk reloads the background
    pub chunk_size: usize,
    /// Simultaneous remote calls
    pub worker_width: usize,
    /// Threads for decode/resize/encode (default: CPU count, max 4)
    pub resize_workers: Option<usize>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            worker_width: 3,
            resize_workers: None,
        }
    }
}

impl ProcessingConfig {
    pub fn resize_workers(&self) -> usize {
        self.resize_workers
            .unwrap_or_else(|| num_cpus::get().min(4))
            .max(1)
    }
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Age after which a session is expired by the sweep
    pub ttl_secs: u64,
    /// Interval between sweeps
    pub sweep_interval_secs: u64,
    /// Delay between a finished download and storage reclaim
    pub reclaim_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
            reclaim_grace_secs: 30,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reclaim_grace(&self) -> Duration {
        Duration::from_secs(self.reclaim_grace_secs)
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for uploads and outputs
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use absolute path so spawned tasks never depend on the working directory
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/tmp")))
            .join("composite-batch");

        Self { root }
    }
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }
}
