use crate::retry::RetryConfig;
use crate::storage::{DEFAULT_CHUNK_SIZE, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_REGION: &str = "cn-north-1";
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
    pub retry: RetryConfig,
    pub listing: ListingConfig,
    pub reading: ReadingConfig,
    /// Upper bound on concurrent list/read calls in the fan-out helpers
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            retry: RetryConfig::default(),
            listing: ListingConfig::default(),
            reading: ReadingConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Store connection settings, bound once when the client is built
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub force_path_style: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_access_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "s3".to_string(),
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            profile: None,
            force_path_style: false,
            access_key_id: None,
            secret_access_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub page_size: usize,
    pub page_timeout_ms: u64,
    /// Overall deadline for one listing; unset means no deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            page_timeout_ms: 30_000,
            call_timeout_ms: None,
        }
    }
}

impl ListingConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    pub chunk_size: usize,
    pub chunk_timeout_ms: u64,
    /// Overall deadline for one read; unset means no deadline
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_timeout_ms: 30_000,
            call_timeout_ms: None,
        }
    }
}

impl ReadingConfig {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// Load a JSON or YAML file, picked by extension (`.yaml`/`.yml` for YAML)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let config: Config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => serde_yml::from_str(&content)?,
            _ => serde_json::from_str(&content)?,
        };
        Ok(config)
    }
}
