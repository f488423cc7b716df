use std::env;
use std::path::Path;

use serde::Deserialize;

use crate::error::Result;

/// Full pipeline configuration.
///
/// Defaults mirror the local-development MinIO stack; an optional
/// `config.toml` and a fixed set of environment variables override them.
/// The struct is passed explicitly to every stage — nothing global.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Departments in scope for the whole pipeline (Hauts-de-Seine, Nord,
    /// Herault by default).
    pub departements: Vec<String>,
    pub store: StoreConfig,
    pub buckets: BucketConfig,
    pub dpe: DpeConfig,
    pub dvf: DvfConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BucketConfig {
    pub bronze: String,
    pub silver: String,
    pub gold: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DpeConfig {
    /// Paged-lines endpoint of the ADEME data-fair dataset.
    pub base_url: String,
    pub date_start: String,
    pub date_end: String,
    /// Rows per page; the API caps this at 10 000.
    pub page_size: u32,
    /// Token-bucket budget, ~7.5 requests per second.
    pub requests_per_min: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DvfConfig {
    pub source_dir: String,
    pub years: Vec<i32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            departements: vec!["92".to_string(), "59".to_string(), "34".to_string()],
            store: StoreConfig::default(),
            buckets: BucketConfig::default(),
            dpe: DpeConfig::default(),
            dvf: DvfConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".to_string(),
            access_key: "admin".to_string(),
            secret_key: "password123".to_string(),
            region: "us-east-1".to_string(),
        }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            bronze: "datalake-bronze".to_string(),
            silver: "datalake-silver".to_string(),
            gold: "datalake-gold".to_string(),
        }
    }
}

impl Default for DpeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe-france/lines"
                .to_string(),
            date_start: "2020-01-01".to_string(),
            date_end: "2021-06-30".to_string(),
            page_size: 10_000,
            requests_per_min: 450,
            max_retries: 6,
            timeout_secs: 60,
        }
    }
}

impl Default for DvfConfig {
    fn default() -> Self {
        Self {
            source_dir: "data/raw/dvf".to_string(),
            years: vec![2020, 2021],
        }
    }
}

impl PipelineConfig {
    /// Load configuration: defaults, then `config.toml` if present, then
    /// environment variables.
    pub fn load() -> Result<Self> {
        let mut config = match Path::new("config.toml").exists() {
            true => {
                let content = std::fs::read_to_string("config.toml")?;
                toml::from_str(&content)?
            }
            false => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Every environment override point, in one place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("MINIO_ENDPOINT") {
            self.store.endpoint = v;
        }
        if let Ok(v) = env::var("MINIO_ACCESS_KEY") {
            self.store.access_key = v;
        }
        if let Ok(v) = env::var("MINIO_SECRET_KEY") {
            self.store.secret_key = v;
        }
        if let Ok(v) = env::var("MINIO_REGION") {
            self.store.region = v;
        }
        if let Ok(v) = env::var("BRONZE_BUCKET") {
            self.buckets.bronze = v;
        }
        if let Ok(v) = env::var("SILVER_BUCKET") {
            self.buckets.silver = v;
        }
        if let Ok(v) = env::var("GOLD_BUCKET") {
            self.buckets.gold = v;
        }
        if let Ok(v) = env::var("DVF_SOURCE_DIR") {
            self.dvf.source_dir = v;
        }
    }
}
