//! Run configuration with builder pattern
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables (a `.env` file is loaded first when present). The
//! resulting [`SyncConfig`] is passed explicitly to everything that needs it.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://heritage.db";
pub const DEFAULT_SEED_PATH: &str = "seed_data.json";
pub const DEFAULT_REGION: &str = "ap-northeast-1";
pub const DEFAULT_BUCKET_DEV: &str = "meihe-villa-media-asia-dev";
pub const DEFAULT_BUCKET_PROD: &str = "meihe-villa-media-asia";
pub const DEFAULT_CLOUDFRONT_PROD: &str = "d34s20t5chx0dl.cloudfront.net";
pub const DEFAULT_GALLERY_PREFIX: &str = "images/gallery";
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// Deployment environment; selects the bucket and CloudFront domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => anyhow::bail!("unknown ENVIRONMENT '{}' (expected dev or prod)", other),
        }
    }
}

/// Object storage settings for the selected environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom endpoint (MinIO, LocalStack); addressed path style
    pub endpoint_url: Option<String>,
    pub cloudfront_domain: Option<String>,
}

/// Everything a run needs to know about its surroundings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: String,
    pub seed_path: PathBuf,
    pub environment: Environment,
    /// How long to wait for a store connection before failing the run
    pub acquire_timeout: Duration,
    /// Prefix scanned by media sync and kept by media prune
    pub gallery_prefix: String,
    pub s3: S3Config,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            seed_path: PathBuf::from(DEFAULT_SEED_PATH),
            environment: Environment::Dev,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            gallery_prefix: DEFAULT_GALLERY_PREFIX.to_string(),
            s3: S3Config {
                bucket: DEFAULT_BUCKET_DEV.to_string(),
                region: DEFAULT_REGION.to_string(),
                access_key_id: None,
                secret_access_key: None,
                endpoint_url: None,
                cloudfront_domain: None,
            },
        }
    }
}

/// On-disk configuration; every key is optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub database_url: Option<String>,
    pub seed_path: Option<PathBuf>,
    pub environment: Option<Environment>,
    pub acquire_timeout_secs: Option<u64>,
    pub gallery_prefix: Option<String>,
    pub s3: S3File,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct S3File {
    pub region: Option<String>,
    pub bucket_dev: Option<String>,
    pub bucket_prod: Option<String>,
    pub cloudfront_domain_dev: Option<String>,
    pub cloudfront_domain_prod: Option<String>,
    pub endpoint_url: Option<String>,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration file")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("In {}", path.display()))
    }
}

/// Default location of the configuration file
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("heritage-sync").join("config.toml"))
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::new()
    }

    /// Load configuration from `.env`, the config file and the process
    /// environment
    ///
    /// An explicit `path` must exist; the default path is used only when
    /// present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Ok(env_file) = dotenvy::dotenv() {
            log::debug!("Loaded environment from {}", env_file.display());
        }

        let file = match path {
            Some(path) => Some(ConfigFile::read(path)?),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => {
                    log::debug!("Using config file {}", path.display());
                    Some(ConfigFile::read(&path)?)
                }
                None => None,
            },
        };

        Self::from_sources(file.unwrap_or_default(), |name| std::env::var(name).ok())
    }

    /// Combine defaults, a parsed config file and an environment lookup
    pub fn from_sources(file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());

        let environment = match env("ENVIRONMENT") {
            Some(raw) => raw.parse()?,
            None => file.environment.unwrap_or_default(),
        };

        let acquire_timeout_secs = match env("DB_ACQUIRE_TIMEOUT_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("DB_ACQUIRE_TIMEOUT_SECS is not a number: {raw}"))?,
            None => file
                .acquire_timeout_secs
                .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        };

        let (bucket, cloudfront) = match environment {
            Environment::Dev => (
                env("S3_BUCKET_DEV")
                    .or(file.s3.bucket_dev)
                    .unwrap_or_else(|| DEFAULT_BUCKET_DEV.to_string()),
                env("CLOUDFRONT_DOMAIN_DEV").or(file.s3.cloudfront_domain_dev),
            ),
            Environment::Prod => (
                env("S3_BUCKET_PROD")
                    .or(file.s3.bucket_prod)
                    .unwrap_or_else(|| DEFAULT_BUCKET_PROD.to_string()),
                env("CLOUDFRONT_DOMAIN_PROD")
                    .or(file.s3.cloudfront_domain_prod)
                    .or_else(|| Some(DEFAULT_CLOUDFRONT_PROD.to_string())),
            ),
        };

        let s3 = S3Config {
            bucket,
            region: env("AWS_REGION")
                .or(file.s3.region)
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            access_key_id: env("AWS_ACCESS_KEY_ID"),
            secret_access_key: env("AWS_SECRET_ACCESS_KEY"),
            endpoint_url: env("S3_ENDPOINT_URL").or(file.s3.endpoint_url),
            cloudfront_domain: cloudfront,
        };

        let mut builder = SyncConfig::builder()
            .environment(environment)
            .acquire_timeout(Duration::from_secs(acquire_timeout_secs))
            .s3(s3);
        if let Some(url) = env("DATABASE_URL").or(file.database_url) {
            builder = builder.database_url(url);
        }
        if let Some(path) = env("SEED_DATA_PATH").map(PathBuf::from).or(file.seed_path) {
            builder = builder.seed_path(path);
        }
        if let Some(prefix) = file.gallery_prefix {
            builder = builder.gallery_prefix(prefix);
        }

        Ok(builder.build())
    }
}

/// Builder for [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: SyncConfig::default(),
        }
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn seed_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.seed_path = path.into();
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    pub fn gallery_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.gallery_prefix = prefix.into();
        self
    }

    pub fn s3(mut self, s3: S3Config) -> Self {
        self.config.s3 = s3;
        self
    }

    pub fn build(self) -> SyncConfig {
        self.config
    }
}

impl Default for SyncConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
