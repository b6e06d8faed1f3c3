use crate::{Error, Result};
use std::time::Duration;

pub const DEFAULT_JQL: &str = r#"project = Hardware AND assignee = Empty AND status = "Ready to Fabricate" AND Machinery = "CNC Router""#;
pub const DEFAULT_BUCKET: &str = "autocam-attachments";
pub const DEFAULT_ARTIFACT_PREFIX: &str = "Valor";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Jira custom field ids holding the part attributes; they differ per site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JiraFieldMap {
    pub epic: String,
    pub quantity: String,
    pub material: String,
    pub thickness: String,
}

impl Default for JiraFieldMap {
    fn default() -> Self {
        Self {
            epic: "customfield_10110".to_string(),
            quantity: "customfield_10206".to_string(),
            material: "customfield_10202".to_string(),
            thickness: "customfield_10207".to_string(),
        }
    }
}

impl JiraFieldMap {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            epic: optional(lookup, "JIRA_EPIC_FIELD").unwrap_or(defaults.epic),
            quantity: optional(lookup, "JIRA_QUANTITY_FIELD").unwrap_or(defaults.quantity),
            material: optional(lookup, "JIRA_MATERIAL_FIELD").unwrap_or(defaults.material),
            thickness: optional(lookup, "JIRA_THICKNESS_FIELD").unwrap_or(defaults.thickness),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JiraConfig {
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Filter selecting the work items that should exist downstream.
    pub jql: String,
    pub page_size: u32,
    pub timeout: Duration,
    pub fields: JiraFieldMap,
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Falls back to the AWS default region chain when unset.
    pub region: Option<String>,
    /// Optional custom endpoint (e.g. MinIO).
    pub endpoint: Option<String>,
    /// Static credentials; both must be set or the AWS default chain is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    pub artifact_prefix: String,
    pub item_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SYNC_INTERVAL,
            artifact_prefix: DEFAULT_ARTIFACT_PREFIX.to_string(),
            item_concurrency: 1,
        }
    }
}

/// Full runtime configuration, sourced from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jira: JiraConfig,
    pub postgres: PostgresConfig,
    pub s3: S3Config,
    pub sync: SyncConfig,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput(format!("{key} is required")))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match optional(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| Error::InvalidInput(format!("{key} is not a valid number: {raw:?}"))),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

impl JiraConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            server_url: required(lookup, "JIRA_SERVER")?
                .trim_end_matches('/')
                .to_string(),
            username: required(lookup, "JIRA_USERNAME")?,
            password: required(lookup, "JIRA_PASSWORD")?,
            jql: optional(lookup, "JIRA_JQL").unwrap_or_else(|| DEFAULT_JQL.to_string()),
            page_size: parsed(lookup, "JIRA_PAGE_SIZE", 50u32)?,
            timeout: Duration::from_secs(parsed(lookup, "JIRA_TIMEOUT_SECS", 30u64)?),
            fields: JiraFieldMap::from_lookup(lookup),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "jira.server_url must be an http(s) URL: {}",
                self.server_url
            )));
        }
        if self.page_size == 0 {
            return Err(Error::InvalidInput(
                "jira.page_size must be > 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidInput("jira.timeout must be > 0".to_string()));
        }
        Ok(())
    }
}

impl PostgresConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            host: required(lookup, "POSTGRES_HOST")?,
            port: parsed(lookup, "POSTGRES_PORT", 5432u16)?,
            database: required(lookup, "POSTGRES_DB")?,
            user: required(lookup, "POSTGRES_USER")?,
            password: required(lookup, "POSTGRES_PASSWORD")?,
            max_connections: parsed(lookup, "POSTGRES_MAX_CONNECTIONS", 5u32)?,
            acquire_timeout: Duration::from_millis(parsed(
                lookup,
                "POSTGRES_ACQUIRE_TIMEOUT_MS",
                5_000u64,
            )?),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(Error::InvalidInput(
                "postgres.max_connections must be > 0".to_string(),
            ));
        }
        if self.acquire_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "postgres.acquire_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl S3Config {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cfg = Self {
            bucket: optional(lookup, "AUTOCAM_S3_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.into()),
            region: optional(lookup, "AWS_REGION"),
            endpoint: optional(lookup, "AUTOCAM_S3_ENDPOINT"),
            access_key_id: optional(lookup, "AWS_ACCESS_KEY_ID"),
            secret_access_key: optional(lookup, "AWS_SECRET_ACCESS_KEY"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(Error::InvalidInput("s3.bucket is empty".to_string()));
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(Error::InvalidInput(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

impl SyncConfig {
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let cfg = Self {
            interval: Duration::from_secs(parsed(
                lookup,
                "AUTOCAM_SYNC_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            artifact_prefix: optional(lookup, "AUTOCAM_ARTIFACT_PREFIX")
                .unwrap_or(defaults.artifact_prefix),
            item_concurrency: parsed(
                lookup,
                "AUTOCAM_ITEM_CONCURRENCY",
                defaults.item_concurrency,
            )?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidInput("sync.interval must be > 0".to_string()));
        }
        if self.item_concurrency == 0 {
            return Err(Error::InvalidInput(
                "sync.item_concurrency must be > 0".to_string(),
            ));
        }
        if self.artifact_prefix.contains('-') || self.artifact_prefix.contains('/') {
            return Err(Error::InvalidInput(format!(
                "sync.artifact_prefix must not contain '-' or '/': {}",
                self.artifact_prefix
            )));
        }
        Ok(())
    }
}

impl AppConfig {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    /// Build the configuration from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            jira: JiraConfig::from_lookup(lookup)?,
            postgres: PostgresConfig::from_lookup(lookup)?,
            s3: S3Config::from_lookup(lookup)?,
            sync: SyncConfig::from_lookup(lookup)?,
        })
    }
}
