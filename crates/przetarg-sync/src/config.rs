use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use przetarg_adapters::{
    EZAMOWIENIA_NOTICE_URL, PLATFORMAZAKUPOWA_BASE_URL, PLATFORMAZAKUPOWA_EXPORT_URL,
};
use przetarg_core::Source;
use przetarg_storage::{BackoffPolicy, HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://przetargi.db?mode=rwc";
pub const DEFAULT_USER_AGENT: &str = concat!("przetarg-bot/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub database_url: String,
    pub download_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub web_port: u16,
    pub sources_file: PathBuf,
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset or unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            download_dir: lookup("PRZETARG_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./platformazakupowa")),
            scheduler_enabled: lookup("PRZETARG_SCHEDULER_ENABLED")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),
            user_agent: lookup("PRZETARG_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parsed(&lookup, "PRZETARG_HTTP_TIMEOUT_SECS").unwrap_or(30),
            http_max_retries: parsed(&lookup, "PRZETARG_HTTP_MAX_RETRIES").unwrap_or(2),
            web_port: parsed(&lookup, "PRZETARG_WEB_PORT").unwrap_or(3000),
            sources_file: lookup("PRZETARG_SOURCES_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("sources.yaml")),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            backoff: BackoffPolicy {
                max_retries: self.http_max_retries,
                ..BackoffPolicy::default()
            },
        }
    }

    pub fn http_fetcher(&self) -> Result<HttpFetcher> {
        HttpFetcher::new(self.http_client_config())
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CsvExport,
    JsonApi,
}

impl SourceKind {
    pub fn for_source(source: Source) -> Self {
        match source {
            Source::PlatformaZakupowa => SourceKind::CsvExport,
            Source::Ezamowienia => SourceKind::JsonApi,
        }
    }
}

/// One entry of `sources.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    pub source_id: Source,
    pub kind: SourceKind,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub url: Option<String>,
    /// Root of the tender detail pages scanned for attachments (CSV sources only).
    #[serde(default)]
    pub detail_base_url: Option<String>,
    #[serde(default = "default_schedule_minute")]
    pub schedule_minute: u32,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
}

fn enabled_by_default() -> bool {
    true
}

fn default_schedule_minute() -> u32 {
    15
}

fn default_lookback_days() -> u32 {
    1
}

impl SourceConfig {
    pub fn new(source_id: Source) -> Self {
        Self {
            source_id,
            kind: SourceKind::for_source(source_id),
            enabled: true,
            url: None,
            detail_base_url: None,
            schedule_minute: default_schedule_minute(),
            lookback_days: default_lookback_days(),
        }
    }

    pub fn url(&self) -> &str {
        match (&self.url, self.source_id) {
            (Some(url), _) => url,
            (None, Source::PlatformaZakupowa) => PLATFORMAZAKUPOWA_EXPORT_URL,
            (None, Source::Ezamowienia) => EZAMOWIENIA_NOTICE_URL,
        }
    }

    pub fn detail_base_url(&self) -> &str {
        self.detail_base_url
            .as_deref()
            .unwrap_or(PLATFORMAZAKUPOWA_BASE_URL)
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.schedule_minute < 60,
            "{}: schedule_minute must be in 0..=59, got {}",
            self.source_id,
            self.schedule_minute
        );
        ensure!(
            self.kind == SourceKind::for_source(self.source_id),
            "{}: kind {:?} does not match the source",
            self.source_id,
            self.kind
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

impl Default for SourceRegistry {
    /// CSV export hourly at :15; the JSON feed is only relayed on demand.
    fn default() -> Self {
        let mut ezamowienia = SourceConfig::new(Source::Ezamowienia);
        ezamowienia.enabled = false;
        Self {
            sources: vec![SourceConfig::new(Source::PlatformaZakupowa), ezamowienia],
        }
    }
}

impl SourceRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: SourceRegistry = serde_yaml::from_str(text).context("parsing source registry")?;
        registry.validate()?;
        Ok(registry)
    }

    /// Reads the registry file; a missing file yields the built-in defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(text) => {
                Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no source registry found, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, source) in self.sources.iter().enumerate() {
            source.validate()?;
            ensure!(
                !self.sources[..idx]
                    .iter()
                    .any(|other| other.source_id == source.source_id),
                "{} is listed more than once",
                source.source_id
            );
        }
        Ok(())
    }

    pub fn get(&self, source: Source) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source)
    }

    pub fn enabled(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
