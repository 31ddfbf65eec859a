//! Configuration loading for Finfeed.
//! Reads finfeed.toml from the current directory or path in FINFEED_CONFIG env var.
//! A handful of environment variables override the file after it is read.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use finfeed_common::sandbox::{SandboxConfig, DEFAULT_USER_AGENT};
use finfeed_ingestion::dedup::DedupConfig;
use finfeed_ingestion::pipeline::{IngestionJob, RunConfig};
use finfeed_ingestion::sources::rss::feeds_for_ticker;
use finfeed_ingestion::FetchConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub dedup: DedupSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub ledger: LedgerSection,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub sources: SourcesSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_delay_min_ms")]
    pub delay_min_ms: u64,
    #[serde(default = "default_delay_max_ms")]
    pub delay_max_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Empty allows every host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

fn default_max_attempts()   -> u32    { 3 }
fn default_backoff_min_ms() -> u64    { 2_000 }
fn default_backoff_max_ms() -> u64    { 30_000 }
fn default_timeout_secs()   -> u64    { 30 }
fn default_delay_min_ms()   -> u64    { 1_000 }
fn default_delay_max_ms()   -> u64    { 5_000 }
fn default_user_agent()     -> String { DEFAULT_USER_AGENT.to_string() }

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            timeout_secs: default_timeout_secs(),
            delay_min_ms: default_delay_min_ms(),
            delay_max_ms: default_delay_max_ms(),
            user_agent: default_user_agent(),
            allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSection {
    #[serde(default = "default_disable_threshold")]
    pub disable_threshold: u32,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_report_top_n")]
    pub report_top_n: usize,
}

fn default_disable_threshold() -> u32    { 3 }
fn default_state_file()        -> String { "feeds_health.json".to_string() }
fn default_report_top_n()      -> usize  { 10 }

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            disable_threshold: default_disable_threshold(),
            state_file: default_state_file(),
            report_top_n: default_report_top_n(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupSection {
    #[serde(default = "default_title_similarity")]
    pub title_similarity_threshold: f64,
    #[serde(default = "default_max_titles")]
    pub max_titles_per_run: usize,
}

fn default_title_similarity() -> f64   { 0.80 }
fn default_max_titles()       -> usize { 5_000 }

impl Default for DedupSection {
    fn default() -> Self {
        Self {
            title_similarity_threshold: default_title_similarity(),
            max_titles_per_run: default_max_titles(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_root")]
    pub root: String,
}

fn default_storage_root() -> String { "data/raw".to_string() }

impl Default for StorageSection {
    fn default() -> Self {
        Self { root: default_storage_root() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSection {
    /// PostgreSQL URL. Without one the ledger lives in memory for the run.
    pub database_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Default for LedgerSection {
    fn default() -> Self {
        Self { database_url: None, max_connections: default_max_connections() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Report links downloaded per IR page.
    pub download_limit: Option<usize>,
}

fn default_workers()       -> usize { 4 }
fn default_deadline_secs() -> u64   { 900 }

impl Default for RunSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            deadline_secs: default_deadline_secs(),
            download_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesSection {
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default)]
    pub ir_pages: Vec<String>,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default = "default_filing_forms")]
    pub filing_forms: Vec<String>,
    #[serde(default = "default_max_filings")]
    pub max_filings: usize,
}

fn default_filing_forms() -> Vec<String> {
    vec!["10-K".to_string(), "10-Q".to_string(), "8-K".to_string()]
}
fn default_max_filings() -> usize { 5 }

impl Default for SourcesSection {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            ir_pages: Vec::new(),
            tickers: Vec::new(),
            filing_forms: default_filing_forms(),
            max_filings: default_max_filings(),
        }
    }
}


impl Config {
    /// Load configuration from finfeed.toml.
    /// Checks FINFEED_CONFIG env var first, then current directory.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("FINFEED_CONFIG")
            .unwrap_or_else(|_| "finfeed.toml".to_string());

        if !Path::new(&path).exists() {
            anyhow::bail!(
                "Config file not found: {}\n\
                 Copy finfeed.example.toml to finfeed.toml and edit it.",
                path
            );
        }

        let content = std::fs::read_to_string(&path)?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `FINFEED_*` and `DATABASE_URL` overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(key: &str, raw: Option<String>) -> Option<T> {
            let raw = raw?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    warn!(key, value = %raw, "Ignoring unparseable environment override");
                    None
                }
            }
        }

        if let Some(v) = parsed("FINFEED_RATE_LIMIT_MIN_MS", lookup("FINFEED_RATE_LIMIT_MIN_MS")) {
            self.fetch.delay_min_ms = v;
        }
        if let Some(v) = parsed("FINFEED_RATE_LIMIT_MAX_MS", lookup("FINFEED_RATE_LIMIT_MAX_MS")) {
            self.fetch.delay_max_ms = v;
        }
        if let Some(v) = parsed("FINFEED_MAX_RETRIES", lookup("FINFEED_MAX_RETRIES")) {
            self.fetch.max_attempts = v;
        }
        if let Some(v) = parsed("FINFEED_REQUEST_TIMEOUT_SECS", lookup("FINFEED_REQUEST_TIMEOUT_SECS")) {
            self.fetch.timeout_secs = v;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            self.ledger.database_url = Some(url);
        }
    }

    pub fn fetch_config(&self) -> FetchConfig {
        let f = &self.fetch;
        FetchConfig {
            max_attempts: f.max_attempts.max(1),
            backoff_min: Duration::from_millis(f.backoff_min_ms),
            backoff_max: Duration::from_millis(f.backoff_max_ms.max(f.backoff_min_ms)),
            timeout: Duration::from_secs(f.timeout_secs),
            delay_min: Duration::from_millis(f.delay_min_ms),
            delay_max: Duration::from_millis(f.delay_max_ms.max(f.delay_min_ms)),
        }
    }

    pub fn sandbox_config(&self) -> SandboxConfig {
        SandboxConfig {
            user_agent: self.fetch.user_agent.clone(),
            // The fetcher enforces the per-call timeout; this only caps runaway requests.
            timeout: Duration::from_secs(self.fetch.timeout_secs.saturating_mul(2).max(1)),
            allowed_hosts: self.fetch.allowed_hosts.clone(),
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            title_threshold: self.dedup.title_similarity_threshold,
            max_titles: self.dedup.max_titles_per_run,
        }
    }

    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            workers: self.run.workers.max(1),
            deadline: Duration::from_secs(self.run.deadline_secs),
            download_limit: self.run.download_limit,
            report_top_n: self.health.report_top_n,
        }
    }

    /// One job for the configured feeds, pages and filings, then one
    /// feed job per ticker so its items default to that ticker.
    pub fn ingestion_jobs(&self) -> Vec<IngestionJob> {
        let s = &self.sources;
        let mut jobs = vec![IngestionJob {
            feeds: s.feeds.clone(),
            ir_pages: s.ir_pages.clone(),
            tickers: s.tickers.clone(),
            filing_forms: s.filing_forms.clone(),
            max_filings: s.max_filings,
            ..IngestionJob::default()
        }];
        for ticker in &s.tickers {
            jobs.push(IngestionJob {
                feeds: feeds_for_ticker(ticker, &[]),
                default_ticker: Some(ticker.clone()),
                ..IngestionJob::default()
            });
        }
        jobs
    }
}
