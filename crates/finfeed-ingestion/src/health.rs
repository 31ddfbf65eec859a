//! Per-source health tracking with an automatic circuit breaker.
//!
//! A source is disabled once `threshold` consecutive failures accumulate while
//! it is enabled, and re-enabled by its next success. Every mutation is
//! persisted through a [`HealthStore`] before the in-memory view changes, so
//! both views agree whenever a public method returns.
//!
//! Concurrency:
//! - one async mutex per source serialises read-modify-write of its record
//! - `reset_all` takes an exclusive lock that waits out in-flight updates

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::keyed_lock::KeyedMutex;

pub const DEFAULT_DISABLE_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("failed to persist feed health: {0}")]
    Persist(String),

    #[error("failed to load feed health: {0}")]
    Load(String),
}

// ── Records ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedHealthRecord {
    pub source: String,
    pub enabled: bool,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_http_status: Option<u16>,
    pub last_status: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub disabled_at: Option<DateTime<Utc>>,
    pub disabled_reason: Option<String>,
}

impl FeedHealthRecord {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            enabled: true,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_http_status: None,
            last_status: None,
            last_checked_at: None,
            last_success_at: None,
            disabled_at: None,
            disabled_reason: None,
        }
    }
}

/// One fetch result for a source.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub success: bool,
    pub http_status: Option<u16>,
    pub error: Option<&'a str>,
}

impl<'a> Observation<'a> {
    pub fn success(http_status: Option<u16>) -> Self {
        Self { success: true, http_status, error: None }
    }

    pub fn failure(http_status: Option<u16>, error: Option<&'a str>) -> Self {
        Self { success: false, http_status, error }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Disabled,
    Reenabled,
}

/// Pure state machine step.
pub fn apply_observation(
    record: &mut FeedHealthRecord,
    obs: &Observation<'_>,
    threshold: u32,
    now: DateTime<Utc>,
) -> Transition {
    record.last_checked_at = Some(now);
    record.last_http_status = obs.http_status;

    if obs.success {
        record.consecutive_failures = 0;
        record.total_successes += 1;
        record.last_status = Some("success".to_string());
        record.last_success_at = Some(now);
        if !record.enabled {
            record.enabled = true;
            record.disabled_at = None;
            record.disabled_reason = None;
            return Transition::Reenabled;
        }
        return Transition::Unchanged;
    }

    record.consecutive_failures += 1;
    record.total_failures += 1;
    let cause = match (obs.error, obs.http_status) {
        (Some(e), _) => e.to_string(),
        (None, Some(code)) => code.to_string(),
        (None, None) => "unknown".to_string(),
    };
    record.last_status = Some(format!("failed: {cause}"));

    if record.enabled && record.consecutive_failures >= threshold {
        record.enabled = false;
        record.disabled_at = Some(now);
        record.disabled_reason = Some(format!(
            "Auto-disabled after {} consecutive failures. Last error: {}",
            record.consecutive_failures, cause
        ));
        return Transition::Disabled;
    }
    Transition::Unchanged
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[async_trait]
pub trait HealthStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, FeedHealthRecord>, HealthError>;
    async fn upsert(&self, record: &FeedHealthRecord) -> Result<(), HealthError>;
    async fn clear(&self) -> Result<(), HealthError>;
}

/// All records in one pretty-printed JSON object keyed by source.
pub struct JsonFileHealthStore {
    path: PathBuf,
    // Mirror of the file contents; guards whole-file rewrites.
    on_disk: tokio::sync::Mutex<Option<BTreeMap<String, FeedHealthRecord>>>,
}

impl JsonFileHealthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), on_disk: tokio::sync::Mutex::new(None) }
    }

    async fn read_file(&self) -> Result<BTreeMap<String, FeedHealthRecord>, HealthError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(BTreeMap::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| HealthError::Load(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(HealthError::Load(format!("{}: {e}", self.path.display()))),
        }
    }

    async fn write_file(&self, records: &BTreeMap<String, FeedHealthRecord>) -> Result<(), HealthError> {
        let json = serde_json::to_vec_pretty(records).map_err(|e| HealthError::Persist(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HealthError::Persist(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| HealthError::Persist(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| HealthError::Persist(e.to_string()))
    }
}

#[async_trait]
impl HealthStore for JsonFileHealthStore {
    async fn load_all(&self) -> Result<HashMap<String, FeedHealthRecord>, HealthError> {
        let records = self.read_file().await?;
        debug!(path = %self.path.display(), sources = records.len(), "Loaded feed health");
        let out = records.clone().into_iter().collect();
        *self.on_disk.lock().await = Some(records);
        Ok(out)
    }

    async fn upsert(&self, record: &FeedHealthRecord) -> Result<(), HealthError> {
        let mut guard = self.on_disk.lock().await;
        let mut next = match guard.take() {
            Some(current) => current,
            None => self.read_file().await?,
        };
        let previous = next.insert(record.source.clone(), record.clone());
        match self.write_file(&next).await {
            Ok(()) => {
                *guard = Some(next);
                Ok(())
            }
            Err(e) => {
                match previous {
                    Some(old) => next.insert(record.source.clone(), old),
                    None => next.remove(&record.source),
                };
                *guard = Some(next);
                Err(e)
            }
        }
    }

    async fn clear(&self) -> Result<(), HealthError> {
        let mut guard = self.on_disk.lock().await;
        self.write_file(&BTreeMap::new()).await?;
        *guard = Some(BTreeMap::new());
        Ok(())
    }
}

/// Non-durable store with a switch that makes writes fail.
#[derive(Default)]
pub struct MemoryHealthStore {
    records: Mutex<HashMap<String, FeedHealthRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryHealthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> HashMap<String, FeedHealthRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_writable(&self) -> Result<(), HealthError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(HealthError::Persist("injected write failure".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    async fn load_all(&self) -> Result<HashMap<String, FeedHealthRecord>, HealthError> {
        Ok(self.snapshot())
    }

    async fn upsert(&self, record: &FeedHealthRecord) -> Result<(), HealthError> {
        self.check_writable()?;
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(record.source.clone(), record.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), HealthError> {
        self.check_writable()?;
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
        Ok(())
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FailingSource {
    pub source: String,
    pub consecutive_failures: u32,
    pub last_status: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HealthReport {
    pub total_tracked: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub top_failing: Vec<FailingSource>,
}

// ── Tracker ───────────────────────────────────────────────────────────────────

pub struct FeedHealthTracker {
    store: Arc<dyn HealthStore>,
    threshold: u32,
    records: Mutex<HashMap<String, FeedHealthRecord>>,
    source_locks: KeyedMutex,
    epoch: RwLock<()>,
}

impl FeedHealthTracker {
    /// Load persisted records and build a tracker.
    pub async fn open(store: Arc<dyn HealthStore>, threshold: u32) -> Result<Self, HealthError> {
        let records = store.load_all().await?;
        info!(sources = records.len(), threshold, "Feed health tracker ready");
        Ok(Self {
            store,
            threshold: threshold.max(1),
            records: Mutex::new(records),
            source_locks: KeyedMutex::new(),
            epoch: RwLock::new(()),
        })
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, FeedHealthRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Unseen sources are enabled.
    pub fn is_enabled(&self, source: &str) -> bool {
        self.records().get(source).map(|r| r.enabled).unwrap_or(true)
    }

    pub fn record(&self, source: &str) -> Option<FeedHealthRecord> {
        self.records().get(source).cloned()
    }

    /// Keep only enabled sources, preserving order.
    pub fn filter_enabled(&self, sources: &[String]) -> Vec<String> {
        let (enabled, skipped): (Vec<String>, Vec<String>) =
            sources.iter().cloned().partition(|s| self.is_enabled(s));
        if !skipped.is_empty() {
            info!(enabled = enabled.len(), disabled = skipped.len(), "Feed health: skipping disabled sources");
            for source in skipped.iter().take(5) {
                if let Some(r) = self.record(source) {
                    debug!(
                        source = %source,
                        failures = r.consecutive_failures,
                        reason = r.disabled_reason.as_deref().unwrap_or("N/A"),
                        "Skipped"
                    );
                }
            }
        }
        enabled
    }

    /// Apply one fetch result to `source`, persist it, then publish it in memory.
    pub async fn record_result(&self, source: &str, obs: Observation<'_>) -> Result<Transition, HealthError> {
        let _epoch = self.epoch.read().await;
        let _guard = self.source_locks.lock(source).await;

        let mut next = self.record(source).unwrap_or_else(|| FeedHealthRecord::new(source));
        let transition = apply_observation(&mut next, &obs, self.threshold, Utc::now());
        self.store.upsert(&next).await?;

        match transition {
            Transition::Disabled => warn!(
                source = %source,
                failures = next.consecutive_failures,
                "Source auto-disabled"
            ),
            Transition::Reenabled => info!(source = %source, "Source re-enabled after success"),
            Transition::Unchanged => {}
        }
        self.records().insert(source.to_string(), next);
        Ok(transition)
    }

    /// Re-enable `source` and zero its counters. Returns false for unknown sources.
    pub async fn reset(&self, source: &str) -> Result<bool, HealthError> {
        let _epoch = self.epoch.read().await;
        let _guard = self.source_locks.lock(source).await;

        let Some(mut next) = self.record(source) else {
            return Ok(false);
        };
        next.enabled = true;
        next.consecutive_failures = 0;
        next.total_successes = 0;
        next.total_failures = 0;
        next.disabled_at = None;
        next.disabled_reason = None;
        self.store.upsert(&next).await?;
        self.records().insert(source.to_string(), next);
        info!(source = %source, "Feed health reset");
        Ok(true)
    }

    /// Forget every record.
    pub async fn reset_all(&self) -> Result<(), HealthError> {
        let _epoch = self.epoch.write().await;
        self.store.clear().await?;
        self.records().clear();
        info!("All feed health data reset");
        Ok(())
    }

    /// Totals plus up to `top_n` sources with current failures, worst first.
    pub fn health_report(&self, top_n: usize) -> HealthReport {
        let records = self.records();
        let total_tracked = records.len();
        let enabled = records.values().filter(|r| r.enabled).count();

        let mut failing: Vec<&FeedHealthRecord> =
            records.values().filter(|r| r.consecutive_failures > 0).collect();
        failing.sort_by(|a, b| {
            b.consecutive_failures
                .cmp(&a.consecutive_failures)
                .then_with(|| a.source.cmp(&b.source))
        });

        HealthReport {
            total_tracked,
            enabled,
            disabled: total_tracked - enabled,
            top_failing: failing
                .into_iter()
                .take(top_n)
                .map(|r| FailingSource {
                    source: r.source.clone(),
                    consecutive_failures: r.consecutive_failures,
                    last_status: r.last_status.clone(),
                    enabled: r.enabled,
                })
                .collect(),
        }
    }
}
