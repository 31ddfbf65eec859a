//! Fetch job ledger.
//!
//! Every fetch attempt gets a [`FetchJob`] row that moves forward through
//! [`JobState`] and is completed exactly once. The ledger also owns the
//! news item table, which is unique on item URL: a repeated insert returns
//! `None` instead of failing.
//!
//! [`MemoryLedger`] backs tests and database-less runs;
//! [`crate::pg_ledger::PgJobLedger`] is the PostgreSQL implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{FetchJob, JobCompletion, JobState, LedgerRecord, NewFetchJob, NewsItem};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("unknown job {0}")]
    UnknownJob(Uuid),

    #[error("job {id}: illegal transition {from} -> {to}")]
    InvalidTransition { id: Uuid, from: JobState, to: JobState },

    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Record a new `pending` job and return its id.
    async fn create(&self, job: NewFetchJob) -> Result<Uuid, LedgerError>;

    /// `pending → fetching`.
    async fn mark_fetching(&self, id: Uuid) -> Result<(), LedgerError>;

    /// Move a job into its terminal state. Rejects regressions and second completions.
    async fn complete(&self, id: Uuid, completion: JobCompletion) -> Result<(), LedgerError>;

    async fn get(&self, id: Uuid) -> Result<Option<FetchJob>, LedgerError>;

    /// Whether any `success` job carries this checksum.
    async fn has_successful_checksum(&self, checksum: &str) -> Result<bool, LedgerError>;

    /// Insert a news item; `None` when an item with the same canonical URL already exists.
    async fn insert_item(&self, item: &NewsItem) -> Result<Option<Uuid>, LedgerError>;

    /// Jobs in `state`, newest first.
    async fn jobs_by_state(&self, state: JobState, limit: usize) -> Result<Vec<FetchJob>, LedgerError>;

    /// Terminal jobs completed at or after `since`, oldest first.
    async fn completed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerRecord>, LedgerError>;
}

/// Rejects anything but a forward move out of a non-terminal state.
pub(crate) fn check_transition(id: Uuid, from: JobState, to: JobState) -> Result<(), LedgerError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition { id, from, to })
    }
}

// ── In-memory ledger ──────────────────────────────────────────────────────────

#[derive(Default)]
struct LedgerState {
    jobs: HashMap<Uuid, FetchJob>,
    job_order: Vec<Uuid>,
    /// Keyed by canonical URL.
    items_by_url: HashMap<String, Uuid>,
    items: Vec<(Uuid, NewsItem)>,
}

#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All jobs in creation order.
    pub fn jobs(&self) -> Vec<FetchJob> {
        let state = self.lock();
        state.job_order.iter().filter_map(|id| state.jobs.get(id).cloned()).collect()
    }

    /// All inserted items in insertion order.
    pub fn items(&self) -> Vec<NewsItem> {
        self.lock().items.iter().map(|(_, item)| item.clone()).collect()
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn create(&self, job: NewFetchJob) -> Result<Uuid, LedgerError> {
        let id = Uuid::new_v4();
        let row = FetchJob {
            id,
            source: job.source,
            ticker: job.ticker,
            doc_type: job.doc_type,
            url: job.url,
            state: JobState::Pending,
            http_status: None,
            checksum: None,
            stored_key: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut state = self.lock();
        state.jobs.insert(id, row);
        state.job_order.push(id);
        Ok(id)
    }

    async fn mark_fetching(&self, id: Uuid) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(LedgerError::UnknownJob(id))?;
        check_transition(id, job.state, JobState::Fetching)?;
        job.state = JobState::Fetching;
        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: JobCompletion) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let job = state.jobs.get_mut(&id).ok_or(LedgerError::UnknownJob(id))?;
        if !completion.state.is_terminal() {
            return Err(LedgerError::InvalidTransition { id, from: job.state, to: completion.state });
        }
        check_transition(id, job.state, completion.state)?;

        job.state = completion.state;
        job.http_status = completion.http_status;
        job.checksum = completion.checksum;
        job.stored_key = completion.stored_key;
        job.error = completion.error;
        job.completed_at = Some(Utc::now());
        debug!(job_id = %id, state = %job.state, "Job completed");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FetchJob>, LedgerError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn has_successful_checksum(&self, checksum: &str) -> Result<bool, LedgerError> {
        Ok(self
            .lock()
            .jobs
            .values()
            .any(|j| j.state == JobState::Success && j.checksum.as_deref() == Some(checksum)))
    }

    async fn insert_item(&self, item: &NewsItem) -> Result<Option<Uuid>, LedgerError> {
        let canonical = item.canonical_url();
        let mut state = self.lock();
        if state.items_by_url.contains_key(&canonical) {
            return Ok(None);
        }
        let id = Uuid::new_v4();
        state.items_by_url.insert(canonical, id);
        state.items.push((id, item.clone()));
        Ok(Some(id))
    }

    async fn jobs_by_state(&self, wanted: JobState, limit: usize) -> Result<Vec<FetchJob>, LedgerError> {
        let state = self.lock();
        Ok(state
            .job_order
            .iter()
            .rev()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| j.state == wanted)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn completed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        let state = self.lock();
        let mut done: Vec<&FetchJob> = state
            .jobs
            .values()
            .filter(|j| j.completed_at.is_some_and(|t| t >= since))
            .collect();
        done.sort_by_key(|j| j.completed_at);
        Ok(done.into_iter().take(limit).map(LedgerRecord::from).collect())
    }
}
