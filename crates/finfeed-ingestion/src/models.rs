//! Data models for the ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Job lifecycle ─────────────────────────────────────────────────────────────

/// Lifecycle of a fetch job: `pending → fetching → {success | failed | duplicate}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Fetching,
    Success,
    Failed,
    Duplicate,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending   => "pending",
            JobState::Fetching  => "fetching",
            JobState::Success   => "success",
            JobState::Failed    => "failed",
            JobState::Duplicate => "duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failed | JobState::Duplicate)
    }

    /// `pending` may only start fetching or fail outright; `fetching` may end
    /// in any terminal state. A terminal state is final.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match self {
            JobState::Pending  => matches!(next, JobState::Fetching | JobState::Failed),
            JobState::Fetching => next.is_terminal(),
            _                  => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(JobState::Pending),
            "fetching"  => Ok(JobState::Fetching),
            "success"   => Ok(JobState::Success),
            "failed"    => Ok(JobState::Failed),
            "duplicate" => Ok(JobState::Duplicate),
            other       => Err(format!("unknown job state: {other}")),
        }
    }
}

// ── Fetch jobs ────────────────────────────────────────────────────────────────

/// One attempt to retrieve one URL. Never deleted; mutated once into a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchJob {
    pub id: Uuid,
    pub source: String,
    pub ticker: Option<String>,
    pub doc_type: String,
    pub url: String,
    pub state: JobState,
    pub http_status: Option<u16>,
    /// Only set when the body was read successfully.
    pub checksum: Option<String>,
    pub stored_key: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters for [`crate::ledger::JobLedger::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFetchJob {
    pub source: String,
    pub doc_type: String,
    pub url: String,
    pub ticker: Option<String>,
}

impl NewFetchJob {
    pub fn new(source: &str, doc_type: &str, url: &str) -> Self {
        Self {
            source: source.to_string(),
            doc_type: doc_type.to_string(),
            url: url.to_string(),
            ticker: None,
        }
    }

    pub fn with_ticker(mut self, ticker: Option<String>) -> Self {
        self.ticker = ticker;
        self
    }
}

/// Terminal update applied once by [`crate::ledger::JobLedger::complete`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobCompletion {
    pub state: JobState,
    pub http_status: Option<u16>,
    pub checksum: Option<String>,
    pub stored_key: Option<String>,
    pub error: Option<String>,
}

impl JobCompletion {
    pub fn success(http_status: Option<u16>, checksum: String, stored_key: String) -> Self {
        Self {
            state: JobState::Success,
            http_status,
            checksum: Some(checksum),
            stored_key: Some(stored_key),
            error: None,
        }
    }

    /// `stored_key` points at the copy already in the store, when known.
    pub fn duplicate(http_status: Option<u16>, checksum: String, stored_key: Option<String>) -> Self {
        Self {
            state: JobState::Duplicate,
            http_status,
            checksum: Some(checksum),
            stored_key,
            error: None,
        }
    }

    /// `checksum` is kept when the body was read but a later step failed.
    pub fn failed(http_status: Option<u16>, checksum: Option<String>, error: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            http_status,
            checksum,
            stored_key: None,
            error: Some(error.into()),
        }
    }
}

/// Outbound view of a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    pub job_id: Uuid,
    pub state: JobState,
    pub stored_key: Option<String>,
    pub checksum: Option<String>,
    pub source_url: String,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl From<&FetchJob> for LedgerRecord {
    fn from(job: &FetchJob) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            stored_key: job.stored_key.clone(),
            checksum: job.checksum.clone(),
            source_url: job.url.clone(),
            fetched_at: job.completed_at,
        }
    }
}

// ── Items ─────────────────────────────────────────────────────────────────────

/// A news item parsed from a feed, before deduplication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewsItem {
    pub title: String,
    pub url: String,
    /// Feed title, or the feed URL when the feed has none.
    pub source: String,
    pub ticker: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub body: Option<String>,
}

impl NewsItem {
    pub fn checksum(&self) -> String {
        crate::checksum::item_checksum(&self.title, &self.url)
    }

    /// Key the ledger keeps items unique on.
    pub fn canonical_url(&self) -> String {
        crate::dedup::canonicalize_url(&self.url)
    }
}

/// A document to be downloaded into the content store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentTarget {
    pub source: String,
    pub doc_type: String,
    pub url: String,
    pub ticker: Option<String>,
    pub title: Option<String>,
}

impl DocumentTarget {
    pub fn new(source: &str, doc_type: &str, url: &str) -> Self {
        Self {
            source: source.to_string(),
            doc_type: doc_type.to_string(),
            url: url.to_string(),
            ticker: None,
            title: None,
        }
    }

    pub fn with_ticker(mut self, ticker: Option<String>) -> Self {
        self.ticker = ticker;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(JobState::Pending.can_transition_to(JobState::Fetching));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Fetching.can_transition_to(JobState::Success));
        assert!(JobState::Fetching.can_transition_to(JobState::Duplicate));
        assert!(JobState::Fetching.can_transition_to(JobState::Failed));
    }

    #[test]
    fn test_pending_cannot_skip_fetching_to_a_stored_outcome() {
        assert!(!JobState::Pending.can_transition_to(JobState::Success));
        assert!(!JobState::Pending.can_transition_to(JobState::Duplicate));
        assert!(!JobState::Pending.can_transition_to(JobState::Pending));
    }

    #[test]
    fn test_no_regression_or_terminal_rewrite() {
        assert!(!JobState::Fetching.can_transition_to(JobState::Pending));
        assert!(!JobState::Fetching.can_transition_to(JobState::Fetching));
        for terminal in [JobState::Success, JobState::Failed, JobState::Duplicate] {
            for next in [JobState::Pending, JobState::Fetching, JobState::Success, JobState::Failed] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn test_state_string_roundtrip() {
        for s in ["pending", "fetching", "success", "failed", "duplicate"] {
            assert_eq!(s.parse::<JobState>().unwrap().as_str(), s);
        }
        assert!("done".parse::<JobState>().is_err());
    }

    #[test]
    fn test_canonical_url_ignores_tracking_and_trailing_slash() {
        let item = |url: &str| NewsItem {
            title: "Fed holds".into(),
            url: url.into(),
            source: "Markets".into(),
            ticker: None,
            published_at: None,
            body: None,
        };
        assert_eq!(
            item("https://n.com/fed?utm_source=rss").canonical_url(),
            item("https://n.com/fed/").canonical_url()
        );
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&JobState::Duplicate).unwrap();
        assert_eq!(json, "\"duplicate\"");
    }
}
