//! finfeed-ingestion — Financial document ingestion core.
//! Covers:
//! - Bounded-retry HTTP fetching with a polite delay
//! - Content-addressed raw storage (checksum keyed)
//! - Fetch job ledger (in-memory and PostgreSQL)
//! - Per-source health circuit breaker
//! - URL canonicalisation and near-duplicate title suppression
//! - Source drivers: RSS/Atom feeds, investor-relations pages, SEC EDGAR filings
//! - Run orchestration with bounded concurrency and a run deadline

pub mod checksum;
pub mod dedup;
pub mod fetcher;
pub mod health;
pub mod keyed_lock;
pub mod ledger;
pub mod mock;
pub mod models;
pub mod pg_ledger;
pub mod pipeline;
pub mod sources;
pub mod store;

pub use fetcher::{FetchConfig, FetchOutcome, Fetcher};
pub use health::FeedHealthTracker;
pub use ledger::{JobLedger, MemoryLedger};
pub use models::{FetchJob, JobState};
pub use pipeline::{run_ingestion, IngestionContext, RunReport};
pub use store::ContentStore;
