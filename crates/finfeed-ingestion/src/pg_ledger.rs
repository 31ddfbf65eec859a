//! PostgreSQL job ledger.
//!
//! Handles:
//! - `fetch_jobs` rows with guarded state transitions (`UPDATE ... WHERE state IN (...)`)
//! - `news_items` INSERT with `ON CONFLICT (canonical_url) DO NOTHING`
//! - checksum lookups against successful jobs

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::ledger::{JobLedger, LedgerError};
use crate::models::{FetchJob, JobCompletion, JobState, LedgerRecord, NewFetchJob, NewsItem};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS fetch_jobs (
        id           UUID PRIMARY KEY,
        source       TEXT NOT NULL,
        ticker       TEXT,
        doc_type     TEXT NOT NULL,
        url          TEXT NOT NULL,
        state        TEXT NOT NULL DEFAULT 'pending',
        http_status  INTEGER,
        checksum     TEXT,
        stored_key   TEXT,
        error        TEXT,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
        completed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS fetch_jobs_state_idx ON fetch_jobs (state, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS fetch_jobs_success_checksum_idx ON fetch_jobs (checksum) WHERE state = 'success'",
    r#"
    CREATE TABLE IF NOT EXISTS news_items (
        id            UUID PRIMARY KEY,
        url           TEXT NOT NULL,
        canonical_url TEXT NOT NULL UNIQUE,
        title        TEXT NOT NULL,
        source       TEXT NOT NULL,
        ticker       TEXT,
        published_at TIMESTAMPTZ,
        body         TEXT,
        checksum     TEXT NOT NULL,
        created_at   TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source: String,
    ticker: Option<String>,
    doc_type: String,
    url: String,
    state: String,
    http_status: Option<i32>,
    checksum: Option<String>,
    stored_key: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for FetchJob {
    type Error = LedgerError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let state = row.state.parse::<JobState>().map_err(LedgerError::Corrupt)?;
        let http_status = row
            .http_status
            .map(u16::try_from)
            .transpose()
            .map_err(|e| LedgerError::Corrupt(format!("job {}: bad http_status: {e}", row.id)))?;
        Ok(FetchJob {
            id: row.id,
            source: row.source,
            ticker: row.ticker,
            doc_type: row.doc_type,
            url: row.url,
            state,
            http_status,
            checksum: row.checksum,
            stored_key: row.stored_key,
            error: row.error,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

const JOB_COLUMNS: &str = "id, source, ticker, doc_type, url, state, http_status, checksum, \
                           stored_key, error, created_at, completed_at";

/// PostgreSQL ledger.
#[derive(Clone)]
pub struct PgJobLedger {
    pool: PgPool,
}

impl PgJobLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connecting to ledger database")?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if missing.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .context("applying ledger schema")?;
        }
        Ok(())
    }

    async fn state_of(&self, id: Uuid) -> Result<JobState, LedgerError> {
        let state: Option<(String,)> = sqlx::query_as("SELECT state FROM fetch_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match state {
            Some((s,)) => s.parse().map_err(LedgerError::Corrupt),
            None => Err(LedgerError::UnknownJob(id)),
        }
    }
}

#[async_trait]
impl JobLedger for PgJobLedger {
    async fn create(&self, job: NewFetchJob) -> Result<Uuid, LedgerError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO fetch_jobs (id, source, ticker, doc_type, url, state) \
             VALUES ($1, $2, $3, $4, $5, 'pending')",
        )
        .bind(id)
        .bind(&job.source)
        .bind(&job.ticker)
        .bind(&job.doc_type)
        .bind(&job.url)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_fetching(&self, id: Uuid) -> Result<(), LedgerError> {
        let updated: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE fetch_jobs SET state = 'fetching' WHERE id = $1 AND state = 'pending' RETURNING id",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() {
            let from = self.state_of(id).await?;
            return Err(LedgerError::InvalidTransition { id, from, to: JobState::Fetching });
        }
        Ok(())
    }

    async fn complete(&self, id: Uuid, completion: JobCompletion) -> Result<(), LedgerError> {
        if !completion.state.is_terminal() {
            let from = self.state_of(id).await?;
            return Err(LedgerError::InvalidTransition { id, from, to: completion.state });
        }

        let updated: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE fetch_jobs
               SET state = $2, http_status = $3, checksum = $4, stored_key = $5,
                   error = $6, completed_at = now()
             WHERE id = $1
               AND (state = 'fetching' OR (state = 'pending' AND $2 = 'failed'))
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(completion.state.as_str())
        .bind(completion.http_status.map(i32::from))
        .bind(&completion.checksum)
        .bind(&completion.stored_key)
        .bind(&completion.error)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() {
            let from = self.state_of(id).await?;
            return Err(LedgerError::InvalidTransition { id, from, to: completion.state });
        }
        tracing::debug!(job_id = %id, state = %completion.state, "Job completed");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<FetchJob>, LedgerError> {
        let row: Option<JobRow> = sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM fetch_jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FetchJob::try_from).transpose()
    }

    async fn has_successful_checksum(&self, checksum: &str) -> Result<bool, LedgerError> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM fetch_jobs WHERE checksum = $1 AND state = 'success')",
        )
        .bind(checksum)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn insert_item(&self, item: &NewsItem) -> Result<Option<Uuid>, LedgerError> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO news_items (id, url, canonical_url, title, source, ticker, published_at, body, checksum)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (canonical_url) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&item.url)
        .bind(item.canonical_url())
        .bind(&item.title)
        .bind(&item.source)
        .bind(&item.ticker)
        .bind(item.published_at)
        .bind(&item.body)
        .bind(item.checksum())
        .fetch_optional(&self.pool)
        .await?;
        Ok(inserted.map(|(id,)| id))
    }

    async fn jobs_by_state(&self, state: JobState, limit: usize) -> Result<Vec<FetchJob>, LedgerError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM fetch_jobs WHERE state = $1 ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(state.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FetchJob::try_from).collect()
    }

    async fn completed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM fetch_jobs \
             WHERE completed_at >= $1 ORDER BY completed_at ASC LIMIT $2"
        ))
        .bind(since)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| FetchJob::try_from(r).map(|job| LedgerRecord::from(&job)))
            .collect()
    }
}
