//! Collection run orchestration.
//!
//! One run of [`run_ingestion`] walks every source named in an
//! [`IngestionJob`]:
//!   1. RSS/Atom feeds: skip disabled feeds, fetch the rest with bounded
//!      concurrency, store the raw feed, parse items
//!   2. Deduplicate the merged items (canonical URL, then similar titles)
//!      and insert the survivors into the ledger in publish order
//!   3. Investor-relations pages: fetch each page, extract report links,
//!      download them
//!   4. SEC EDGAR: resolve the CIK, read the submissions index, download
//!      the newest filings and derive the primary-source status
//!   5. Explicit document targets
//!
//! Every download goes through the same job flow:
//! `pending → fetching → success | duplicate | failed`.
//!
//! The run never aborts because of one source. Failures are tallied per
//! source in the [`RunReport`], and work not started before the run
//! deadline is counted as skipped.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::dedup::{dedup_batch, DedupConfig, DedupState};
use crate::fetcher::{FetchOutcome, Fetcher};
use crate::health::{FeedHealthTracker, HealthReport, Observation};
use crate::keyed_lock::KeyedMutex;
use crate::ledger::JobLedger;
use crate::models::{DocumentTarget, JobCompletion, JobState, NewFetchJob, NewsItem};
use crate::sources::ir_pages::{self, extract_report_links};
use crate::sources::rss::{self, parse_feed};
use crate::sources::sec_edgar::{self, PrimarySourceStatus};
use crate::store::{ContentStore, ObjectMeta};

const DEADLINE_MESSAGE: &str = "run deadline exceeded";

// ── Run config ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Fetches in flight at once.
    pub workers: usize,
    /// Wall-clock limit for the whole run.
    pub deadline: Duration,
    /// Report links downloaded per IR page; `None` downloads all of them.
    pub download_limit: Option<usize>,
    pub report_top_n: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline: Duration::from_secs(900),
            download_limit: None,
            report_top_n: 10,
        }
    }
}

/// Components shared by every run. Build once, reuse across runs.
#[derive(Clone)]
pub struct IngestionContext {
    pub fetcher: Fetcher,
    pub store: ContentStore,
    pub ledger: Arc<dyn JobLedger>,
    pub health: Arc<FeedHealthTracker>,
    pub dedup: DedupConfig,
    pub run: RunConfig,
    checksum_locks: Arc<KeyedMutex>,
}

impl IngestionContext {
    pub fn new(
        fetcher: Fetcher,
        store: ContentStore,
        ledger: Arc<dyn JobLedger>,
        health: Arc<FeedHealthTracker>,
    ) -> Self {
        Self {
            fetcher,
            store,
            ledger,
            health,
            dedup: DedupConfig::default(),
            run: RunConfig::default(),
            checksum_locks: Arc::new(KeyedMutex::new()),
        }
    }

    pub fn with_dedup(mut self, cfg: DedupConfig) -> Self {
        self.dedup = cfg;
        self
    }

    pub fn with_run_config(mut self, cfg: RunConfig) -> Self {
        self.run = cfg;
        self
    }
}

// ── Job ───────────────────────────────────────────────────────────────────────

/// What one run collects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionJob {
    pub feeds: Vec<String>,
    /// Ticker given to feed items that carry none.
    pub default_ticker: Option<String>,
    pub ir_pages: Vec<String>,
    /// Tickers whose SEC filings are collected.
    pub tickers: Vec<String>,
    pub filing_forms: Vec<String>,
    pub max_filings: usize,
    pub documents: Vec<DocumentTarget>,
}

impl Default for IngestionJob {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            default_ticker: None,
            ir_pages: Vec::new(),
            tickers: Vec::new(),
            filing_forms: vec!["10-K".to_string(), "10-Q".to_string(), "8-K".to_string()],
            max_filings: 5,
            documents: Vec::new(),
        }
    }
}

impl IngestionJob {
    pub fn feeds(feeds: Vec<String>) -> Self {
        Self { feeds, ..Self::default() }
    }
}

// ── Progress events ───────────────────────────────────────────────────────────

/// Progress event emitted during a run (cloneable for broadcast).
#[derive(Debug, Clone, Serialize)]
pub struct IngestionProgress {
    pub run_id: Uuid,
    pub stage: String,
    pub message: String,
    pub jobs_completed: usize,
    pub items_inserted: usize,
    pub errors: usize,
}

struct Progress {
    run_id: Uuid,
    tx: Option<broadcast::Sender<IngestionProgress>>,
}

impl Progress {
    fn emit(&self, stage: &str, message: String, report: &RunReport) {
        debug!(run_id = %self.run_id, stage, message = %message, "Progress");
        if let Some(tx) = &self.tx {
            let _ = tx.send(IngestionProgress {
                run_id: self.run_id,
                stage: stage.to_string(),
                message,
                jobs_completed: report.sources.values().map(SourceTally::jobs).sum(),
                items_inserted: report.items.inserted,
                errors: report.errors.len(),
            });
        }
    }
}

// ── Report ────────────────────────────────────────────────────────────────────

/// Per-source counts for one run.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SourceTally {
    pub success: usize,
    pub failed: usize,
    pub duplicate: usize,
    pub disabled_skipped: usize,
    pub deadline_skipped: usize,
}

impl SourceTally {
    fn count(&mut self, state: JobState) {
        match state {
            JobState::Success   => self.success += 1,
            JobState::Duplicate => self.duplicate += 1,
            _                   => self.failed += 1,
        }
    }

    /// Jobs that reached a terminal state.
    pub fn jobs(&self) -> usize {
        self.success + self.failed + self.duplicate
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ItemTally {
    /// Parsed from feeds, before dedup.
    pub found: usize,
    pub inserted: usize,
    /// Accepted by dedup but already in the ledger from an earlier run.
    pub already_known: usize,
    pub duplicate_urls: usize,
    pub similar_titles: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub sources: BTreeMap<String, SourceTally>,
    pub items: ItemTally,
    /// Keyed by ticker.
    pub primary_sources: BTreeMap<String, PrimarySourceStatus>,
    pub errors: Vec<String>,
    pub deadline_exceeded: bool,
    pub health: HealthReport,
}

impl RunReport {
    fn new(run_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            sources: BTreeMap::new(),
            items: ItemTally::default(),
            primary_sources: BTreeMap::new(),
            errors: Vec::new(),
            deadline_exceeded: false,
            health: HealthReport {
                total_tracked: 0,
                enabled: 0,
                disabled: 0,
                top_failing: Vec::new(),
            },
        }
    }

    /// Tally for `source`, zeroed when the run never touched it.
    pub fn source(&self, source: &str) -> SourceTally {
        self.sources.get(source).cloned().unwrap_or_default()
    }

    fn tally(&mut self, source: &str) -> &mut SourceTally {
        self.sources.entry(source.to_string()).or_default()
    }

    fn absorb(&mut self, source: &str, download: Option<Download>) {
        match download {
            Some(dl) => {
                self.tally(source).count(dl.state);
                self.deadline_exceeded |= dl.deadline_hit;
                self.errors.extend(dl.errors);
            }
            None => {
                self.tally(source).deadline_skipped += 1;
                self.deadline_exceeded = true;
            }
        }
    }
}

// ── Single download ───────────────────────────────────────────────────────────

/// Result of one job through the ledger.
struct Download {
    state: JobState,
    http_status: Option<u16>,
    /// Present when the network call finished inside the deadline.
    outcome: Option<FetchOutcome>,
    deadline_hit: bool,
    errors: Vec<String>,
}

impl Download {
    fn new() -> Self {
        Self {
            state: JobState::Failed,
            http_status: None,
            outcome: None,
            deadline_hit: false,
            errors: Vec::new(),
        }
    }

    /// Body of a 200 response.
    fn body(&self) -> Option<&[u8]> {
        self.outcome.as_ref().filter(|o| o.success).and_then(|o| o.body.as_deref())
    }

    fn stored(&self) -> bool {
        matches!(self.state, JobState::Success | JobState::Duplicate)
    }

    async fn finish(&mut self, ledger: &dyn JobLedger, job_id: Uuid, url: &str, completion: JobCompletion) {
        self.state = completion.state;
        if let Some(reason) = &completion.error {
            self.errors.push(format!("{url}: {reason}"));
        }
        if let Err(e) = ledger.complete(job_id, completion).await {
            warn!(job_id = %job_id, error = %e, "Failed to record job completion");
            self.errors.push(format!("{url}: ledger update failed: {e}"));
        }
    }
}

/// Run `target` through the job flow. `None` when the deadline passed before it started.
#[instrument(skip(ctx, target, deadline), fields(url = %target.url, source = %target.source))]
async fn download(ctx: &IngestionContext, target: &DocumentTarget, deadline: Instant) -> Option<Download> {
    if Instant::now() >= deadline {
        debug!("Deadline passed, not starting");
        return None;
    }

    let mut dl = Download::new();
    let new_job = NewFetchJob::new(&target.source, &target.doc_type, &target.url)
        .with_ticker(target.ticker.clone());
    let job_id = match ctx.ledger.create(new_job).await {
        Ok(id) => id,
        Err(e) => {
            dl.errors.push(format!("{}: ledger create failed: {e}", target.url));
            return Some(dl);
        }
    };
    if let Err(e) = ctx.ledger.mark_fetching(job_id).await {
        dl.errors.push(format!("{}: ledger update failed: {e}", target.url));
        return Some(dl);
    }

    let outcome = match timeout_at(deadline, ctx.fetcher.fetch_safe(&target.url, None)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(job_id = %job_id, "Fetch cut short by run deadline");
            dl.deadline_hit = true;
            dl.finish(ctx.ledger.as_ref(), job_id, &target.url, JobCompletion::failed(None, None, DEADLINE_MESSAGE))
                .await;
            return Some(dl);
        }
    };
    dl.http_status = outcome.status_code;

    let completion = if !outcome.success {
        JobCompletion::failed(outcome.status_code, None, outcome.failure_reason())
    } else {
        match (outcome.body.as_deref(), outcome.checksum.clone()) {
            (Some(body), Some(checksum)) => store_body(ctx, target, &outcome, body, checksum).await,
            _ => JobCompletion::failed(outcome.status_code, None, "empty response"),
        }
    };
    dl.outcome = Some(outcome);
    dl.finish(ctx.ledger.as_ref(), job_id, &target.url, completion).await;
    Some(dl)
}

/// Store a fetched body unless its checksum was seen before.
async fn store_body(
    ctx: &IngestionContext,
    target: &DocumentTarget,
    outcome: &FetchOutcome,
    body: &[u8],
    checksum: String,
) -> JobCompletion {
    let status = outcome.status_code;
    let _guard = ctx.checksum_locks.lock(&checksum).await;

    match prior_copy(ctx, &checksum).await {
        Ok(PriorCopy::Unseen) => {}
        Ok(PriorCopy::Seen(key)) => {
            debug!(checksum = %checksum, "Content already stored");
            return JobCompletion::duplicate(status, checksum, key);
        }
        Err(reason) => {
            warn!(url = %target.url, error = %reason, "Duplicate check failed");
            return JobCompletion::failed(status, Some(checksum), reason);
        }
    }

    let meta = ObjectMeta {
        source: &target.source,
        doc_type: &target.doc_type,
        entity_tag: target.ticker.as_deref(),
        content_type: outcome.content_type.as_deref(),
        url_hint: Some(&target.url),
    };
    match ctx.store.put(body, &meta).await {
        Ok(obj) if obj.written => JobCompletion::success(status, obj.checksum, obj.key),
        Ok(obj) => JobCompletion::duplicate(status, obj.checksum, Some(obj.key)),
        Err(e) => {
            warn!(url = %target.url, error = %e, "Storage failed, job recorded as failed");
            JobCompletion::failed(status, Some(checksum), format!("storage error: {e}"))
        }
    }
}

enum PriorCopy {
    Unseen,
    /// Stored before; carries the object key when the store still has it.
    Seen(Option<String>),
}

async fn prior_copy(ctx: &IngestionContext, checksum: &str) -> Result<PriorCopy, String> {
    let in_ledger = ctx
        .ledger
        .has_successful_checksum(checksum)
        .await
        .map_err(|e| format!("ledger lookup failed: {e}"))?;
    let key = ctx.store.locate(checksum).await;
    match (in_ledger, key) {
        (_, Ok(Some(key))) => Ok(PriorCopy::Seen(Some(key))),
        (true, _) => Ok(PriorCopy::Seen(None)),
        (false, Ok(None)) => Ok(PriorCopy::Unseen),
        (false, Err(e)) => Err(format!("storage error: {e}")),
    }
}

/// Feed the fetch result of a recurring source into the health tracker.
async fn record_health(ctx: &IngestionContext, source: &str, outcome: &FetchOutcome) -> Option<String> {
    let reason = outcome.failure_reason();
    let obs = if outcome.success {
        Observation::success(outcome.status_code)
    } else {
        Observation::failure(outcome.status_code, Some(reason.as_str()))
    };
    match ctx.health.record_result(source, obs).await {
        Ok(_) => None,
        Err(e) => {
            warn!(source = %source, error = %e, "Health update failed");
            Some(format!("{source}: health update failed: {e}"))
        }
    }
}

// ── Feeds ─────────────────────────────────────────────────────────────────────

struct FeedFetch {
    download: Option<Download>,
    items: Vec<NewsItem>,
}

async fn fetch_feed(ctx: &IngestionContext, url: &str, default_ticker: Option<&str>, deadline: Instant) -> FeedFetch {
    let target = DocumentTarget::new(rss::SOURCE_NAME, rss::FEED_DOC_TYPE, url)
        .with_ticker(default_ticker.map(str::to_string));
    let Some(mut dl) = download(ctx, &target, deadline).await else {
        return FeedFetch { download: None, items: Vec::new() };
    };

    if let Some(outcome) = &dl.outcome {
        if let Some(err) = record_health(ctx, url, outcome).await {
            dl.errors.push(err);
        }
    }

    // Unchanged feed bytes still get parsed; item inserts are idempotent.
    let mut items = Vec::new();
    if let Some(body) = dl.body() {
        match parse_feed(url, body) {
            Ok(feed) => {
                info!(feed = %url, items = feed.items.len(), "Parsed feed");
                items = feed.items;
            }
            Err(e) => {
                warn!(feed = %url, error = %e, "Feed parse failed");
                dl.errors.push(format!("{url}: {e}"));
            }
        }
    }
    for item in &mut items {
        if item.ticker.is_none() {
            item.ticker = default_ticker.map(str::to_string);
        }
    }
    FeedFetch { download: Some(dl), items }
}

async fn collect_feeds(ctx: &IngestionContext, job: &IngestionJob, deadline: Instant, report: &mut RunReport) -> Vec<NewsItem> {
    let enabled = ctx.health.filter_enabled(&job.feeds);
    report.tally(rss::SOURCE_NAME).disabled_skipped += job.feeds.len() - enabled.len();

    let fetched: Vec<FeedFetch> = stream::iter(enabled.iter())
        .map(|url| fetch_feed(ctx, url, job.default_ticker.as_deref(), deadline))
        .buffered(ctx.run.workers.max(1))
        .collect()
        .await;

    let mut items = Vec::new();
    for feed in fetched {
        report.absorb(rss::SOURCE_NAME, feed.download);
        items.extend(feed.items);
    }
    items
}

async fn insert_items(ctx: &IngestionContext, items: Vec<NewsItem>, report: &mut RunReport) {
    report.items.found += items.len();

    let mut state = DedupState::new(ctx.dedup.clone());
    let batch = dedup_batch(&mut state, items);
    report.items.duplicate_urls += batch.duplicate_urls;
    report.items.similar_titles += batch.similar_titles;

    for item in &batch.accepted {
        match ctx.ledger.insert_item(item).await {
            Ok(Some(_)) => report.items.inserted += 1,
            Ok(None) => report.items.already_known += 1,
            Err(e) => report.errors.push(format!("{}: item insert failed: {e}", item.url)),
        }
    }
    info!(
        accepted = batch.accepted.len(),
        inserted = report.items.inserted,
        duplicate_urls = batch.duplicate_urls,
        similar_titles = batch.similar_titles,
        "Feed items deduplicated"
    );
}

// ── IR pages ──────────────────────────────────────────────────────────────────

async fn crawl_ir_page(ctx: &IngestionContext, url: &str, deadline: Instant) -> (Option<Download>, Vec<DocumentTarget>) {
    let target = DocumentTarget::new(ir_pages::PAGE_SOURCE_NAME, ir_pages::PAGE_DOC_TYPE, url);
    let Some(mut dl) = download(ctx, &target, deadline).await else {
        return (None, Vec::new());
    };
    if let Some(outcome) = &dl.outcome {
        if let Some(err) = record_health(ctx, url, outcome).await {
            dl.errors.push(err);
        }
    }

    let mut links = match dl.body() {
        Some(body) => extract_report_links(url, &String::from_utf8_lossy(body)),
        None => Vec::new(),
    };
    if let Some(limit) = ctx.run.download_limit {
        links.truncate(limit);
    }
    info!(page = %url, links = links.len(), "Extracted report links");
    (Some(dl), links.into_iter().map(|l| l.into_target()).collect())
}

async fn collect_ir_pages(ctx: &IngestionContext, job: &IngestionJob, deadline: Instant, report: &mut RunReport) {
    let enabled = ctx.health.filter_enabled(&job.ir_pages);
    report.tally(ir_pages::PAGE_SOURCE_NAME).disabled_skipped += job.ir_pages.len() - enabled.len();

    let crawled: Vec<(Option<Download>, Vec<DocumentTarget>)> = stream::iter(enabled.iter())
        .map(|url| crawl_ir_page(ctx, url, deadline))
        .buffered(ctx.run.workers.max(1))
        .collect()
        .await;

    let mut targets = Vec::new();
    for (page, links) in crawled {
        report.absorb(ir_pages::PAGE_SOURCE_NAME, page);
        targets.extend(links);
    }
    download_all(ctx, targets, deadline, report).await;
}

/// Download targets with bounded concurrency and fold them into the report.
async fn download_all(ctx: &IngestionContext, targets: Vec<DocumentTarget>, deadline: Instant, report: &mut RunReport) {
    let done: Vec<(String, Option<Download>)> = stream::iter(targets)
        .map(|target| async move {
            let dl = download(ctx, &target, deadline).await;
            (target.source, dl)
        })
        .buffer_unordered(ctx.run.workers.max(1))
        .collect()
        .await;
    for (source, dl) in done {
        report.absorb(&source, dl);
    }
}

// ── SEC filings ───────────────────────────────────────────────────────────────

struct FilingRun {
    ticker: String,
    status: PrimarySourceStatus,
    downloads: Vec<Option<Download>>,
    disabled: bool,
    deadline_hit: bool,
    errors: Vec<String>,
}

impl FilingRun {
    fn new(ticker: &str, status: PrimarySourceStatus) -> Self {
        Self {
            ticker: ticker.to_string(),
            status,
            downloads: Vec::new(),
            disabled: false,
            deadline_hit: false,
            errors: Vec::new(),
        }
    }
}

async fn collect_ticker_filings(ctx: &IngestionContext, ticker: &str, job: &IngestionJob, deadline: Instant) -> FilingRun {
    if !sec_edgar::is_supported_ticker(ticker) {
        info!(ticker = %ticker, "SEC EDGAR not configured for ticker");
        return FilingRun::new(ticker, PrimarySourceStatus::NotConfigured);
    }
    let mut run = FilingRun::new(ticker, PrimarySourceStatus::NotFound);

    let Ok(cik) = timeout_at(deadline, sec_edgar::resolve_cik(&ctx.fetcher, ticker)).await else {
        run.deadline_hit = true;
        return run;
    };
    let Some(cik) = cik else {
        return run;
    };

    let index_url = sec_edgar::submissions_url(&cik);
    if !ctx.health.is_enabled(&index_url) {
        info!(ticker = %ticker, index = %index_url, "Submissions index disabled, skipping");
        run.disabled = true;
        return run;
    }
    let Ok(index) = timeout_at(deadline, ctx.fetcher.fetch_safe(&index_url, None)).await else {
        run.deadline_hit = true;
        return run;
    };
    if let Some(err) = record_health(ctx, &index_url, &index).await {
        run.errors.push(err);
    }
    let body = match index.body.as_deref().filter(|_| index.success) {
        Some(body) => body,
        None => {
            if index.status_code == Some(403) {
                run.status = PrimarySourceStatus::Blocked403;
            }
            run.errors.push(format!("{index_url}: {}", index.failure_reason()));
            return run;
        }
    };

    let filings = match sec_edgar::parse_submissions(body, ticker, &cik, &job.filing_forms, job.max_filings) {
        Ok(filings) => filings,
        Err(e) => {
            run.errors.push(format!("{index_url}: unreadable submissions index: {e}"));
            return run;
        }
    };
    if filings.is_empty() {
        warn!(ticker = %ticker, "No SEC filings found");
        return run;
    }

    let mut downloaded = 0;
    let mut blocked = false;
    for filing in &filings {
        let dl = download(ctx, &filing.to_target(), deadline).await;
        if let Some(d) = &dl {
            if d.stored() {
                downloaded += 1;
            } else if d.http_status == Some(403) {
                warn!(url = %filing.url, "SEC blocked request (403)");
                blocked = true;
            }
        }
        run.downloads.push(dl);
    }
    run.status = PrimarySourceStatus::from_downloads(downloaded, blocked);
    info!(ticker = %ticker, downloaded, status = run.status.as_str(), "SEC collection complete");
    run
}

async fn collect_filings(ctx: &IngestionContext, job: &IngestionJob, deadline: Instant, report: &mut RunReport) {
    let runs: Vec<Option<FilingRun>> = stream::iter(job.tickers.iter())
        .map(|ticker| async move {
            if Instant::now() >= deadline {
                return None;
            }
            Some(collect_ticker_filings(ctx, ticker, job, deadline).await)
        })
        .buffered(ctx.run.workers.max(1))
        .collect()
        .await;

    for run in runs {
        let Some(run) = run else {
            report.tally(sec_edgar::SOURCE_NAME).deadline_skipped += 1;
            report.deadline_exceeded = true;
            continue;
        };
        if run.disabled {
            report.tally(sec_edgar::SOURCE_NAME).disabled_skipped += 1;
        }
        report.deadline_exceeded |= run.deadline_hit;
        report.errors.extend(run.errors);
        for dl in run.downloads {
            report.absorb(sec_edgar::SOURCE_NAME, dl);
        }
        report.primary_sources.insert(sec_edgar::base_ticker(&run.ticker), run.status);
    }
}

// ── Pipeline orchestrator ─────────────────────────────────────────────────────

/// Runs one collection pass over every source in `job`.
///
/// Progress events are sent via `progress_tx` if provided.
/// Never fails: per-source problems land in [`RunReport::errors`].
#[instrument(skip(ctx, job, progress_tx))]
pub async fn run_ingestion(
    ctx: &IngestionContext,
    job: IngestionJob,
    progress_tx: Option<broadcast::Sender<IngestionProgress>>,
) -> RunReport {
    let run_id = Uuid::new_v4();
    let t0 = std::time::Instant::now();
    let deadline = Instant::now() + ctx.run.deadline;
    let progress = Progress { run_id, tx: progress_tx };
    let mut report = RunReport::new(run_id);

    info!(
        run_id = %run_id,
        feeds = job.feeds.len(),
        ir_pages = job.ir_pages.len(),
        tickers = job.tickers.len(),
        documents = job.documents.len(),
        "Starting ingestion run"
    );

    // ── 1-2. Feeds and their items ────────────────────────────────────────────
    if !job.feeds.is_empty() {
        progress.emit("feeds", format!("Fetching {} feeds", job.feeds.len()), &report);
        let items = collect_feeds(ctx, &job, deadline, &mut report).await;
        progress.emit("items", format!("Deduplicating {} items", items.len()), &report);
        insert_items(ctx, items, &mut report).await;
    }

    // ── 3. Investor-relations pages ───────────────────────────────────────────
    if !job.ir_pages.is_empty() {
        progress.emit("ir_pages", format!("Crawling {} IR pages", job.ir_pages.len()), &report);
        collect_ir_pages(ctx, &job, deadline, &mut report).await;
    }

    // ── 4. SEC filings ────────────────────────────────────────────────────────
    if !job.tickers.is_empty() {
        progress.emit("filings", format!("Collecting filings for {} tickers", job.tickers.len()), &report);
        collect_filings(ctx, &job, deadline, &mut report).await;
    }

    // ── 5. Explicit documents ─────────────────────────────────────────────────
    if !job.documents.is_empty() {
        progress.emit("documents", format!("Downloading {} documents", job.documents.len()), &report);
        download_all(ctx, job.documents.clone(), deadline, &mut report).await;
    }

    report.health = ctx.health.health_report(ctx.run.report_top_n);
    report.finished_at = Utc::now();
    report.duration_ms = t0.elapsed().as_millis() as u64;

    if report.deadline_exceeded {
        warn!(run_id = %run_id, "Run deadline exceeded, remaining work skipped");
    }
    info!(
        run_id = %run_id,
        duration_ms = report.duration_ms,
        items_inserted = report.items.inserted,
        errors = report.errors.len(),
        "Ingestion run complete"
    );
    progress.emit("complete", "Ingestion complete".to_string(), &report);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tally_counts_terminal_states() {
        let mut t = SourceTally::default();
        t.count(JobState::Success);
        t.count(JobState::Duplicate);
        t.count(JobState::Failed);
        t.count(JobState::Failed);
        assert_eq!(t, SourceTally { success: 1, failed: 2, duplicate: 1, ..Default::default() });
        assert_eq!(t.jobs(), 4);
    }

    #[test]
    fn test_report_absorbs_skips_and_errors() {
        let mut report = RunReport::new(Uuid::new_v4());
        report.absorb("rss", None);
        let mut dl = Download::new();
        dl.errors.push("https://x/feed: HTTP 500".into());
        report.absorb("rss", Some(dl));

        let rss = report.source("rss");
        assert_eq!(rss.deadline_skipped, 1);
        assert_eq!(rss.failed, 1);
        assert!(report.deadline_exceeded);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.source("sec_edgar"), SourceTally::default());
    }

    #[test]
    fn test_default_job_forms() {
        let job = IngestionJob::feeds(vec!["https://x/feed".into()]);
        assert_eq!(job.filing_forms, vec!["10-K", "10-Q", "8-K"]);
        assert_eq!(job.max_filings, 5);
    }
}
