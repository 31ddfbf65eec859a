//! Live fetches against public endpoints.
//!
//! Needs network access. Run with:
//! ```bash
//! cargo test --package finfeed-ingestion --test test_live_feeds -- --ignored --nocapture
//! ```

use std::sync::Arc;
use std::time::Duration;

use finfeed_common::{SandboxClient, SandboxConfig};
use finfeed_ingestion::fetcher::{FetchConfig, Fetcher, ReqwestTransport};
use finfeed_ingestion::sources::rss::{feeds_for_ticker, parse_feed};
use finfeed_ingestion::sources::sec_edgar::{parse_submissions, submissions_url};

fn live_fetcher() -> Fetcher {
    let client = SandboxClient::new(&SandboxConfig::default()).expect("client");
    let cfg = FetchConfig {
        delay_min: Duration::from_millis(200),
        delay_max: Duration::from_millis(500),
        ..FetchConfig::default()
    };
    Fetcher::new(Arc::new(ReqwestTransport::new(client)), cfg)
}

#[tokio::test]
#[ignore]
async fn test_live_ticker_feed_parses() {
    let fetcher = live_fetcher();
    let url = &feeds_for_ticker("AAPL", &[])[0];
    let outcome = fetcher.fetch_safe(url, None).await;
    println!("{} -> {:?} ({})", url, outcome.status_code, outcome.failure_reason());
    assert!(outcome.success);

    let feed = parse_feed(url, outcome.body.as_deref().unwrap()).unwrap();
    println!("{} items", feed.items.len());
    for item in feed.items.iter().take(5) {
        println!("  {} | {}", item.title, item.url);
    }
}

#[tokio::test]
#[ignore]
async fn test_live_sec_submissions() {
    let fetcher = live_fetcher();
    let outcome = fetcher.fetch_safe(&submissions_url("0000320193"), None).await;
    println!("status {:?}", outcome.status_code);
    if outcome.status_code == Some(403) {
        println!("SEC blocked the request; set a contact user agent");
        return;
    }
    let forms = vec!["10-K".to_string(), "10-Q".to_string()];
    let filings = parse_submissions(outcome.body.as_deref().unwrap(), "AAPL", "0000320193", &forms, 3).unwrap();
    for f in &filings {
        println!("{} {} {}", f.form_type, f.filing_date, f.url);
    }
    assert!(!filings.is_empty());
}
