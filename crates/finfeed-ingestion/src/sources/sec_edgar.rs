//! SEC EDGAR filing archive.
//!
//! Endpoints used:
//!   company tickers: https://www.sec.gov/files/company_tickers.json
//!   submissions:     https://data.sec.gov/submissions/CIK{cik}.json
//!   archive:         https://www.sec.gov/Archives/edgar/data/{cik}/{accession}/{primary_doc}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::fetcher::Fetcher;
use crate::models::DocumentTarget;

pub const SOURCE_NAME: &str = "sec_edgar";
pub const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";

/// Filings scanned per submissions index.
const MAX_SCAN: usize = 100;

/// CIKs of frequently requested tickers, to skip the lookup request.
const KNOWN_CIKS: &[(&str, &str)] = &[
    ("AAPL",  "0000320193"),
    ("MSFT",  "0000789019"),
    ("GOOGL", "0001652044"),
    ("AMZN",  "0001018724"),
    ("TSLA",  "0001318605"),
    ("META",  "0001326801"),
    ("NVDA",  "0001045810"),
    ("ORCL",  "0001341439"),
    ("CRM",   "0001108524"),
    ("INTC",  "0000050863"),
    ("AMD",   "0000002488"),
    ("IBM",   "0000051143"),
    ("NFLX",  "0001065280"),
    ("PYPL",  "0001633917"),
    ("ADBE",  "0000796343"),
    ("CSCO",  "0000858877"),
    ("QCOM",  "0000804328"),
    ("TXN",   "0000097476"),
    ("AVGO",  "0001649338"),
    ("NOW",   "0001373715"),
];

/// Whether the primary filing source could serve documents for a ticker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimarySourceStatus {
    Available,
    Blocked403,
    NotFound,
    NotConfigured,
}

impl PrimarySourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrimarySourceStatus::Available     => "available",
            PrimarySourceStatus::Blocked403    => "blocked_403",
            PrimarySourceStatus::NotFound      => "not_found",
            PrimarySourceStatus::NotConfigured => "not_configured",
        }
    }

    /// Any download wins; otherwise a 403 means blocked.
    pub fn from_downloads(downloaded: usize, blocked: bool) -> Self {
        if downloaded > 0 {
            PrimarySourceStatus::Available
        } else if blocked {
            PrimarySourceStatus::Blocked403
        } else {
            PrimarySourceStatus::NotFound
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filing {
    pub ticker: String,
    pub cik: String,
    pub form_type: String,
    pub filing_date: String,
    pub accession_number: String,
    pub description: String,
    pub primary_document: String,
    pub url: String,
}

impl Filing {
    /// `10-K` → `10k`.
    pub fn doc_type(&self) -> String {
        self.form_type.to_lowercase().replace('-', "")
    }

    pub fn to_target(&self) -> DocumentTarget {
        DocumentTarget {
            source: SOURCE_NAME.to_string(),
            doc_type: self.doc_type(),
            url: self.url.clone(),
            ticker: Some(self.ticker.clone()),
            title: Some(format!("{} {} ({})", self.ticker, self.form_type, self.filing_date)),
        }
    }
}

pub fn base_ticker(ticker: &str) -> String {
    ticker.split('.').next().unwrap_or(ticker).to_uppercase()
}

/// Exchanges EDGAR does not cover.
pub fn is_supported_ticker(ticker: &str) -> bool {
    !ticker.to_uppercase().ends_with(".JK")
}

pub fn known_cik(ticker: &str) -> Option<&'static str> {
    let base = base_ticker(ticker);
    KNOWN_CIKS.iter().find(|(t, _)| *t == base).map(|(_, cik)| *cik)
}

pub fn submissions_url(cik: &str) -> String {
    format!("https://data.sec.gov/submissions/CIK{cik}.json")
}

#[derive(Deserialize)]
struct CompanyTicker {
    cik_str: u64,
    ticker: String,
}

/// Zero-padded CIK for `ticker` from the `company_tickers.json` payload.
pub fn parse_company_tickers(body: &[u8], ticker: &str) -> Result<Option<String>, serde_json::Error> {
    let base = base_ticker(ticker);
    let entries: HashMap<String, CompanyTicker> = serde_json::from_slice(body)?;
    Ok(entries
        .into_values()
        .find(|e| e.ticker.eq_ignore_ascii_case(&base))
        .map(|e| format!("{:010}", e.cik_str)))
}

#[derive(Deserialize, Default)]
struct Submissions {
    #[serde(default)]
    filings: SubmissionFilings,
}

#[derive(Deserialize, Default)]
struct SubmissionFilings {
    #[serde(default)]
    recent: RecentFilings,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RecentFilings {
    #[serde(default)]
    form: Vec<String>,
    #[serde(default)]
    filing_date: Vec<String>,
    #[serde(default)]
    accession_number: Vec<String>,
    #[serde(default)]
    primary_document: Vec<String>,
    #[serde(default)]
    primary_doc_description: Vec<String>,
}

/// Recent filings of the wanted `forms`, newest first as EDGAR lists them.
pub fn parse_submissions(
    body: &[u8],
    ticker: &str,
    cik: &str,
    forms: &[String],
    max_results: usize,
) -> Result<Vec<Filing>, serde_json::Error> {
    let subs: Submissions = serde_json::from_slice(body)?;
    let recent = subs.filings.recent;
    let base = base_ticker(ticker);
    let cik_no_pad = cik.trim_start_matches('0');
    let at = |v: &Vec<String>, i: usize| v.get(i).cloned().unwrap_or_default();

    let mut filings = Vec::new();
    for (i, form) in recent.form.iter().enumerate().take(MAX_SCAN) {
        if filings.len() >= max_results {
            break;
        }
        if !forms.iter().any(|f| f == form) {
            continue;
        }
        let accession = at(&recent.accession_number, i);
        let primary_document = at(&recent.primary_document, i);
        if accession.is_empty() || primary_document.is_empty() {
            continue;
        }
        let description = recent
            .primary_doc_description
            .get(i)
            .filter(|d| !d.is_empty())
            .cloned()
            .unwrap_or_else(|| form.clone());

        filings.push(Filing {
            ticker: base.clone(),
            cik: cik.to_string(),
            form_type: form.clone(),
            filing_date: at(&recent.filing_date, i),
            url: format!(
                "https://www.sec.gov/Archives/edgar/data/{}/{}/{}",
                cik_no_pad,
                accession.replace('-', ""),
                primary_document
            ),
            accession_number: accession,
            description,
            primary_document,
        });
    }
    Ok(filings)
}

/// CIK from the built-in table, else from EDGAR's ticker list.
pub async fn resolve_cik(fetcher: &Fetcher, ticker: &str) -> Option<String> {
    if let Some(cik) = known_cik(ticker) {
        return Some(cik.to_string());
    }

    let base = base_ticker(ticker);
    info!(ticker = %base, "Looking up CIK from SEC");
    let outcome = fetcher.fetch_safe(COMPANY_TICKERS_URL, None).await;
    let Some(body) = outcome.body.as_deref().filter(|_| outcome.success) else {
        warn!(ticker = %base, error = %outcome.failure_reason(), "SEC company tickers lookup failed");
        return None;
    };
    match parse_company_tickers(body, &base) {
        Ok(Some(cik)) => {
            info!(ticker = %base, cik = %cik, "Found CIK");
            Some(cik)
        }
        Ok(None) => {
            warn!(ticker = %base, "Ticker not found in SEC company list");
            None
        }
        Err(e) => {
            warn!(error = %e, "SEC company tickers payload unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finfeed_test_utils::sec::{company_tickers_json, submissions_json, FilingRow};

    fn forms() -> Vec<String> {
        vec!["10-K".into(), "10-Q".into(), "8-K".into()]
    }

    #[test]
    fn test_parse_submissions_filters_and_builds_urls() {
        let json = submissions_json(
            "0000320193",
            "Apple Inc.",
            &[
                FilingRow { form: "4", filing_date: "2024-05-03", accession: "0000320193-24-000070", primary_document: "form4.xml" },
                FilingRow { form: "10-Q", filing_date: "2024-05-02", accession: "0000320193-24-000069", primary_document: "aapl-20240330.htm" },
                FilingRow { form: "8-K", filing_date: "2024-05-02", accession: "0000320193-24-000067", primary_document: "aapl-20240502.htm" },
                FilingRow { form: "10-K", filing_date: "2023-11-03", accession: "0000320193-23-000106", primary_document: "aapl-20230930.htm" },
            ],
        );
        let filings = parse_submissions(json.as_bytes(), "aapl", "0000320193", &forms(), 10).unwrap();
        assert_eq!(filings.len(), 3);
        assert_eq!(filings[0].form_type, "10-Q");
        assert_eq!(
            filings[0].url,
            "https://www.sec.gov/Archives/edgar/data/320193/000032019324000069/aapl-20240330.htm"
        );
        assert_eq!(filings[0].ticker, "AAPL");
        assert_eq!(filings[2].doc_type(), "10k");
        assert_eq!(filings[2].to_target().source, "sec_edgar");

        let capped = parse_submissions(json.as_bytes(), "AAPL", "0000320193", &forms(), 1).unwrap();
        assert_eq!(capped.len(), 1);
    }

    #[test]
    fn test_parse_submissions_tolerates_missing_sections() {
        let filings = parse_submissions(br#"{"cik":"1"}"#, "X", "0000000001", &forms(), 5).unwrap();
        assert!(filings.is_empty());
        assert!(parse_submissions(b"not json", "X", "1", &forms(), 5).is_err());
    }

    #[test]
    fn test_company_tickers_lookup() {
        let json = company_tickers_json(&[(1318605, "TSLA", "Tesla, Inc."), (2488, "AMD", "AMD")]);
        assert_eq!(parse_company_tickers(json.as_bytes(), "amd").unwrap().as_deref(), Some("0000002488"));
        assert_eq!(parse_company_tickers(json.as_bytes(), "ZZZZ").unwrap(), None);
    }

    #[test]
    fn test_known_cik_and_support() {
        assert_eq!(known_cik("ORCL"), Some("0001341439"));
        assert_eq!(known_cik("orcl.us"), Some("0001341439"));
        assert_eq!(known_cik("BBCA.JK"), None);
        assert!(!is_supported_ticker("BBCA.JK"));
        assert!(is_supported_ticker("AAPL"));
    }

    #[test]
    fn test_primary_status() {
        assert_eq!(PrimarySourceStatus::from_downloads(1, true), PrimarySourceStatus::Available);
        assert_eq!(PrimarySourceStatus::from_downloads(0, true), PrimarySourceStatus::Blocked403);
        assert_eq!(PrimarySourceStatus::from_downloads(0, false), PrimarySourceStatus::NotFound);
        assert_eq!(PrimarySourceStatus::Blocked403.as_str(), "blocked_403");
    }
}
