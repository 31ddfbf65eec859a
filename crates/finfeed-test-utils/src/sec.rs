//! SEC EDGAR JSON payload builders.

use serde_json::{json, Value};

/// One row of `filings.recent`.
#[derive(Debug, Clone)]
pub struct FilingRow {
    pub form: &'static str,
    pub filing_date: &'static str,
    pub accession: &'static str,
    pub primary_document: &'static str,
}

/// `data.sec.gov/submissions/CIK##########.json` with the given recent filings.
pub fn submissions_json(cik: &str, name: &str, rows: &[FilingRow]) -> String {
    let col = |f: fn(&FilingRow) -> &'static str| -> Vec<Value> { rows.iter().map(|r| json!(f(r))).collect() };
    json!({
        "cik": cik.trim_start_matches('0'),
        "name": name,
        "filings": {
            "recent": {
                "form": col(|r| r.form),
                "filingDate": col(|r| r.filing_date),
                "accessionNumber": col(|r| r.accession),
                "primaryDocument": col(|r| r.primary_document),
                "primaryDocDescription": col(|r| r.form),
            }
        }
    })
    .to_string()
}

/// `www.sec.gov/files/company_tickers.json` with `(cik, ticker, title)` entries.
pub fn company_tickers_json(entries: &[(u64, &str, &str)]) -> String {
    let map: serde_json::Map<String, Value> = entries
        .iter()
        .enumerate()
        .map(|(i, (cik, ticker, title))| {
            (i.to_string(), json!({ "cik_str": cik, "ticker": ticker, "title": title }))
        })
        .collect();
    Value::Object(map).to_string()
}
