//! Investor-relations page crawling.
//!
//! Pulls report links out of a fetched listing page:
//! - SEC EDGAR browse pages: 10-K / 10-Q rows and their "Documents" link
//! - anything else: `.pdf` anchors and anchors whose href or onclick
//!   mentions `download`
//!
//! Relative links are resolved against the page URL.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::OnceLock;
use url::Url;

use crate::models::DocumentTarget;

pub const SOURCE_NAME: &str = "company_reports";
/// Source name for the listing pages themselves.
pub const PAGE_SOURCE_NAME: &str = "ir_pages";
pub const PAGE_DOC_TYPE: &str = "ir_page";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportLink {
    pub url: String,
    pub title: String,
    pub ticker: Option<String>,
    pub doc_type: String,
}

impl ReportLink {
    pub fn into_target(self) -> DocumentTarget {
        DocumentTarget {
            source: SOURCE_NAME.to_string(),
            doc_type: self.doc_type,
            url: self.url,
            ticker: self.ticker,
            title: Some(self.title),
        }
    }
}

fn selector(css: &'static str, cell: &'static OnceLock<Selector>) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector"))
}

fn rows_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector("tr", &SEL)
}

fn anchors_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector("a[href]", &SEL)
}

fn meta_ticker_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    selector(r#"meta[name="ticker"]"#, &SEL)
}

fn ticker_url_regexes() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [r"/([A-Z]{2,5})/", r"ticker=([A-Z]{2,5})", r"symbol=([A-Z]{2,5})"]
            .iter()
            .map(|p| Regex::new(p).expect("static regex"))
            .collect()
    })
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Document type from the link text.
pub fn classify_doc_type(title: &str) -> &'static str {
    let t = title.to_lowercase();
    if ["quarterly", "q1", "q2", "10-q"].iter().any(|k| t.contains(k)) {
        "quarterly_report"
    } else if t.contains("presentation") {
        "presentation"
    } else if t.contains("earnings") {
        "earnings"
    } else {
        "annual_report"
    }
}

/// Ticker from the page URL (`/AAPL/`, `ticker=`, `symbol=`) or `<meta name="ticker">`.
pub fn extract_ticker(page_url: &str, doc: &Html) -> Option<String> {
    for re in ticker_url_regexes() {
        if let Some(c) = re.captures(page_url) {
            return Some(c[1].to_string());
        }
    }
    doc.select(meta_ticker_selector())
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn is_sec_page(page_url: &str) -> bool {
    Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "sec.gov" || h.ends_with(".sec.gov")))
        .unwrap_or(false)
}

fn resolve(base: Option<&Url>, href: &str) -> Option<String> {
    let href = href.trim();
    let lower = href.to_lowercase();
    if href.is_empty() || lower.starts_with("javascript:") || lower.starts_with("mailto:") || href.starts_with('#') {
        return None;
    }
    match base {
        Some(b) => b.join(href).ok().map(|u| u.to_string()),
        None => Url::parse(href).ok().map(|u| u.to_string()),
    }
}

/// Report links on a listing page, in document order, without repeats.
pub fn extract_report_links(page_url: &str, html: &str) -> Vec<ReportLink> {
    let doc = Html::parse_document(html);
    let base = Url::parse(page_url).ok();
    let ticker = extract_ticker(page_url, &doc);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    if is_sec_page(page_url) {
        for row in doc.select(rows_selector()) {
            let text = element_text(&row).to_lowercase();
            let doc_type = if text.contains("10-k") && !text.contains("10-k/a") {
                "annual_report"
            } else if text.contains("10-q") && !text.contains("10-q/a") {
                "quarterly_report"
            } else {
                continue;
            };

            let documents = row.select(anchors_selector()).find(|a| {
                element_text(a) == "Documents" || a.value().attr("id") == Some("documentsbutton")
            });
            let Some(url) = documents
                .and_then(|a| a.value().attr("href"))
                .and_then(|href| resolve(base.as_ref(), href))
            else {
                continue;
            };
            if seen.insert(url.clone()) {
                let title = if doc_type == "annual_report" { "SEC Annual Report" } else { "SEC Quarterly Report" };
                links.push(ReportLink {
                    url,
                    title: title.to_string(),
                    ticker: ticker.clone(),
                    doc_type: doc_type.to_string(),
                });
            }
        }
        if !links.is_empty() {
            return links;
        }
    }

    for a in doc.select(anchors_selector()) {
        let Some(href) = a.value().attr("href") else { continue };
        let onclick = a.value().attr("onclick").unwrap_or_default().to_lowercase();
        let href_lower = href.to_lowercase();
        let path_lower = href_lower.split(['?', '#']).next().unwrap_or_default();
        let is_document = path_lower.ends_with(".pdf")
            || href_lower.contains("download")
            || onclick.contains("download");
        if !is_document {
            continue;
        }
        let Some(url) = resolve(base.as_ref(), href) else { continue };
        if !seen.insert(url.clone()) {
            continue;
        }

        let mut title = element_text(&a);
        if title.is_empty() {
            title = if url.to_lowercase().contains("interactive data") || url.to_lowercase().contains("interactive%20data") {
                "Interactive Data".to_string()
            } else {
                "Untitled".to_string()
            };
        }
        links.push(ReportLink {
            doc_type: classify_doc_type(&title).to_string(),
            url,
            title,
            ticker: ticker.clone(),
        });
    }
    links
}
