//! RSS 2.0 / Atom feed parsing and the feed registry.
//!
//! The parser is a quick-xml state machine that understands:
//!   RSS:  channel/title, item/{title, link, pubDate, dc:date, description,
//!         content:encoded, category}
//!   Atom: feed/title, entry/{title, link[href], published, updated,
//!         summary, content, category[term]}
//! Namespace prefixes are ignored; CDATA sections are read as text.

use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use scraper::Html;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::NewsItem;

pub const SOURCE_NAME: &str = "rss";
pub const FEED_DOC_TYPE: &str = "feed";
pub const MAX_BODY_CHARS: usize = 5000;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed XML is malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<NewsItem>,
}

#[derive(Default)]
struct EntryDraft {
    title: Option<String>,
    link: Option<String>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<String>,
    content: Option<String>,
    categories: Vec<String>,
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_lowercase()
}

fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
}

/// Atom `<link>`: take `href` when `rel` is absent or `alternate`.
fn atom_link(e: &BytesStart<'_>) -> Option<String> {
    let rel = attr(e, b"rel");
    if rel.as_deref().map_or(true, |r| r == "alternate") {
        attr(e, b"href").filter(|h| !h.is_empty())
    } else {
        None
    }
}

/// Parse a feed body. Items without a link are dropped.
///
/// A parse error after some items were read keeps those items; an error
/// before any item is returned as [`FeedError::Malformed`].
pub fn parse_feed(feed_url: &str, content: &[u8]) -> Result<ParsedFeed, FeedError> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut stack: Vec<String> = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = local_name(e);
                match name.as_str() {
                    "item" | "entry" => entry = Some(EntryDraft::default()),
                    "link" => {
                        if let (Some(d), Some(href)) = (entry.as_mut(), atom_link(e)) {
                            d.link.get_or_insert(href);
                        }
                    }
                    "category" => {
                        if let (Some(d), Some(term)) = (entry.as_mut(), attr(e, b"term")) {
                            d.categories.push(term);
                        }
                    }
                    _ => {}
                }
                stack.push(name);
                text.clear();
            }
            Ok(Event::Empty(ref e)) => {
                if let Some(d) = entry.as_mut() {
                    match local_name(e).as_str() {
                        "link" => {
                            if let Some(href) = atom_link(e) {
                                d.link.get_or_insert(href);
                            }
                        }
                        "category" => {
                            if let Some(term) = attr(e, b"term") {
                                d.categories.push(term);
                            }
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                match e.unescape() {
                    Ok(t) => text.push_str(&t),
                    // HTML entities such as &nbsp; are not XML; keep the raw text.
                    Err(_) => text.push_str(&String::from_utf8_lossy(e)),
                }
            }
            Ok(Event::CData(ref e)) => {
                text.push_str(&String::from_utf8_lossy(e));
            }
            Ok(Event::End(_)) => {
                let name = stack.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str).unwrap_or("");
                let value = std::mem::take(&mut text).trim().to_string();

                if name == "item" || name == "entry" {
                    if let Some(item) = entry
                        .take()
                        .and_then(|d| finish_entry(d, feed_url, feed.title.as_deref()))
                    {
                        feed.items.push(item);
                    }
                } else {
                    match entry.as_mut() {
                        Some(d) if !value.is_empty() => match name.as_str() {
                            "title" => d.title = Some(value),
                            "link" => {
                                d.link.get_or_insert(value);
                            }
                            "pubdate" | "published" | "issued" => d.published = Some(value),
                            "updated" | "date" | "modified" => {
                                d.updated.get_or_insert(value);
                            }
                            "description" | "summary" => d.summary = Some(value),
                            "content" | "encoded" => {
                                d.content.get_or_insert(value);
                            }
                            "category" => d.categories.push(value),
                            _ => {}
                        },
                        None if name == "title" && matches!(parent, "channel" | "feed") && !value.is_empty() => {
                            feed.title = Some(value);
                        }
                        _ => {}
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                if feed.items.is_empty() {
                    return Err(FeedError::Malformed(e.to_string()));
                }
                warn!(feed = %feed_url, error = %e, kept = feed.items.len(), "Feed parse error, keeping items read so far");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    debug!(feed = %feed_url, items = feed.items.len(), "Parsed feed");
    Ok(feed)
}

fn finish_entry(d: EntryDraft, feed_url: &str, feed_title: Option<&str>) -> Option<NewsItem> {
    let url = d.link.filter(|l| !l.is_empty())?;
    let published_at = d
        .published
        .as_deref()
        .and_then(parse_feed_date)
        .or_else(|| d.updated.as_deref().and_then(parse_feed_date));
    let body = d
        .summary
        .or(d.content)
        .map(|html| strip_html(&html))
        .filter(|b| !b.is_empty())
        .map(|b| truncate_chars(&b, MAX_BODY_CHARS));

    Some(NewsItem {
        title: d.title.unwrap_or_else(|| "No Title".to_string()),
        url,
        source: feed_title.unwrap_or(feed_url).to_string(),
        ticker: ticker_from_categories(&d.categories),
        published_at,
        body,
    })
}

/// RFC 2822, RFC 3339, and a few common variants.
pub fn parse_feed_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%a, %d %b %Y %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn strip_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: Vec<&str> = fragment.root_element().text().collect();
    text.join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// `$AAPL`, or an all-uppercase term of at most five characters.
pub fn ticker_from_categories(categories: &[String]) -> Option<String> {
    categories.iter().find_map(|raw| {
        let term = raw.trim();
        let looks_upper = term.chars().any(|c| c.is_alphabetic())
            && !term.chars().any(|c| c.is_lowercase())
            && term.chars().count() <= 5;
        if term.starts_with('$') || looks_upper {
            Some(term.trim_start_matches('$').to_string()).filter(|t| !t.is_empty())
        } else {
            None
        }
    })
}

// ── Feed registry ─────────────────────────────────────────────────────────────

const TICKER_FEED_TEMPLATES: &[&str] = &[
    "https://feeds.finance.yahoo.com/rss/2.0/headline?s={ticker}&region=US&lang=en-US",
    "https://news.google.com/rss/search?q={ticker}+stock&hl=en&gl=US&ceid=US:en",
];

const JK_FEED_TEMPLATES: &[&str] = &[
    "https://feeds.finance.yahoo.com/rss/2.0/headline?s={ticker}&region=ID&lang=id-ID",
    "https://news.google.com/rss/search?q={name}+saham&hl=id&gl=ID&ceid=ID:id",
];

const NAME_FEED_TEMPLATE: &str = "https://news.google.com/rss/search?q={name}+stock&hl=en&gl=US&ceid=US:en";

/// Company names for search feeds, keyed by base ticker.
const COMPANY_NAMES: &[(&str, &str)] = &[
    ("BBCA", "Bank Central Asia"),
    ("BBRI", "Bank Rakyat Indonesia"),
    ("BMRI", "Bank Mandiri"),
    ("BBNI", "Bank Negara Indonesia"),
    ("TLKM", "Telkom Indonesia"),
    ("ASII", "Astra International"),
    ("UNVR", "Unilever Indonesia"),
    ("GOTO", "GoTo Gojek Tokopedia"),
    ("BRIS", "Bank Syariah Indonesia"),
];

fn company_name(base: &str) -> Option<&'static str> {
    COMPANY_NAMES.iter().find(|(t, _)| *t == base).map(|(_, n)| *n)
}

/// General feeds plus ticker-specific feeds, de-duplicated in order.
pub fn feeds_for_ticker(ticker: &str, general: &[String]) -> Vec<String> {
    let base = ticker.split('.').next().unwrap_or(ticker).to_uppercase();
    let name = company_name(&base);
    let query_name = name.unwrap_or(&base).replace(' ', "+");

    let mut feeds: Vec<String> = general.to_vec();
    feeds.extend(TICKER_FEED_TEMPLATES.iter().map(|t| t.replace("{ticker}", ticker)));
    if ticker.to_uppercase().ends_with(".JK") {
        feeds.extend(
            JK_FEED_TEMPLATES
                .iter()
                .map(|t| t.replace("{ticker}", ticker).replace("{name}", &query_name)),
        );
    } else if name.is_some() {
        feeds.push(NAME_FEED_TEMPLATE.replace("{name}", &query_name));
    }

    let mut seen = std::collections::HashSet::new();
    feeds.retain(|f| seen.insert(f.clone()));
    feeds
}

#[cfg(test)]
mod tests {
    use super::*;
    use finfeed_test_utils::feeds::{atom_feed, rss_feed, FeedEntry};

    #[test]
    fn test_parse_rss_items() {
        let xml = rss_feed(
            "Market Wire",
            &[
                FeedEntry::new("Apple beats estimates", "https://n.com/a")
                    .published("Wed, 01 May 2024 09:30:00 GMT")
                    .description("<p>Strong <b>iPhone</b> sales &amp; services</p>")
                    .category("$AAPL"),
                FeedEntry::new("Markets mixed", "https://n.com/b").category("Markets"),
            ],
        );
        let feed = parse_feed("https://n.com/rss", xml.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Market Wire"));
        assert_eq!(feed.items.len(), 2);

        let a = &feed.items[0];
        assert_eq!(a.title, "Apple beats estimates");
        assert_eq!(a.url, "https://n.com/a");
        assert_eq!(a.source, "Market Wire");
        assert_eq!(a.ticker.as_deref(), Some("AAPL"));
        assert_eq!(a.body.as_deref(), Some("Strong iPhone sales & services"));
        assert_eq!(a.published_at.unwrap().to_rfc3339(), "2024-05-01T09:30:00+00:00");
        assert_eq!(feed.items[1].ticker, None);
    }

    #[test]
    fn test_parse_atom_entries() {
        let xml = atom_feed(
            "IR Updates",
            &[FeedEntry::new("Q1 results", "https://ir.x.com/q1")
                .updated("2024-04-30T20:00:00Z")
                .category("MSFT")],
        );
        let feed = parse_feed("https://ir.x.com/atom", xml.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("IR Updates"));
        let item = &feed.items[0];
        assert_eq!(item.url, "https://ir.x.com/q1");
        assert_eq!(item.ticker.as_deref(), Some("MSFT"));
        assert!(item.published_at.is_some());
    }

    #[test]
    fn test_cdata_and_missing_link() {
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <item><title><![CDATA[Fed holds rates]]></title>
                    <link>https://n.com/fed</link>
                    <description><![CDATA[<div>Rates <i>unchanged</i></div>]]></description></item>
              <item><title>No link here</title></item>
            </channel></rss>"#;
        let feed = parse_feed("https://n.com/rss", xml.as_bytes()).unwrap();
        assert_eq!(feed.items.len(), 1);
        assert_eq!(feed.items[0].title, "Fed holds rates");
        assert_eq!(feed.items[0].body.as_deref(), Some("Rates unchanged"));
        assert_eq!(feed.items[0].source, "https://n.com/rss");
    }

    #[test]
    fn test_malformed_feed_is_error() {
        assert!(parse_feed("u", b"<rss><channel><item><title>x</titl></rss>").is_err());
    }

    #[test]
    fn test_body_truncated() {
        let long = "word ".repeat(3000);
        let xml = rss_feed("F", &[FeedEntry::new("t", "https://n.com/l").description(&long)]);
        let feed = parse_feed("u", xml.as_bytes()).unwrap();
        assert_eq!(feed.items[0].body.as_ref().unwrap().chars().count(), MAX_BODY_CHARS);
    }

    #[test]
    fn test_ticker_rules() {
        let c = |v: &[&str]| ticker_from_categories(&v.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(c(&["Technology", "NVDA"]), Some("NVDA".into()));
        assert_eq!(c(&["$tsla"]), Some("tsla".into()));
        assert_eq!(c(&["EARNINGS"]), None);
        assert_eq!(c(&["markets", "2024"]), None);
    }

    #[test]
    fn test_date_formats() {
        assert!(parse_feed_date("Tue, 30 Apr 2024 14:00:00 +0700").is_some());
        assert!(parse_feed_date("2024-04-30T14:00:00+07:00").is_some());
        assert!(parse_feed_date("2024-04-30 14:00:00").is_some());
        assert!(parse_feed_date("2024-04-30").is_some());
        assert!(parse_feed_date("yesterday").is_none());
    }

    #[test]
    fn test_feeds_for_ticker() {
        let general = vec!["https://g.com/rss".to_string()];
        let us = feeds_for_ticker("AAPL", &general);
        assert_eq!(us[0], "https://g.com/rss");
        assert!(us.iter().any(|f| f.contains("s=AAPL&region=US")));
        assert_eq!(us.len(), 3);

        let jk = feeds_for_ticker("BBCA.JK", &general);
        assert!(jk.iter().any(|f| f.contains("region=ID")));
        assert!(jk.iter().any(|f| f.contains("Bank+Central+Asia+saham")));

        let dup = feeds_for_ticker("AAPL", &us);
        assert_eq!(dup, us);
    }
}
