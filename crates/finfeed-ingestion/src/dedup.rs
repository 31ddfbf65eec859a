//! Per-run duplicate suppression for feed items.
//!
//! Two stages, applied in publish-time order so the earliest copy wins:
//! 1. Canonical URL exact match (tracking parameters, fragment and trailing
//!    slash removed, lowercased)
//! 2. Near-duplicate titles: Jaccard similarity of lowercased whitespace
//!    token sets against every title accepted so far in the run
//!
//! Content-level dedup (identical bytes) lives in the store and the ledger.

use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};
use url::Url;

use crate::models::NewsItem;

/// Query parameters that only carry attribution.
const TRACKING_PARAMS: &[&str] = &["tsrc", "mod", "ref", "src", "ftag", "ncid"];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonical form of `raw` for exact-match dedup.
pub fn canonicalize_url(raw: &str) -> String {
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return canonicalize_unparsed(raw);
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, v)| !v.is_empty() && !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);

    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    let mut out = url.to_string();
    // A bare host keeps the slash `Url` always renders.
    if url.query().is_none() && out.ends_with('/') {
        out.pop();
    }
    out.to_lowercase()
}

/// Best effort for strings `Url` rejects: drop the fragment and trailing slash.
fn canonicalize_unparsed(raw: &str) -> String {
    let no_fragment = raw.trim().split('#').next().unwrap_or_default();
    no_fragment.trim_end_matches('/').to_lowercase()
}

fn title_tokens(title: &str) -> HashSet<String> {
    title.to_lowercase().split_whitespace().map(str::to_string).collect()
}

/// Jaccard similarity of the lowercased whitespace-token sets. Empty titles score 0.0.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    jaccard(&title_tokens(a), &title_tokens(b))
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub title_threshold: f64,
    /// Accepted titles remembered per run; the oldest is evicted beyond this.
    pub max_titles: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { title_threshold: 0.80, max_titles: 5000 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupVerdict {
    Accepted,
    DuplicateUrl,
    SimilarTitle,
}

/// What one run has accepted so far. Not persisted.
#[derive(Debug)]
pub struct DedupState {
    cfg: DedupConfig,
    urls: HashSet<String>,
    titles: VecDeque<HashSet<String>>,
    warned_full: bool,
}

impl DedupState {
    pub fn new(cfg: DedupConfig) -> Self {
        Self { cfg, urls: HashSet::new(), titles: VecDeque::new(), warned_full: false }
    }

    /// Check `item` and remember it when accepted.
    pub fn check(&mut self, url: &str, title: &str) -> DedupVerdict {
        let canon = canonicalize_url(url);
        if self.urls.contains(&canon) {
            return DedupVerdict::DuplicateUrl;
        }
        let tokens = title_tokens(title);
        if self.titles.iter().any(|seen| jaccard(&tokens, seen) >= self.cfg.title_threshold) {
            return DedupVerdict::SimilarTitle;
        }

        self.urls.insert(canon);
        if self.cfg.max_titles > 0 {
            if self.titles.len() >= self.cfg.max_titles {
                if !self.warned_full {
                    warn!(max_titles = self.cfg.max_titles, "Title dedup window full, evicting oldest titles");
                    self.warned_full = true;
                }
                self.titles.pop_front();
            }
            self.titles.push_back(tokens);
        }
        DedupVerdict::Accepted
    }

    pub fn accepted_urls(&self) -> usize {
        self.urls.len()
    }
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub accepted: Vec<NewsItem>,
    pub duplicate_urls: usize,
    pub similar_titles: usize,
}

/// Sort by publish time (undated last, stable) and run every item through `state`.
pub fn dedup_batch(state: &mut DedupState, mut items: Vec<NewsItem>) -> BatchOutcome {
    items.sort_by_key(|i| (i.published_at.is_none(), i.published_at));

    let mut out = BatchOutcome::default();
    for item in items {
        match state.check(&item.url, &item.title) {
            DedupVerdict::Accepted => out.accepted.push(item),
            DedupVerdict::DuplicateUrl => out.duplicate_urls += 1,
            DedupVerdict::SimilarTitle => {
                debug!(title = %item.title.chars().take(60).collect::<String>(), "Skipped similar title");
                out.similar_titles += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn item(title: &str, url: &str, minute: Option<u32>) -> NewsItem {
        NewsItem {
            title: title.into(),
            url: url.into(),
            source: "feed".into(),
            ticker: None,
            published_at: minute.map(|m| Utc.with_ymd_and_hms(2024, 5, 1, 9, m, 0).unwrap()),
            body: None,
        }
    }

    #[test]
    fn test_tracking_params_and_trailing_slash() {
        assert_eq!(
            canonicalize_url("https://x.com/a?utm_source=y"),
            canonicalize_url("https://x.com/a/")
        );
        assert_eq!(canonicalize_url("https://x.com/a?utm_source=y"), "https://x.com/a");
    }

    #[test]
    fn test_keeps_meaningful_params_and_drops_fragment() {
        assert_eq!(
            canonicalize_url("https://News.com/Story/?id=42&utm_medium=rss&ref=home#top"),
            "https://news.com/story?id=42"
        );
        assert_eq!(canonicalize_url("https://x.com/a?ncid=1&FTAG=2&src=3&mod=4&tsrc=5"), "https://x.com/a");
        assert_eq!(canonicalize_url("https://x.com/a?q="), "https://x.com/a");
    }

    #[test]
    fn test_bare_host_and_unparseable() {
        assert_eq!(canonicalize_url("https://x.com/"), "https://x.com");
        assert_eq!(canonicalize_url("https://x.com"), "https://x.com");
        assert_eq!(canonicalize_url("/relative/Path/#frag"), "/relative/path");
    }

    #[test]
    fn test_similarity_properties() {
        let a = "Apple beats earnings estimates";
        let b = "Apple misses revenue estimates";
        assert_eq!(title_similarity(a, a), 1.0);
        assert_eq!(title_similarity(a, b), title_similarity(b, a));
        assert!((title_similarity(a, b) - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(title_similarity("", a), 0.0);
        assert_eq!(title_similarity("   ", ""), 0.0);
        assert_eq!(title_similarity("APPLE Beats", "apple beats"), 1.0);
    }

    #[test]
    fn test_near_duplicate_suppressed_earliest_wins() {
        let mut state = DedupState::new(DedupConfig::default());
        let items = vec![
            item("Company X posts record profit in third quarter of fiscal 2024", "https://b.com/2", Some(30)),
            item("Company X reports record profit in third quarter of fiscal 2024", "https://a.com/1", Some(5)),
            item("Oil prices slide on demand worries", "https://c.com/3", Some(10)),
        ];
        let out = dedup_batch(&mut state, items);
        assert_eq!(out.accepted.len(), 2);
        assert_eq!(out.accepted[0].url, "https://a.com/1");
        assert_eq!(out.accepted[1].url, "https://c.com/3");
        assert_eq!(out.similar_titles, 1);
    }

    #[test]
    fn test_duplicate_url_with_tracking_params() {
        let mut state = DedupState::new(DedupConfig::default());
        let items = vec![
            item("First headline", "https://x.com/a", Some(1)),
            item("Completely different words", "https://x.com/a/?utm_campaign=z", Some(2)),
        ];
        let out = dedup_batch(&mut state, items);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.duplicate_urls, 1);
    }

    #[test]
    fn test_undated_items_sort_last() {
        let mut state = DedupState::new(DedupConfig::default());
        let items = vec![
            item("Same story words here", "https://x.com/undated", None),
            item("Same story words here", "https://x.com/dated", Some(0)),
        ];
        let out = dedup_batch(&mut state, items);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(out.accepted[0].url, "https://x.com/dated");
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut state = DedupState::new(DedupConfig::default());
        assert_eq!(state.check("https://x/1", "fed holds rates steady again"), DedupVerdict::Accepted);
        // 4 shared of 5 tokens
        assert_eq!(title_similarity("fed holds rates steady again", "fed holds rates steady"), 0.8);
        assert_eq!(state.check("https://x/2", "fed holds rates steady"), DedupVerdict::SimilarTitle);
        assert_eq!(state.accepted_urls(), 1);
    }

    #[test]
    fn test_just_below_threshold_is_accepted() {
        let mut state = DedupState::new(DedupConfig::default());
        let first = "banks rally as fed holds rates steady again";
        let second = "banks rally as fed holds rates steady today";
        // 7 shared of 9 tokens
        assert!(title_similarity(first, second) < 0.8);
        assert_eq!(state.check("https://x/1", first), DedupVerdict::Accepted);
        assert_eq!(state.check("https://x/2", second), DedupVerdict::Accepted);
        assert_eq!(state.accepted_urls(), 2);
    }

    #[test]
    fn test_title_window_is_bounded() {
        let mut state = DedupState::new(DedupConfig { title_threshold: 0.8, max_titles: 2 });
        assert_eq!(state.check("https://x/1", "alpha beta"), DedupVerdict::Accepted);
        assert_eq!(state.check("https://x/2", "gamma delta"), DedupVerdict::Accepted);
        assert_eq!(state.check("https://x/3", "epsilon zeta"), DedupVerdict::Accepted);
        // "alpha beta" was evicted
        assert_eq!(state.check("https://x/4", "alpha beta"), DedupVerdict::Accepted);
        assert_eq!(state.check("https://x/5", "epsilon zeta"), DedupVerdict::SimilarTitle);
    }

    #[test]
    fn test_large_batch_does_not_blow_up() {
        let mut state = DedupState::new(DedupConfig { title_threshold: 0.8, max_titles: 500 });
        let items: Vec<NewsItem> = (0..3000)
            .map(|i| item(&format!("headline number {i} unique{i}"), &format!("https://x.com/{i}"), None))
            .collect();
        let out = dedup_batch(&mut state, items);
        assert_eq!(out.accepted.len() + out.similar_titles + out.duplicate_urls, 3000);
    }
}
