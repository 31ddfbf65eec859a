use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use std::collections::HashSet;
use std::time::Duration;
use url::Url;
use crate::error::{FinfeedError, Result};

pub const DEFAULT_USER_AGENT: &str = "finfeed/0.1 (finfeed-bot@example.com)";

/// Settings for [`SandboxClient`].
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub user_agent: String,
    /// Upper bound for any single request; per-call timeouts are applied on top.
    pub timeout: Duration,
    /// Approved hosts. Empty means every host is allowed.
    pub allowed_hosts: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(60),
            allowed_hosts: Vec::new(),
        }
    }
}

/// An HTTP client with browser-like default headers that can be capped to approved hosts.
#[derive(Debug, Clone)]
pub struct SandboxClient {
    client: Client,
    allowlist: HashSet<String>,
}

impl SandboxClient {
    pub fn new(cfg: &SandboxConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        let ua = HeaderValue::from_str(&cfg.user_agent)
            .map_err(|e| FinfeedError::Config(format!("Invalid user agent: {}", e)))?;
        headers.insert(USER_AGENT, ua);

        let client = ClientBuilder::new()
            .default_headers(headers)
            .timeout(cfg.timeout)
            .build()?;

        let allowlist = cfg
            .allowed_hosts
            .iter()
            .map(|h| h.trim().to_lowercase())
            .filter(|h| !h.is_empty())
            .collect();

        Ok(Self { client, allowlist })
    }

    /// Appends an exact hostname to the allowlist.
    pub fn allow_domain(&mut self, domain: &str) {
        self.allowlist.insert(domain.to_lowercase());
    }

    /// Validates if a URL is permitted under the current policy.
    pub fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        if self.allowlist.is_empty() {
            return true;
        }
        // Exact match or a subdomain of an allowed host
        self.allowlist
            .iter()
            .any(|allowed| host == allowed || host.ends_with(&format!(".{}", allowed)))
    }

    /// GET request builder for an allowed URL.
    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        if !self.is_allowed(url) {
            tracing::warn!(url = %url, "Blocked request to host outside allowlist");
            return Err(FinfeedError::SecurityError(format!(
                "Network capabilities capped: domain not in allowlist for URL {}",
                url
            )));
        }

        Ok(self.client.get(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_allowlist_allows_any_host() {
        let client = SandboxClient::new(&SandboxConfig::default()).unwrap();
        assert!(client.is_allowed("https://www.sec.gov/Archives/x.htm"));
        assert!(client.is_allowed("https://feeds.example.com/rss"));
    }

    #[test]
    fn test_allowlist_accepts_subdomains_only_of_listed_hosts() {
        let cfg = SandboxConfig {
            allowed_hosts: vec!["sec.gov".to_string()],
            ..Default::default()
        };
        let client = SandboxClient::new(&cfg).unwrap();
        assert!(client.is_allowed("https://sec.gov/a"));
        assert!(client.is_allowed("https://data.sec.gov/submissions/CIK0000320193.json"));
        assert!(!client.is_allowed("https://notsec.gov/a"));
        assert!(!client.is_allowed("https://example.com/a"));
    }

    #[test]
    fn test_unparseable_url_is_rejected() {
        let client = SandboxClient::new(&SandboxConfig::default()).unwrap();
        assert!(!client.is_allowed("not a url"));
        assert!(client.get("not a url").is_err());
    }

    #[test]
    fn test_bad_user_agent_is_a_config_error() {
        let cfg = SandboxConfig {
            user_agent: "finfeed\nbot".to_string(),
            ..Default::default()
        };
        assert!(matches!(SandboxClient::new(&cfg), Err(FinfeedError::Config(_))));
    }

    #[test]
    fn test_blocked_host_is_a_security_error() {
        let cfg = SandboxConfig {
            allowed_hosts: vec!["sec.gov".to_string()],
            ..Default::default()
        };
        let client = SandboxClient::new(&cfg).unwrap();
        assert!(matches!(client.get("https://example.com/a"), Err(FinfeedError::SecurityError(_))));
        assert!(client.get("https://www.sec.gov/a").is_ok());
    }

    #[test]
    fn test_allow_domain_extends_list() {
        let cfg = SandboxConfig {
            allowed_hosts: vec!["sec.gov".to_string()],
            ..Default::default()
        };
        let mut client = SandboxClient::new(&cfg).unwrap();
        assert!(!client.is_allowed("https://news.google.com/rss"));
        client.allow_domain("news.google.com");
        assert!(client.is_allowed("https://news.google.com/rss"));
    }
}
