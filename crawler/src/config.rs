use serde::Deserialize;

/// One configured site: the crawl scope is every URL under its base.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    pub url: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    pub sites: Vec<SiteConfig>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_referrer")]
    pub referrer: String,
    /// Politeness delay before every fetch, in milliseconds.
    #[serde(default = "default_politeness_delay_ms")]
    pub politeness_delay_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Transport failures are retried up to this ceiling, then the page is
    /// recorded as failed and its subtree abandoned.
    #[serde(default = "default_max_fetch_retries")]
    pub max_fetch_retries: u32,
    /// Upper bound on concurrent fetches across all sites.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl CrawlConfig {
    /// The configured site whose scope contains `url`, if any.
    pub fn site_for(&self, url: &str) -> Option<&SiteConfig> {
        self.sites
            .iter()
            .find(|site| url.starts_with(site.url.trim_end_matches('/')))
    }
}

/// Base URL normalized for storage keys and scope comparison.
pub fn site_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn default_user_agent() -> String {
    "site-search-bot/0.1 (+https://example.com/bot)".to_string()
}

fn default_referrer() -> String {
    "https://www.google.com".to_string()
}

fn default_politeness_delay_ms() -> u64 {
    150
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_max_fetch_retries() -> u32 {
    5
}

fn default_concurrency() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: CrawlConfig = serde_json::from_str(
            r#"{"sites": [{"url": "http://example.com", "name": "Example"}]}"#,
        )
        .unwrap();
        assert_eq!(config.politeness_delay_ms, 150);
        assert_eq!(config.fetch_timeout_secs, 60);
        assert_eq!(config.max_fetch_retries, 5);
        assert_eq!(config.concurrency, 16);
    }

    #[test]
    fn scope_lookup_matches_by_prefix() {
        let config: CrawlConfig = serde_json::from_str(
            r#"{"sites": [{"url": "http://example.com/", "name": "Example"}]}"#,
        )
        .unwrap();
        assert!(config.site_for("http://example.com/deep/page").is_some());
        assert!(config.site_for("http://elsewhere.org/").is_none());
    }
}
