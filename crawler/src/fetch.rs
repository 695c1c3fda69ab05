use crate::config::CrawlConfig;
use engine::EngineError;
use reqwest::{header, Client, Url};
use std::time::Duration;
use tokio::time::sleep;

/// Result of one fetch. HTTP error statuses are data, not errors; only
/// transport and timeout failures surface as `reqwest::Error`.
pub enum FetchOutcome {
    Page(FetchedPage),
    /// Non-text content type, silently skipped by callers.
    Unsupported,
}

pub struct FetchedPage {
    pub status: u16,
    pub body: String,
    pub final_url: Url,
}

/// HTTP client with the configured identity, redirect cap, bounded timeout
/// and the politeness throttle applied before every request.
pub struct Fetcher {
    client: Client,
    referrer: String,
    delay: Duration,
}

impl Fetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .map_err(|err| EngineError::Client(err.to_string()))?;
        Ok(Self {
            client,
            referrer: config.referrer.clone(),
            delay: Duration::from_millis(config.politeness_delay_ms),
        })
    }

    pub async fn fetch(&self, url: &Url) -> Result<FetchOutcome, reqwest::Error> {
        sleep(self.delay).await;
        let resp = self
            .client
            .get(url.clone())
            .header(header::REFERER, &self.referrer)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let final_url = resp.url().clone();
        if let Some(content_type) = resp.headers().get(header::CONTENT_TYPE) {
            if let Ok(value) = content_type.to_str() {
                if !value.starts_with("text/") && !value.contains("html") {
                    return Ok(FetchOutcome::Unsupported);
                }
            }
        }
        let body = resp.text().await?;
        Ok(FetchOutcome::Page(FetchedPage {
            status,
            body,
            final_url,
        }))
    }
}
