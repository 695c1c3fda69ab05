use crate::fetch::{FetchOutcome, Fetcher};
use engine::{EngineError, IndexStore, Site, TextAnalyzer};
use parking_lot::Mutex;
use url::Url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Status recorded for a page whose fetch retries were exhausted.
const FAILED_FETCH_CODE: u16 = 599;
/// Codes at or above this are persisted but never indexed.
const ERROR_STATUS_THRESHOLD: u16 = 400;

const EXCLUDED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "pdf", "doc", "docx", "xls", "xlsx",
    "ppt", "pptx", "zip", "rar", "gz", "tar", "7z", "mp3", "mp4", "avi", "mov", "webm", "exe",
];

/// How one crawl subtree ended. Cancellation is a value, not an error: a
/// stopped worker unwinds normally and its site is marked afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CrawlEnd {
    Complete,
    Stopped,
}

/// Everything a site's workers share: the claimed-path set is the single
/// deduplication gate, the semaphore bounds concurrent fetches.
pub(crate) struct SiteCrawl {
    pub site: Site,
    pub base: Url,
    pub store: Arc<IndexStore>,
    pub analyzer: Arc<TextAnalyzer>,
    pub fetcher: Arc<Fetcher>,
    pub visited: Mutex<HashSet<String>>,
    pub stop: Arc<AtomicBool>,
    pub limiter: Arc<Semaphore>,
    pub max_retries: u32,
}

impl SiteCrawl {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }
}

/// Recursive unit of work: fetch one path, persist and index it, then fork
/// one child per newly claimed in-scope link and join them all.
pub(crate) fn crawl(
    ctx: Arc<SiteCrawl>,
    path: String,
) -> Pin<Box<dyn Future<Output = Result<CrawlEnd, EngineError>> + Send>> {
    Box::pin(async move {
        if ctx.stopped() {
            return Ok(CrawlEnd::Stopped);
        }
        let Ok(url) = ctx.base.join(&path) else {
            return Ok(CrawlEnd::Complete);
        };

        let fetched = {
            let Ok(_permit) = ctx.limiter.clone().acquire_owned().await else {
                return Ok(CrawlEnd::Stopped);
            };
            let mut attempt = 0;
            loop {
                if ctx.stopped() {
                    return Ok(CrawlEnd::Stopped);
                }
                match ctx.fetcher.fetch(&url).await {
                    Ok(outcome) => break outcome,
                    Err(err) if attempt < ctx.max_retries => {
                        attempt += 1;
                        tracing::warn!(%url, attempt, error = %err, "fetch failed, retrying");
                    }
                    Err(err) => {
                        tracing::warn!(%url, error = %err, "fetch retries exhausted");
                        ctx.store
                            .upsert_page(ctx.site.id, &path, FAILED_FETCH_CODE, "")?;
                        ctx.store.touch_site(ctx.site.id)?;
                        return Ok(CrawlEnd::Complete);
                    }
                }
            }
        };
        let page = match fetched {
            FetchOutcome::Unsupported => return Ok(CrawlEnd::Complete),
            FetchOutcome::Page(page) => page,
        };
        if ctx.stopped() {
            return Ok(CrawlEnd::Stopped);
        }

        let stored = ctx
            .store
            .upsert_page(ctx.site.id, &path, page.status, &page.body)?;
        ctx.store.touch_site(ctx.site.id)?;
        if page.status < ERROR_STATUS_THRESHOLD {
            let lemma_counts = ctx.analyzer.lemmas(&page.body);
            if let Err(err) = ctx.store.index_page(ctx.site.id, stored.id, &lemma_counts) {
                // Fatal for this one page only; the crawl goes on.
                tracing::error!(%url, error = %err, "failed to index page");
            }
        }
        tracing::info!(%url, status = page.status, "page processed");

        let children = discover_links(&ctx, &page.body, &url, &path);
        let mut tasks: JoinSet<Result<CrawlEnd, EngineError>> = JoinSet::new();
        for child in children {
            if ctx.stopped() {
                break;
            }
            tasks.spawn(crawl(Arc::clone(&ctx), child));
        }
        let mut end = if ctx.stopped() {
            CrawlEnd::Stopped
        } else {
            CrawlEnd::Complete
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(CrawlEnd::Complete)) => {}
                Ok(Ok(CrawlEnd::Stopped)) => end = CrawlEnd::Stopped,
                Ok(Err(err)) => return Err(err),
                Err(err) => {
                    tracing::error!(error = %err, "crawl task panicked");
                }
            }
        }
        Ok(end)
    })
}

/// Keep links that are absolute, inside the site scope, not query-decorated,
/// not the page itself, not a binary download, and not yet claimed. Claiming
/// through the shared visited set is atomic: a link that loses the race is
/// dropped here.
fn discover_links(ctx: &SiteCrawl, html: &str, page_url: &Url, current_path: &str) -> Vec<String> {
    let selector = Selector::parse("a[href]").expect("valid selector");
    let doc = Html::parse_document(html);
    let mut links = Vec::new();
    for element in doc.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut link) = page_url.join(href) else {
            continue;
        };
        if !link.scheme().starts_with("http") {
            continue;
        }
        link.set_fragment(None);
        if link.origin() != ctx.base.origin() {
            continue;
        }
        if link.query().is_some() {
            continue;
        }
        let path = link.path().to_string();
        if path == current_path || has_excluded_extension(&path) {
            continue;
        }
        if !ctx.visited.lock().insert(path.clone()) {
            continue;
        }
        links.push(path);
    }
    links
}

fn has_excluded_extension(path: &str) -> bool {
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, ext)) => EXCLUDED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}
