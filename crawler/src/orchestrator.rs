use crate::config::{site_base, CrawlConfig};
use crate::fetch::{FetchOutcome, Fetcher};
use crate::worker::{crawl, CrawlEnd, SiteCrawl};
use engine::{EngineError, IndexStore, SiteStatus, TextAnalyzer};
use parking_lot::Mutex;
use url::Url;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

pub const STOPPED_BY_USER: &str = "Indexing stopped by the user";
const ERROR_STATUS_THRESHOLD: u16 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopping,
}

/// Owns one run of "index everything": resets each configured site, forks a
/// root worker per site onto a shared bounded pool, tracks completion, and
/// exposes start/stop/status with mutual exclusion against overlapping runs.
///
/// All run state lives on the instance, never in process-wide statics, so
/// independent orchestrators stay testable in isolation.
pub struct CrawlOrchestrator {
    store: Arc<IndexStore>,
    analyzer: Arc<TextAnalyzer>,
    config: CrawlConfig,
    fetcher: Arc<Fetcher>,
    phase: watch::Sender<Phase>,
    stop: Arc<AtomicBool>,
    /// Base URLs currently owned by either a running crawl or an in-flight
    /// single-page reindex. Ownership is claimed under the lock before any
    /// store write and refused in both directions, so a reindex can never
    /// write against a site row a concurrent run has reset.
    busy_sites: Mutex<HashSet<String>>,
}

/// Releases a reindex's site claim on every exit path.
struct SiteClaim<'a> {
    busy_sites: &'a Mutex<HashSet<String>>,
    base_url: String,
}

impl Drop for SiteClaim<'_> {
    fn drop(&mut self) {
        self.busy_sites.lock().remove(&self.base_url);
    }
}

impl CrawlOrchestrator {
    pub fn new(
        store: Arc<IndexStore>,
        analyzer: Arc<TextAnalyzer>,
        config: CrawlConfig,
    ) -> Result<Self, EngineError> {
        let fetcher = Arc::new(Fetcher::new(&config)?);
        let (phase, _) = watch::channel(Phase::Idle);
        Ok(Self {
            store,
            analyzer,
            config,
            fetcher,
            phase,
            stop: Arc::new(AtomicBool::new(false)),
            busy_sites: Mutex::new(HashSet::new()),
        })
    }

    /// Begin a full crawl of every configured site. Returns immediately;
    /// the run proceeds in the background until complete or stopped.
    pub fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        let mut denied = false;
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Idle {
                *phase = Phase::Running;
                true
            } else {
                denied = true;
                false
            }
        });
        if denied {
            return Err(EngineError::AlreadyRunning);
        }
        self.stop.store(false, Ordering::Relaxed);
        {
            let mut busy = self.busy_sites.lock();
            for site in &self.config.sites {
                let base = site_base(&site.url);
                if busy.contains(&base) {
                    // A single-page reindex holds the site; resetting it now
                    // would orphan the rows that reindex is about to write.
                    self.phase.send_replace(Phase::Idle);
                    return Err(EngineError::SiteBusy(base));
                }
            }
            for site in &self.config.sites {
                busy.insert(site_base(&site.url));
            }
        }
        tracing::info!("indexing started");
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move { orchestrator.run().await });
        Ok(())
    }

    /// Request a stop and block until every outstanding task has observed
    /// the flag and the run has wound down.
    pub async fn stop(&self) -> Result<(), EngineError> {
        let mut denied = None;
        self.phase.send_if_modified(|phase| match phase {
            Phase::Idle => {
                denied = Some(EngineError::NotRunning);
                false
            }
            Phase::Stopping => {
                denied = Some(EngineError::AlreadyStopping);
                false
            }
            Phase::Running => {
                *phase = Phase::Stopping;
                true
            }
        });
        if let Some(err) = denied {
            return Err(err);
        }
        self.stop.store(true, Ordering::Relaxed);
        tracing::info!("started the process of stopping indexing");
        self.wait_until_idle().await;
        tracing::info!("indexing has been stopped");
        Ok(())
    }

    pub fn running(&self) -> bool {
        *self.phase.borrow() != Phase::Idle
    }

    pub async fn wait_until_idle(&self) {
        let mut rx = self.phase.subscribe();
        let _ = rx.wait_for(|phase| *phase == Phase::Idle).await;
    }

    async fn run(&self) {
        let limiter = Arc::new(Semaphore::new(self.config.concurrency));
        let mut roots: JoinSet<(u64, String, Result<CrawlEnd, EngineError>)> = JoinSet::new();
        for site_config in &self.config.sites {
            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            let base_url = site_base(&site_config.url);
            match self.prepare_site(&base_url, &site_config.name, &limiter) {
                Ok(ctx) => {
                    let site_id = ctx.site.id;
                    let url = base_url.clone();
                    tracing::info!(site = %base_url, "indexing started for site");
                    roots.spawn(async move { (site_id, url, crawl(ctx, "/".to_string()).await) });
                }
                Err(err) => {
                    tracing::error!(site = %base_url, error = %err, "failed to start site crawl");
                }
            }
        }

        while let Some(joined) = roots.join_next().await {
            let (site_id, url, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    tracing::error!(error = %err, "site crawl panicked");
                    continue;
                }
            };
            let update = match result {
                Ok(CrawlEnd::Complete) => {
                    tracing::info!(site = %url, "site has been indexed");
                    self.store
                        .set_site_status(site_id, SiteStatus::Indexed, None)
                }
                Ok(CrawlEnd::Stopped) => {
                    tracing::info!(site = %url, "site crawl stopped by user");
                    self.store.set_site_status(
                        site_id,
                        SiteStatus::Failed,
                        Some(STOPPED_BY_USER.to_string()),
                    )
                }
                Err(err) => {
                    tracing::error!(site = %url, error = %err, "site crawl failed");
                    self.store
                        .set_site_status(site_id, SiteStatus::Failed, Some(err.to_string()))
                }
            };
            if let Err(err) = update {
                tracing::error!(site = %url, error = %err, "failed to record site status");
            }
        }

        self.busy_sites.lock().clear();
        self.phase.send_replace(Phase::Idle);
        tracing::info!("indexing finished");
    }

    fn prepare_site(
        &self,
        base_url: &str,
        name: &str,
        limiter: &Arc<Semaphore>,
    ) -> Result<Arc<SiteCrawl>, EngineError> {
        self.store.reset_site(base_url)?;
        let site = self.store.create_site(base_url, name)?;
        let base = Url::parse(base_url)
            .map_err(|err| EngineError::Client(format!("invalid site url '{base_url}': {err}")))?;
        let visited = Mutex::new(HashSet::from(["/".to_string()]));
        Ok(Arc::new(SiteCrawl {
            site,
            base,
            store: Arc::clone(&self.store),
            analyzer: Arc::clone(&self.analyzer),
            fetcher: Arc::clone(&self.fetcher),
            visited,
            stop: Arc::clone(&self.stop),
            limiter: Arc::clone(limiter),
            max_retries: self.config.max_fetch_retries,
        }))
    }

    /// Fetch and (re)index a single page, without recursion. Allowed while a
    /// full crawl runs, as long as that crawl does not own the page's site.
    /// The site stays claimed for the whole operation, so a run started
    /// mid-fetch cannot reset it out from under the pending writes.
    pub async fn index_one_page(&self, url: &str) -> Result<(), EngineError> {
        let parsed =
            Url::parse(url).map_err(|_| EngineError::OutOfScope(url.to_string()))?;
        let site_config = self
            .config
            .site_for(url)
            .ok_or_else(|| EngineError::OutOfScope(url.to_string()))?;
        let base_url = site_base(&site_config.url);
        if !self.busy_sites.lock().insert(base_url.clone()) {
            return Err(EngineError::SiteBusy(base_url));
        }
        let _claim = SiteClaim {
            busy_sites: &self.busy_sites,
            base_url: base_url.clone(),
        };
        let site = self
            .store
            .find_site(&base_url)?
            .filter(|site| site.status == SiteStatus::Indexed)
            .ok_or(EngineError::SiteNotIndexed)?;

        let outcome =
            self.fetcher
                .fetch(&parsed)
                .await
                .map_err(|err| EngineError::FetchFailed {
                    url: url.to_string(),
                    reason: err.to_string(),
                })?;
        let page = match outcome {
            FetchOutcome::Unsupported => {
                return Err(EngineError::FetchFailed {
                    url: url.to_string(),
                    reason: "unsupported content type".to_string(),
                })
            }
            FetchOutcome::Page(page) => page,
        };

        let path = match page.final_url.path() {
            "" => "/",
            path => path,
        }
        .to_string();
        let stored = self
            .store
            .upsert_page(site.id, &path, page.status, &page.body)?;
        self.store.touch_site(site.id)?;
        if page.status < ERROR_STATUS_THRESHOLD {
            let lemma_counts = self.analyzer.lemmas(&page.body);
            self.store.index_page(site.id, stored.id, &lemma_counts)?;
        }
        tracing::info!(%url, "page has been reindexed");
        Ok(())
    }
}
