use crate::error::{EngineError, Result};
use crate::model::{Lemma, Page, Posting, Site, SiteStatistics, SiteStatus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Bounded retry ceiling for optimistic frequency updates.
const MAX_FREQUENCY_ATTEMPTS: u32 = 14;
const BACKOFF_BASE_MS: u64 = 50;
const BACKOFF_MAX_SHIFT: u32 = 5;

/// Repository over the four persisted entities: Site, Page, Lemma, Posting.
///
/// All index-maintenance operations are atomic with respect to concurrent
/// callers on the same site: find-or-create and decrement-then-delete of
/// lemma rows run under a per-site lock, and the frequency read-modify-write
/// itself goes through compare-and-swap with bounded backoff so a conflict
/// is never a lost update.
pub struct IndexStore {
    db: sled::Db,
    sites: sled::Tree,
    site_urls: sled::Tree,
    pages: sled::Tree,
    page_paths: sled::Tree,
    lemmas: sled::Tree,
    lemma_terms: sled::Tree,
    postings: sled::Tree,
    lemma_postings: sled::Tree,
    site_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl IndexStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            sites: db.open_tree("sites")?,
            site_urls: db.open_tree("site_urls")?,
            pages: db.open_tree("pages")?,
            page_paths: db.open_tree("page_paths")?,
            lemmas: db.open_tree("lemmas")?,
            lemma_terms: db.open_tree("lemma_terms")?,
            postings: db.open_tree("postings")?,
            lemma_postings: db.open_tree("lemma_postings")?,
            site_locks: Mutex::new(HashMap::new()),
            db,
        })
    }

    // ---- sites ----

    pub fn site_exists(&self, url: &str) -> Result<bool> {
        Ok(self.site_urls.contains_key(url.as_bytes())?)
    }

    pub fn find_site(&self, url: &str) -> Result<Option<Site>> {
        match self.site_urls.get(url.as_bytes())? {
            Some(raw) => self.site(bincode::deserialize(&raw)?),
            None => Ok(None),
        }
    }

    pub fn site(&self, id: u64) -> Result<Option<Site>> {
        match self.sites.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn all_sites(&self) -> Result<Vec<Site>> {
        let mut sites = Vec::new();
        for entry in self.sites.iter() {
            let (_, raw) = entry?;
            sites.push(bincode::deserialize(&raw)?);
        }
        Ok(sites)
    }

    pub fn sites_by_status(&self, status: SiteStatus) -> Result<Vec<Site>> {
        Ok(self
            .all_sites()?
            .into_iter()
            .filter(|site| site.status == status)
            .collect())
    }

    /// Create a fresh Site row in INDEXING status. Callers reset any prior
    /// row for the same URL first.
    pub fn create_site(&self, url: &str, name: &str) -> Result<Site> {
        let site = Site {
            id: self.db.generate_id()?,
            url: url.to_string(),
            name: name.to_string(),
            status: SiteStatus::Indexing,
            status_time: unix_now(),
            last_error: None,
        };
        self.sites
            .insert(site.id.to_be_bytes(), bincode::serialize(&site)?)?;
        self.site_urls
            .insert(url.as_bytes(), bincode::serialize(&site.id)?)?;
        Ok(site)
    }

    pub fn set_site_status(
        &self,
        id: u64,
        status: SiteStatus,
        last_error: Option<String>,
    ) -> Result<()> {
        self.update_site(id, |site| {
            site.status = status;
            site.status_time = unix_now();
            site.last_error = last_error.clone();
        })
    }

    /// Refresh the status timestamp: the liveness signal touched on every
    /// page persisted for the site.
    pub fn touch_site(&self, id: u64) -> Result<()> {
        self.update_site(id, |site| site.status_time = unix_now())
    }

    fn update_site<F: Fn(&mut Site)>(&self, id: u64, apply: F) -> Result<()> {
        let key = id.to_be_bytes();
        for attempt in 0..MAX_FREQUENCY_ATTEMPTS {
            let Some(raw) = self.sites.get(key)? else {
                return Err(EngineError::Missing {
                    entity: "site",
                    id,
                });
            };
            let mut site: Site = bincode::deserialize(&raw)?;
            apply(&mut site);
            let swap = self.sites.compare_and_swap(
                key,
                Some(&raw),
                Some(bincode::serialize(&site)?),
            )?;
            if swap.is_ok() {
                return Ok(());
            }
            backoff(attempt);
        }
        Err(EngineError::FrequencyConflict(id))
    }

    /// Delete a Site and everything it owns: pages, postings, lemmas.
    pub fn reset_site(&self, url: &str) -> Result<()> {
        let Some(site) = self.find_site(url)? else {
            return Ok(());
        };
        let lock = self.site_lock(site.id);
        let _guard = lock.lock();
        let page_ids = self.site_page_ids(site.id)?;
        for page_id in page_ids {
            for entry in self.postings.scan_prefix(page_id.to_be_bytes()) {
                let (key, raw) = entry?;
                let posting: Posting = bincode::deserialize(&raw)?;
                self.postings.remove(key)?;
                self.lemma_postings
                    .remove(pair_key(posting.lemma_id, page_id))?;
            }
            if let Some(raw) = self.pages.remove(page_id.to_be_bytes())? {
                let page: Page = bincode::deserialize(&raw)?;
                self.page_paths
                    .remove(composite_key(site.id, &page.path))?;
            }
        }
        for entry in self.lemma_terms.scan_prefix(site.id.to_be_bytes()) {
            let (key, raw) = entry?;
            let lemma_id: u64 = bincode::deserialize(&raw)?;
            self.lemma_terms.remove(key)?;
            self.lemmas.remove(lemma_id.to_be_bytes())?;
        }
        self.sites.remove(site.id.to_be_bytes())?;
        self.site_urls.remove(url.as_bytes())?;
        self.site_locks.lock().remove(&site.id);
        Ok(())
    }

    // ---- pages ----

    pub fn page(&self, id: u64) -> Result<Option<Page>> {
        match self.pages.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn page_exists(&self, site_id: u64, path: &str) -> Result<bool> {
        Ok(self
            .page_paths
            .contains_key(composite_key(site_id, path))?)
    }

    pub fn page_by_path(&self, site_id: u64, path: &str) -> Result<Option<Page>> {
        match self.page_paths.get(composite_key(site_id, path))? {
            Some(raw) => self.page(bincode::deserialize(&raw)?),
            None => Ok(None),
        }
    }

    /// Insert the page if absent; if a row for (site, path) already exists,
    /// remove its index entries first and update code/content in place.
    pub fn upsert_page(&self, site_id: u64, path: &str, code: u16, content: &str) -> Result<Page> {
        let lock = self.site_lock(site_id);
        let _guard = lock.lock();
        let path_key = composite_key(site_id, path);
        let page = match self.page_paths.get(&path_key)? {
            Some(raw) => {
                let id: u64 = bincode::deserialize(&raw)?;
                self.remove_page_index_locked(id)?;
                let page = Page {
                    id,
                    site_id,
                    path: path.to_string(),
                    code,
                    content: content.to_string(),
                };
                self.pages
                    .insert(id.to_be_bytes(), bincode::serialize(&page)?)?;
                page
            }
            None => {
                let page = Page {
                    id: self.db.generate_id()?,
                    site_id,
                    path: path.to_string(),
                    code,
                    content: content.to_string(),
                };
                self.pages
                    .insert(page.id.to_be_bytes(), bincode::serialize(&page)?)?;
                self.page_paths
                    .insert(path_key, bincode::serialize(&page.id)?)?;
                page
            }
        };
        Ok(page)
    }

    // ---- index maintenance ----

    /// Record one page's lemma counts: find-or-create each site lemma
    /// (frequency +1, this page is new for it after the preceding removal),
    /// then insert one posting per lemma with rank = occurrence count.
    pub fn index_page(
        &self,
        site_id: u64,
        page_id: u64,
        lemma_counts: &HashMap<String, u32>,
    ) -> Result<()> {
        let lock = self.site_lock(site_id);
        let _guard = lock.lock();
        for (text, count) in lemma_counts {
            let lemma_id = self.bump_lemma(site_id, text)?;
            let posting = Posting {
                page_id,
                lemma_id,
                rank: *count as f32,
            };
            self.postings
                .insert(pair_key(page_id, lemma_id), bincode::serialize(&posting)?)?;
            self.lemma_postings.insert(
                pair_key(lemma_id, page_id),
                bincode::serialize(&(page_id, posting.rank))?,
            )?;
        }
        Ok(())
    }

    /// Remove every posting of the page, decrementing each referenced
    /// lemma's frequency and deleting lemmas that reach zero.
    pub fn remove_page_index(&self, page_id: u64) -> Result<()> {
        let Some(page) = self.page(page_id)? else {
            return Ok(());
        };
        let lock = self.site_lock(page.site_id);
        let _guard = lock.lock();
        self.remove_page_index_locked(page_id)
    }

    fn remove_page_index_locked(&self, page_id: u64) -> Result<()> {
        for entry in self.postings.scan_prefix(page_id.to_be_bytes()) {
            let (key, raw) = entry?;
            let posting: Posting = bincode::deserialize(&raw)?;
            self.adjust_frequency(posting.lemma_id, -1)?;
            self.postings.remove(key)?;
            self.lemma_postings
                .remove(pair_key(posting.lemma_id, page_id))?;
        }
        Ok(())
    }

    /// Find-or-create the (site, lemma) row and increment its frequency.
    /// Runs under the per-site lock, so concurrent first writers cannot
    /// create duplicate rows.
    fn bump_lemma(&self, site_id: u64, text: &str) -> Result<u64> {
        let term_key = composite_key(site_id, text);
        match self.lemma_terms.get(&term_key)? {
            Some(raw) => {
                let id: u64 = bincode::deserialize(&raw)?;
                self.adjust_frequency(id, 1)?;
                Ok(id)
            }
            None => {
                let lemma = Lemma {
                    id: self.db.generate_id()?,
                    site_id,
                    lemma: text.to_string(),
                    frequency: 1,
                };
                self.lemmas
                    .insert(lemma.id.to_be_bytes(), bincode::serialize(&lemma)?)?;
                self.lemma_terms
                    .insert(term_key, bincode::serialize(&lemma.id)?)?;
                Ok(lemma.id)
            }
        }
    }

    /// Frequency read-modify-write through compare-and-swap with bounded
    /// exponential backoff. A lemma whose frequency reaches zero is deleted
    /// together with its term key. Exhausting the retry ceiling is fatal for
    /// the single page being processed, never for the whole crawl.
    fn adjust_frequency(&self, lemma_id: u64, delta: i64) -> Result<()> {
        let key = lemma_id.to_be_bytes();
        for attempt in 0..MAX_FREQUENCY_ATTEMPTS {
            let Some(raw) = self.lemmas.get(key)? else {
                return Ok(());
            };
            let mut lemma: Lemma = bincode::deserialize(&raw)?;
            let frequency = lemma.frequency as i64 + delta;
            let swap = if frequency <= 0 {
                let removed =
                    self.lemmas
                        .compare_and_swap(key, Some(&raw), None::<&[u8]>)?;
                if removed.is_ok() {
                    self.lemma_terms
                        .remove(composite_key(lemma.site_id, &lemma.lemma))?;
                }
                removed
            } else {
                lemma.frequency = frequency as u32;
                self.lemmas
                    .compare_and_swap(key, Some(&raw), Some(bincode::serialize(&lemma)?))?
            };
            if swap.is_ok() {
                return Ok(());
            }
            tracing::debug!(lemma_id, attempt, "frequency update conflict");
            backoff(attempt);
        }
        Err(EngineError::FrequencyConflict(lemma_id))
    }

    // ---- search-side reads ----

    pub fn lemma(&self, id: u64) -> Result<Option<Lemma>> {
        match self.lemmas.get(id.to_be_bytes())? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn lemma_by_text(&self, site_id: u64, text: &str) -> Result<Option<Lemma>> {
        match self.lemma_terms.get(composite_key(site_id, text))? {
            Some(raw) => self.lemma(bincode::deserialize(&raw)?),
            None => Ok(None),
        }
    }

    /// Ids of every page carrying the lemma.
    pub fn pages_with_lemma(&self, lemma_id: u64) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in self.lemma_postings.scan_prefix(lemma_id.to_be_bytes()) {
            let (_, raw) = entry?;
            let (page_id, _rank): (u64, f32) = bincode::deserialize(&raw)?;
            ids.push(page_id);
        }
        Ok(ids)
    }

    pub fn posting_rank(&self, page_id: u64, lemma_id: u64) -> Result<Option<f32>> {
        match self.postings.get(pair_key(page_id, lemma_id))? {
            Some(raw) => {
                let posting: Posting = bincode::deserialize(&raw)?;
                Ok(Some(posting.rank))
            }
            None => Ok(None),
        }
    }

    pub fn page_postings(&self, page_id: u64) -> Result<Vec<Posting>> {
        let mut postings = Vec::new();
        for entry in self.postings.scan_prefix(page_id.to_be_bytes()) {
            let (_, raw) = entry?;
            postings.push(bincode::deserialize(&raw)?);
        }
        Ok(postings)
    }

    // ---- statistics ----

    /// (page count, distinct lemma count) for one site.
    pub fn site_counts(&self, site_id: u64) -> Result<(u64, u64)> {
        let mut pages = 0u64;
        for entry in self.page_paths.scan_prefix(site_id.to_be_bytes()) {
            entry?;
            pages += 1;
        }
        let mut lemmas = 0u64;
        for entry in self.lemma_terms.scan_prefix(site_id.to_be_bytes()) {
            entry?;
            lemmas += 1;
        }
        Ok((pages, lemmas))
    }

    pub fn statistics(&self) -> Result<Vec<SiteStatistics>> {
        let mut detailed = Vec::new();
        for site in self.all_sites()? {
            let (pages, lemmas) = self.site_counts(site.id)?;
            detailed.push(SiteStatistics {
                url: site.url,
                name: site.name,
                status: site.status.as_str().to_string(),
                status_time: site.status_time,
                error: site.last_error,
                pages,
                lemmas,
            });
        }
        Ok(detailed)
    }

    // ---- internals ----

    fn site_page_ids(&self, site_id: u64) -> Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in self.page_paths.scan_prefix(site_id.to_be_bytes()) {
            let (_, raw) = entry?;
            ids.push(bincode::deserialize(&raw)?);
        }
        Ok(ids)
    }

    fn site_lock(&self, site_id: u64) -> Arc<Mutex<()>> {
        Arc::clone(
            self.site_locks
                .lock()
                .entry(site_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

fn backoff(attempt: u32) {
    let shift = attempt.min(BACKOFF_MAX_SHIFT);
    std::thread::sleep(Duration::from_millis(BACKOFF_BASE_MS << shift));
}

/// Composite key: fixed-width big-endian id prefix plus a textual suffix, so
/// `scan_prefix` over the id covers exactly one site's rows.
fn composite_key(id: u64, text: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + text.len());
    key.extend_from_slice(&id.to_be_bytes());
    key.extend_from_slice(text.as_bytes());
    key
}

fn pair_key(a: u64, b: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&a.to_be_bytes());
    key[8..].copy_from_slice(&b.to_be_bytes());
    key
}
