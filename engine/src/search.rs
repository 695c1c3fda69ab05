use crate::analyzer::TextAnalyzer;
use crate::error::{EngineError, Result};
use crate::model::{Lemma, Site, SiteStatus};
use crate::snippet;
use crate::store::IndexStore;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Lemmas present on more than this share of a site's pages are too common
/// to be discriminative and never participate in intersection filtering.
pub const DEFAULT_COMMON_WORD_THRESHOLD: f64 = 0.8;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub site: String,
    pub site_name: String,
    pub uri: String,
    pub title: String,
    pub snippet: String,
    pub relevance: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchOutcome {
    pub count: usize,
    pub data: Vec<SearchHit>,
}

struct Candidate {
    page_id: u64,
    site_index: usize,
    relevance: f64,
}

/// Ranked full-text search over the inverted index.
pub struct SearchEngine {
    store: Arc<IndexStore>,
    analyzer: Arc<TextAnalyzer>,
    threshold: f64,
}

impl SearchEngine {
    pub fn new(store: Arc<IndexStore>, analyzer: Arc<TextAnalyzer>) -> Self {
        Self::with_threshold(store, analyzer, DEFAULT_COMMON_WORD_THRESHOLD)
    }

    pub fn with_threshold(
        store: Arc<IndexStore>,
        analyzer: Arc<TextAnalyzer>,
        threshold: f64,
    ) -> Self {
        Self {
            store,
            analyzer,
            threshold,
        }
    }

    /// Execute a query against one INDEXED site or all of them.
    ///
    /// Relevance is the per-page sum of posting ranks over the query lemmas,
    /// normalized by the single maximum across every candidate page of every
    /// scoped site, so the top hit always scores 1.0. Snippets and titles
    /// are built only for the paginated slice.
    pub fn search(
        &self,
        query: &str,
        site_scope: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> Result<SearchOutcome> {
        if query.trim().is_empty() {
            return Err(EngineError::EmptyQuery);
        }
        let sites = self.scoped_sites(site_scope)?;
        let lemma_sets = self.analyzer.query_lemma_sets(query);
        tracing::info!(query, "search started");
        if lemma_sets.filtered.is_empty() {
            return Ok(SearchOutcome {
                count: 0,
                data: Vec::new(),
            });
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for (site_index, site) in sites.iter().enumerate() {
            let lemmas = self.discriminative_lemmas(site, &lemma_sets.filtered)?;
            if lemmas.is_empty() {
                continue;
            }
            for page_id in self.intersect_pages(&lemmas)? {
                let mut relevance = 0.0f64;
                for lemma in &lemmas {
                    if let Some(rank) = self.store.posting_rank(page_id, lemma.id)? {
                        relevance += rank as f64;
                    }
                }
                candidates.push(Candidate {
                    page_id,
                    site_index,
                    relevance,
                });
            }
        }
        if candidates.is_empty() {
            return Ok(SearchOutcome {
                count: 0,
                data: Vec::new(),
            });
        }

        let max_relevance = candidates
            .iter()
            .map(|c| c.relevance)
            .fold(f64::MIN, f64::max);
        for candidate in &mut candidates {
            candidate.relevance /= max_relevance;
        }
        candidates.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.page_id.cmp(&b.page_id))
        });

        let count = candidates.len();
        let slice = if offset >= count {
            &[][..]
        } else {
            &candidates[offset..offset.saturating_add(limit).min(count)]
        };

        let mut data = Vec::with_capacity(slice.len());
        for candidate in slice {
            let page = self
                .store
                .page(candidate.page_id)?
                .ok_or(EngineError::Missing {
                    entity: "page",
                    id: candidate.page_id,
                })?;
            let site = &sites[candidate.site_index];
            let text = self.analyzer.plain_text(&page.content);
            data.push(SearchHit {
                site: site.url.clone(),
                site_name: site.name.clone(),
                uri: page.path,
                title: self.analyzer.title(&page.content),
                snippet: snippet::build(&self.analyzer, &text, &lemma_sets),
                relevance: candidate.relevance,
            });
        }
        tracing::info!(query, count, "search executed");
        Ok(SearchOutcome { count, data })
    }

    fn scoped_sites(&self, site_scope: Option<&str>) -> Result<Vec<Site>> {
        match site_scope {
            Some(url) => {
                let site = self
                    .store
                    .find_site(url.trim_end_matches('/'))?
                    .filter(|site| site.status == SiteStatus::Indexed)
                    .ok_or(EngineError::SiteNotIndexed)?;
                Ok(vec![site])
            }
            None => {
                let sites = self.store.sites_by_status(SiteStatus::Indexed)?;
                if sites.is_empty() {
                    return Err(EngineError::NoIndexedSites);
                }
                Ok(sites)
            }
        }
    }

    /// Lemma rows of the site for the query's content lemmas, minus those
    /// above the common-word cutoff, sorted rarest first. Rarest-first order
    /// keeps the running intersection as small as possible.
    fn discriminative_lemmas(
        &self,
        site: &Site,
        filtered: &HashSet<String>,
    ) -> Result<Vec<Lemma>> {
        let (page_count, _) = self.store.site_counts(site.id)?;
        let cutoff = (page_count as f64 * self.threshold) as u32;
        let mut lemmas = Vec::new();
        for text in filtered {
            if let Some(lemma) = self.store.lemma_by_text(site.id, text)? {
                if lemma.frequency <= cutoff {
                    lemmas.push(lemma);
                }
            }
        }
        lemmas.sort_by_key(|lemma| lemma.frequency);
        Ok(lemmas)
    }

    /// Intersection of "pages containing the lemma" across every remaining
    /// lemma, short-circuiting as soon as it empties.
    fn intersect_pages(&self, lemmas: &[Lemma]) -> Result<Vec<u64>> {
        let mut pages = self.store.pages_with_lemma(lemmas[0].id)?;
        for lemma in &lemmas[1..] {
            let next: HashSet<u64> = self.store.pages_with_lemma(lemma.id)?.into_iter().collect();
            pages.retain(|page_id| next.contains(page_id));
            if pages.is_empty() {
                break;
            }
        }
        Ok(pages)
    }
}
