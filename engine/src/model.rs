use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteStatus {
    Indexing,
    Indexed,
    Failed,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Indexing => "INDEXING",
            SiteStatus::Indexed => "INDEXED",
            SiteStatus::Failed => "FAILED",
        }
    }
}

/// At most one row per base URL. `status_time` is refreshed on every page
/// persisted for the site and doubles as a crawl liveness signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: u64,
    pub url: String,
    pub name: String,
    pub status: SiteStatus,
    pub status_time: i64,
    pub last_error: Option<String>,
}

/// One fetched page; `path` is relative to the site base and unique within
/// the site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page {
    pub id: u64,
    pub site_id: u64,
    pub path: String,
    pub code: u16,
    pub content: String,
}

/// Unique per (site, lemma). `frequency` counts the distinct pages of the
/// site that carry at least one occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lemma {
    pub id: u64,
    pub site_id: u64,
    pub lemma: String,
    pub frequency: u32,
}

/// Inverted-index entry: one row per distinct (page, lemma) pair, with the
/// occurrence count on that page as the rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Posting {
    pub page_id: u64,
    pub lemma_id: u64,
    pub rank: f32,
}

/// Per-site detail for the statistics report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteStatistics {
    pub url: String,
    pub name: String,
    pub status: String,
    pub status_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub pages: u64,
    pub lemmas: u64,
}
