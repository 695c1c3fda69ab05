use thiserror::Error;

/// Error taxonomy shared by the store, the search engine and the crawler.
///
/// Only fetch transport failures and frequency conflicts are ever retried;
/// every other variant is surfaced directly to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Search query must not be empty")]
    EmptyQuery,
    #[error("No indexed sites found")]
    NoIndexedSites,
    #[error("The site must have an indexed status")]
    SiteNotIndexed,
    #[error("The '{0}' page is outside the sites specified in the configuration file")]
    OutOfScope(String),
    #[error("Indexing has already started")]
    AlreadyRunning,
    #[error("Indexing is not running")]
    NotRunning,
    #[error("Indexing already in the process of stopping")]
    AlreadyStopping,
    #[error("The '{0}' site is currently being crawled")]
    SiteBusy(String),
    #[error("failed to fetch '{url}': {reason}")]
    FetchFailed { url: String, reason: String },
    #[error("gave up updating frequency of lemma {0} after repeated conflicts")]
    FrequencyConflict(u64),
    #[error("http client error: {0}")]
    Client(String),
    #[error("missing {entity} with id {id}")]
    Missing { entity: &'static str, id: u64 },
    #[error(transparent)]
    Storage(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
