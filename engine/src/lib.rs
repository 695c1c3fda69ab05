pub mod analyzer;
pub mod error;
pub mod model;
pub mod search;
pub mod snippet;
pub mod store;

pub use analyzer::{QueryLemmas, TextAnalyzer};
pub use error::{EngineError, Result};
pub use model::{Lemma, Page, Posting, Site, SiteStatus};
pub use search::{SearchEngine, SearchHit, SearchOutcome};
pub use store::IndexStore;
