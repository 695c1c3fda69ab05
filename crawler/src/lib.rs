pub mod config;
pub mod fetch;
pub mod orchestrator;
mod worker;

pub use config::{CrawlConfig, SiteConfig};
pub use fetch::Fetcher;
pub use orchestrator::{CrawlOrchestrator, Phase, STOPPED_BY_USER};
