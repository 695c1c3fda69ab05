use anyhow::Result;
use clap::Parser;
use crawler::{CrawlConfig, CrawlOrchestrator};
use engine::{IndexStore, SearchEngine, TextAnalyzer};
use server::{build_app, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "server")]
#[command(about = "Crawl configured sites and serve ranked full-text search")]
struct Args {
    /// Path to the JSON configuration (site list, connection settings)
    #[arg(long, default_value = "config.json")]
    config: String,
    /// Index storage directory
    #[arg(long, default_value = "./data")]
    data_dir: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let raw = std::fs::read_to_string(&args.config)?;
    let config: CrawlConfig = serde_json::from_str(&raw)?;

    let store = Arc::new(IndexStore::open(&args.data_dir)?);
    let analyzer = Arc::new(TextAnalyzer::new());
    let search = Arc::new(SearchEngine::new(Arc::clone(&store), Arc::clone(&analyzer)));
    let orchestrator = Arc::new(CrawlOrchestrator::new(
        Arc::clone(&store),
        analyzer,
        config,
    )?);
    let app = build_app(AppState {
        store,
        search,
        orchestrator,
    });

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
