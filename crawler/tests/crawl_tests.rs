use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use crawler::{CrawlConfig, CrawlOrchestrator, SiteConfig, STOPPED_BY_USER};
use engine::{EngineError, IndexStore, SiteStatus, TextAnalyzer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn config_for(base: &str) -> CrawlConfig {
    CrawlConfig {
        sites: vec![SiteConfig {
            url: base.to_string(),
            name: "Fixture".to_string(),
        }],
        user_agent: "site-search-bot/test".to_string(),
        referrer: "http://localhost/".to_string(),
        politeness_delay_ms: 1,
        fetch_timeout_secs: 5,
        max_fetch_retries: 1,
        concurrency: 4,
    }
}

fn orchestrator_for(base: &str) -> (tempfile::TempDir, Arc<IndexStore>, Arc<CrawlOrchestrator>) {
    let dir = tempdir().unwrap();
    let store = Arc::new(IndexStore::open(dir.path()).unwrap());
    let orchestrator = Arc::new(
        CrawlOrchestrator::new(
            Arc::clone(&store),
            Arc::new(TextAnalyzer::new()),
            config_for(base),
        )
        .unwrap(),
    );
    (dir, store, orchestrator)
}

#[tokio::test]
async fn fragment_links_do_not_create_new_pages() {
    let app = Router::new()
        .route(
            "/",
            get(|| async {
                Html(
                    "<html><head><title>Root</title></head><body>ferrets live here \
                     <a href=\"/#top\">top</a> <a href=\"/\">home</a> \
                     <a href=\"/about\">about</a> <a href=\"/logo.png\">logo</a></body></html>",
                )
            }),
        )
        .route(
            "/about",
            get(|| async { Html("<html><body>about ferrets</body></html>") }),
        );
    let base = serve(app).await;
    let (_dir, store, orchestrator) = orchestrator_for(&base);

    orchestrator.start().unwrap();
    orchestrator.wait_until_idle().await;

    let site = store.find_site(&base).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
    assert!(store.page_exists(site.id, "/").unwrap());
    assert!(store.page_exists(site.id, "/about").unwrap());
    let (pages, lemmas) = store.site_counts(site.id).unwrap();
    assert_eq!(pages, 2);
    assert!(lemmas > 0);
    let ferret = store.lemma_by_text(site.id, "ferret").unwrap().unwrap();
    assert_eq!(ferret.frequency, 2);
}

#[tokio::test]
async fn stop_marks_indexing_sites_failed() {
    // Endless site: every page links to two fresh paths, slowly.
    let counter = Arc::new(AtomicUsize::new(0));
    async fn page(State(counter): State<Arc<AtomicUsize>>) -> Html<String> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let a = counter.fetch_add(1, Ordering::Relaxed);
        let b = counter.fetch_add(1, Ordering::Relaxed);
        Html(format!(
            "<html><body>page <a href=\"/p{a}\">a</a> <a href=\"/p{b}\">b</a></body></html>"
        ))
    }
    let app = Router::new()
        .route("/", get(page))
        .fallback(page)
        .with_state(counter);
    let base = serve(app).await;
    let (_dir, store, orchestrator) = orchestrator_for(&base);

    orchestrator.start().unwrap();
    assert!(orchestrator.running());
    tokio::time::sleep(Duration::from_millis(500)).await;
    orchestrator.stop().await.unwrap();

    assert!(!orchestrator.running());
    let site = store.find_site(&base).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Failed);
    assert_eq!(site.last_error.as_deref(), Some(STOPPED_BY_USER));
}

#[tokio::test]
async fn state_conflicts_are_surfaced() {
    async fn slow_root() -> Html<&'static str> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Html("<html><body>slow</body></html>")
    }
    let app = Router::new().route("/", get(slow_root));
    let base = serve(app).await;
    let (_dir, _store, orchestrator) = orchestrator_for(&base);

    assert!(matches!(
        orchestrator.stop().await,
        Err(EngineError::NotRunning)
    ));
    orchestrator.start().unwrap();
    assert!(matches!(
        orchestrator.start(),
        Err(EngineError::AlreadyRunning)
    ));
    orchestrator.stop().await.unwrap();
    assert!(!orchestrator.running());
}

#[tokio::test]
async fn single_page_reindex_is_idempotent() {
    let app = Router::new().route(
        "/news",
        get(|| async {
            Html("<html><head><title>News</title></head><body>ferret ferret river</body></html>")
        }),
    );
    let base = serve(app).await;
    let (_dir, store, orchestrator) = orchestrator_for(&base);

    // The site must already exist with an indexed status.
    let site = store.create_site(&base, "Fixture").unwrap();
    store
        .set_site_status(site.id, SiteStatus::Indexed, None)
        .unwrap();

    let url = format!("{base}/news");
    orchestrator.index_one_page(&url).await.unwrap();
    let first_freq = store
        .lemma_by_text(site.id, "ferret")
        .unwrap()
        .unwrap()
        .frequency;
    orchestrator.index_one_page(&url).await.unwrap();

    let ferret = store.lemma_by_text(site.id, "ferret").unwrap().unwrap();
    assert_eq!(ferret.frequency, first_freq);
    assert_eq!(ferret.frequency, 1);
    let page = store.page_by_path(site.id, "/news").unwrap().unwrap();
    assert_eq!(store.page_postings(page.id).unwrap().len(), 2);
    let (pages, _) = store.site_counts(site.id).unwrap();
    assert_eq!(pages, 1);

    assert!(matches!(
        orchestrator.index_one_page("http://elsewhere.org/x").await,
        Err(EngineError::OutOfScope(_))
    ));
}

#[tokio::test]
async fn reindex_in_flight_blocks_a_new_run() {
    async fn slow_page() -> Html<&'static str> {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Html("<html><body>ferret burrow</body></html>")
    }
    let app = Router::new()
        .route("/", get(|| async { Html("<html><body>root page</body></html>") }))
        .route("/slow", get(slow_page));
    let base = serve(app).await;
    let (_dir, store, orchestrator) = orchestrator_for(&base);

    let site = store.create_site(&base, "Fixture").unwrap();
    store
        .set_site_status(site.id, SiteStatus::Indexed, None)
        .unwrap();

    let url = format!("{base}/slow");
    let reindex = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.index_one_page(&url).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The reindex still owns the site; a run would reset the row it is
    // about to write against.
    assert!(matches!(
        orchestrator.start(),
        Err(EngineError::SiteBusy(_))
    ));
    assert!(!orchestrator.running());

    reindex.await.unwrap().unwrap();
    assert!(store.page_exists(site.id, "/slow").unwrap());
    assert!(store.lemma_by_text(site.id, "ferret").unwrap().is_some());

    orchestrator.start().unwrap();
    orchestrator.wait_until_idle().await;
    let site = store.find_site(&base).unwrap().unwrap();
    assert_eq!(site.status, SiteStatus::Indexed);
}
