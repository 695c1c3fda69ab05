use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use crawler::CrawlOrchestrator;
use engine::model::SiteStatistics;
use engine::{EngineError, IndexStore, SearchEngine, SearchHit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<IndexStore>,
    pub search: Arc<SearchEngine>,
    pub orchestrator: Arc<CrawlOrchestrator>,
}

pub fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/startIndexing", get(start_indexing))
        .route("/api/stopIndexing", get(stop_indexing))
        .route("/api/indexPage", post(index_page))
        .route("/api/search", get(search_handler))
        .route("/api/statistics", get(statistics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[derive(Serialize)]
struct OkResponse {
    result: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    result: bool,
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: EngineError) -> ApiError {
    let status = match err {
        EngineError::EmptyQuery
        | EngineError::OutOfScope(_)
        | EngineError::FetchFailed { .. }
        | EngineError::Client(_) => StatusCode::BAD_REQUEST,
        EngineError::AlreadyRunning
        | EngineError::NotRunning
        | EngineError::AlreadyStopping
        | EngineError::SiteNotIndexed
        | EngineError::NoIndexedSites
        | EngineError::SiteBusy(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            result: false,
            error: err.to_string(),
        }),
    )
}

fn internal_error(message: String) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            result: false,
            error: message,
        }),
    )
}

async fn start_indexing(State(state): State<AppState>) -> Result<Json<OkResponse>, ApiError> {
    state.orchestrator.start().map_err(api_error)?;
    Ok(Json(OkResponse { result: true }))
}

async fn stop_indexing(State(state): State<AppState>) -> Result<Json<OkResponse>, ApiError> {
    state.orchestrator.stop().await.map_err(api_error)?;
    Ok(Json(OkResponse { result: true }))
}

#[derive(Deserialize)]
struct IndexPageParams {
    url: String,
}

async fn index_page(
    State(state): State<AppState>,
    Form(params): Form<IndexPageParams>,
) -> Result<Json<OkResponse>, ApiError> {
    state
        .orchestrator
        .index_one_page(&params.url)
        .await
        .map_err(api_error)?;
    Ok(Json(OkResponse { result: true }))
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    site: Option<String>,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    20
}

#[derive(Serialize)]
struct SearchResponse {
    result: bool,
    count: usize,
    data: Vec<SearchHit>,
}

async fn search_handler(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let search = Arc::clone(&state.search);
    let outcome = tokio::task::spawn_blocking(move || {
        search.search(
            &params.query,
            params.site.as_deref(),
            params.offset,
            params.limit,
        )
    })
    .await
    .map_err(|err| internal_error(err.to_string()))?
    .map_err(api_error)?;
    Ok(Json(SearchResponse {
        result: true,
        count: outcome.count,
        data: outcome.data,
    }))
}

#[derive(Serialize)]
struct StatisticsResponse {
    result: bool,
    statistics: StatisticsData,
}

#[derive(Serialize)]
struct StatisticsData {
    total: TotalStatistics,
    detailed: Vec<SiteStatistics>,
}

#[derive(Serialize)]
struct TotalStatistics {
    sites: u64,
    pages: u64,
    lemmas: u64,
    indexing: bool,
}

async fn statistics_handler(
    State(state): State<AppState>,
) -> Result<Json<StatisticsResponse>, ApiError> {
    let detailed = state.store.statistics().map_err(api_error)?;
    let total = TotalStatistics {
        sites: detailed.len() as u64,
        pages: detailed.iter().map(|site| site.pages).sum(),
        lemmas: detailed.iter().map(|site| site.lemmas).sum(),
        indexing: state.orchestrator.running(),
    };
    Ok(Json(StatisticsResponse {
        result: true,
        statistics: StatisticsData { total, detailed },
    }))
}
