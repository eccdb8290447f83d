use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};

use common::Config;

use crate::error::PipelineError;
use crate::model::{Article, Briefing};
use crate::pagination::SortMode;
use crate::session::{Counts, FeedSession, LoadMore, Page, RefreshOutcome};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub session: FeedSession,
}

/// Response structure for `/api/v1/status`.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    uptime_seconds: i64,
    counts: Counts,
    fetched_at: Option<DateTime<Utc>>,
}

/// Request body for re-analyzing one article.
#[derive(Deserialize)]
struct AnalyzeRequest {
    id: String,
}

fn status_for(e: &PipelineError) -> Status {
    match e {
        PipelineError::NotFound(_) | PipelineError::EmptyFeed => Status::NotFound,
        PipelineError::Analysis(_) => Status::BadGateway,
        PipelineError::BatchSubmission(_) => Status::UnprocessableEntity,
        _ => Status::InternalServerError,
    }
}

fn log_and_map(context: &str, e: PipelineError) -> Status {
    let status = status_for(&e);
    if status.code >= 500 {
        tracing::error!("{}: {}", context, e);
    } else {
        tracing::info!("{}: {}", context, e);
    }
    status
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/status")]
async fn status(state: &State<AppState>) -> Json<StatusResponse> {
    let uptime = (Utc::now() - state.started_at).num_seconds();
    Json(StatusResponse {
        status: "ok",
        uptime_seconds: uptime,
        counts: state.session.counts().await,
        fetched_at: state.session.fetched_at().await,
    })
}

/// Current page of the analyzed feed. Any of `category`, `sort` and `page`
/// updates the view state first; changing category or sort starts over at
/// page 1.
///
/// The view state belongs to the session, not the request: the service has a
/// single reader, so parameters left out keep the value from the last call
/// and concurrent clients share one filter, sort and page.
#[get("/api/v1/feed?<category>&<sort>&<page>")]
async fn feed(
    state: &State<AppState>,
    category: Option<String>,
    sort: Option<String>,
    page: Option<usize>,
) -> Result<Json<Page>, Status> {
    let session = &state.session;

    if let Some(sort) = sort {
        let mode: SortMode = sort.parse().map_err(|e| {
            tracing::info!("rejecting feed request: {}", e);
            Status::BadRequest
        })?;
        session.set_sort(mode).await;
    }
    if let Some(category) = category {
        session.set_filter(&category).await;
    }
    if let Some(page) = page {
        session.set_page(page).await;
    }

    Ok(Json(session.page().await))
}

#[post("/api/v1/feed/refresh")]
async fn refresh(state: &State<AppState>) -> Result<Json<RefreshOutcome>, Status> {
    state
        .session
        .refresh()
        .await
        .map(Json)
        .map_err(|e| log_and_map("refresh failed", e))
}

#[post("/api/v1/feed/more")]
async fn load_more(state: &State<AppState>) -> Result<Json<LoadMore>, Status> {
    state
        .session
        .load_more()
        .await
        .map(Json)
        .map_err(|e| log_and_map("load more failed", e))
}

#[post("/api/v1/articles/analyze", format = "json", data = "<body>")]
async fn analyze_article(state: &State<AppState>, body: Json<AnalyzeRequest>) -> Result<Json<Article>, Status> {
    state
        .session
        .reanalyze(&body.id)
        .await
        .map(Json)
        .map_err(|e| log_and_map("re-analysis failed", e))
}

#[get("/api/v1/briefing")]
async fn briefing(state: &State<AppState>) -> Result<Json<Briefing>, Status> {
    state
        .session
        .briefing()
        .await
        .map(Json)
        .map_err(|e| log_and_map("briefing failed", e))
}

/// Assemble the Rocket instance with managed state and routes.
pub fn build_rocket(session: FeedSession, config: Option<&Config>) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = config.and_then(|c| c.server.as_ref()) {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let state = AppState {
        started_at: Utc::now(),
        session,
    };

    rocket::custom(fig).manage(state).mount(
        "/",
        routes![health, status, feed, refresh, load_more, analyze_article, briefing],
    )
}

/// Build and launch the HTTP server. Blocks until Rocket shuts down.
pub async fn launch_rocket(session: FeedSession, config: &Config) -> Result<()> {
    tracing::info!("Starting Rocket HTTP server");
    build_rocket(session, Some(config))
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
