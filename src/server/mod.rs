//! HTTP façade
//!
//! `GET /` shows the landing page, `POST /` runs one batch pass and shows
//! the last session. Session artifacts are served under `/results`.

pub mod page;

use anyhow::Context;
use axum::extract::{Path as UrlPath, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::batch::{BatchOrchestrator, Endpoints};
use crate::storage::session::{INPUT_IMAGE_FILE, OUTPUT_IMAGE_FILE, RESULT_JSON_FILE};
use page::PageView;

/// Shared state of every request handler
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<BatchOrchestrator>,
    endpoints: Arc<Endpoints>,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        endpoints: Endpoints,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            endpoints: Arc::new(endpoints),
            shutdown,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(run_batch))
        .route("/healthz", get(healthz))
        .route("/results/{session_id}/{file}", get(artifact))
        .with_state(state)
}

/// Serve until the shutdown token is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let addr = listener.local_addr()?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn index() -> Html<String> {
    Html(PageView::landing().render())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn run_batch(State(state): State<AppState>) -> (StatusCode, Html<String>) {
    let cancel = state.shutdown.child_token();
    match state
        .orchestrator
        .run_batch_pass(&state.endpoints, &cancel)
        .await
    {
        Ok(outcome) => {
            if outcome.last_session_id.is_none() {
                warn!("Batch pass produced no results");
            }
            (StatusCode::OK, Html(PageView::from_outcome(&outcome).render()))
        }
        Err(err) => {
            error!("Batch pass failed: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(PageView::from_error(&err).render()),
            )
        }
    }
}

async fn artifact(
    State(state): State<AppState>,
    UrlPath((session_id, file)): UrlPath<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    let content_type = match file.as_str() {
        INPUT_IMAGE_FILE | OUTPUT_IMAGE_FILE => "image/png",
        RESULT_JSON_FILE => "application/json",
        _ => return Err(StatusCode::NOT_FOUND),
    };
    if Uuid::parse_str(&session_id).is_err() {
        return Err(StatusCode::NOT_FOUND);
    }

    let path = state
        .orchestrator
        .results_root()
        .join(&session_id)
        .join(&file);
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    Ok(([(CONTENT_TYPE, content_type)], bytes))
}
