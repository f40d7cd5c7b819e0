use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    response::Html,
    routing::{get, post},
};
use serde::Serialize;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error};

use crate::{
    config::AppConfig,
    error::ServiceError,
    model::{LoadStatus, ModelRegistry, TranslationRequest, TranslationResponse},
};

/// Page served when the frontend directory has no readable `index.html`.
const BUNDLED_INDEX: &str = include_str!("../frontend/index.html");

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<ModelRegistry>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
    load_status: LoadStatus,
}

pub fn build_router(config: Arc<AppConfig>, registry: Arc<ModelRegistry>) -> Router {
    let assets = ServeDir::new(&config.frontend_dir);
    let state = AppState { config, registry };

    Router::new()
        .route("/", get(home))
        .route("/translate", post(translate))
        .route("/health", get(health))
        .nest_service("/frontend", assets)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn home(State(state): State<AppState>) -> Html<String> {
    let path = state.config.index_page_path();
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(err) => {
            debug!(path = %path.display(), %err, "serving bundled index page");
            Html(BUNDLED_INDEX.to_string())
        }
    }
}

async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslationRequest>,
) -> Result<Json<TranslationResponse>, ServiceError> {
    match state.registry.translate(request).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            if !matches!(err, ServiceError::ModelNotLoaded) {
                error!(%err, "translation request failed");
            }
            Err(err)
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.registry.is_loaded(),
        load_status: state.registry.status(),
    })
}
