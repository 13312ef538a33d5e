//! HTTP surface: JSON endpoints over the analytics service.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::models::{ApiParams, EntityDetails, EntityKind, TasksHomeData};
use crate::service::AnalyticsService;

pub struct AppState {
    pub service: AnalyticsService,
}

impl AppState {
    pub fn new(service: AnalyticsService) -> Arc<Self> {
        Arc::new(Self { service })
    }
}

/// Structured JSON error body.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// Wrapper so service errors can be returned straight from handlers.
#[derive(Debug)]
pub struct ApiError(AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            AppError::InvalidInput(message) => {
                tracing::warn!(message = %message, "Bad request");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Bad request", message.clone()),
                )
            }
            AppError::NotFound { kind, id } => {
                tracing::warn!(kind = %kind, id = %id, "Entity not found");
                (
                    StatusCode::NOT_FOUND,
                    ErrorResponse::with_details("Not found", self.0.to_string()),
                )
            }
            AppError::Store(store_err) => {
                tracing::error!(error = %store_err, "Store unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorResponse::with_details("Store unavailable", store_err.to_string()),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /api/health
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeParams {
    pub date_range: Option<String>,
}

/// GET /api/tasks/home?dateRange=
pub async fn tasks_home(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HomeParams>,
) -> ApiResult<Json<TasksHomeData>> {
    let data = state.service.tasks_home(params.date_range.as_deref()).await?;
    Ok(Json(data))
}

async fn details(state: &AppState, kind: EntityKind, params: &ApiParams) -> ApiResult<Json<EntityDetails>> {
    let details = state.service.entity_details(kind, params).await?;
    Ok(Json(details))
}

/// GET /api/tasks/details?id=&dateRange=&comparisonDateRange=
pub async fn task_details(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApiParams>,
) -> ApiResult<Json<EntityDetails>> {
    details(&state, EntityKind::Task, &params).await
}

/// GET /api/projects/details?id=&dateRange=&comparisonDateRange=
pub async fn project_details(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApiParams>,
) -> ApiResult<Json<EntityDetails>> {
    details(&state, EntityKind::Project, &params).await
}

/// GET /api/pages/details?id=&dateRange=&comparisonDateRange=
pub async fn page_details(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ApiParams>,
) -> ApiResult<Json<EntityDetails>> {
    details(&state, EntityKind::Page, &params).await
}

fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/tasks/home", get(tasks_home))
        .route("/tasks/details", get(task_details))
        .route("/projects/details", get(project_details))
        .route("/pages/details", get(page_details))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(addr: std::net::SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}
