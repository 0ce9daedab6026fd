use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::{
    middlewares::auth::JwtClaims,
    models::{
        LearningProgressResponse, ModuleProgress, ModuleType, ModuleTypeInfo, OverallStats,
        UpdateProgressRequest,
    },
    services::{
        progress_service::{ProgressError, ProgressService},
        AppState,
    },
    storage::mongo::{MongoAnswerStore, MongoCatalog, MongoSnapshotStore},
};

/// GET /api/v1/progress — lazily materializes the snapshot on first read and
/// returns it with the derived percentages.
pub(crate) async fn get_learning_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<LearningProgressResponse>, ApiError> {
    let user_id = require_user(&claims)?;
    let snapshot = progress_service(&state).snapshot(&user_id).await?;
    Ok(Json(snapshot.into()))
}

/// POST /api/v1/progress — the only mutation entry point: recompute, add
/// study time, advance the streak.
pub(crate) async fn update_learning_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Json(payload): Json<UpdateProgressRequest>,
) -> Result<Json<LearningProgressResponse>, ApiError> {
    let user_id = require_user(&claims)?;
    let snapshot = progress_service(&state)
        .upsert_snapshot(&user_id, payload.study_time)
        .await?;
    Ok(Json(snapshot.into()))
}

/// GET /api/v1/progress/stats
pub(crate) async fn get_overall_stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<OverallStats>, ApiError> {
    let user_id = require_user(&claims)?;
    let stats = progress_service(&state)
        .compute_overall_stats(&user_id)
        .await?;
    Ok(Json(stats))
}

/// GET /api/v1/progress/modules/{module_type}
pub(crate) async fn get_module_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(module_type): Path<String>,
) -> Result<Json<ModuleProgress>, ApiError> {
    let user_id = require_user(&claims)?;
    let module_type: ModuleType = module_type.parse().map_err(ProgressError::from)?;
    let progress = progress_service(&state)
        .compute_module_progress(&user_id, module_type)
        .await?;
    Ok(Json(progress))
}

/// GET /api/v1/modules/types — the recognized module-type tags.
pub(crate) async fn list_module_types() -> Json<Vec<ModuleTypeInfo>> {
    Json(
        ModuleType::ALL
            .iter()
            .map(|mt| ModuleTypeInfo {
                value: mt.as_str(),
                label: mt.label(),
            })
            .collect(),
    )
}

fn progress_service(
    state: &AppState,
) -> ProgressService<MongoCatalog, MongoAnswerStore, MongoSnapshotStore> {
    ProgressService::new(
        MongoCatalog::new(state.mongo.clone()),
        MongoAnswerStore::new(state.mongo.clone()),
        MongoSnapshotStore::new(state.mongo.clone()),
    )
}

fn require_user(claims: &JwtClaims) -> Result<String, ApiError> {
    let user_id = claims.sub.trim();
    if user_id.is_empty() {
        return Err(ApiError::from(ProgressError::UserNotFound(
            claims.sub.clone(),
        )));
    }
    Ok(user_id.to_string())
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<ProgressError> for ApiError {
    fn from(err: ProgressError) -> Self {
        match err {
            ProgressError::InvalidModuleType(e) => ApiError::BadRequest(e.to_string()),
            ProgressError::UserNotFound(user) => {
                ApiError::NotFound(format!("User not found: {}", user))
            }
            ProgressError::ConcurrentUpdateConflict(user) => ApiError::Conflict(format!(
                "Progress update for user {} conflicted, please retry",
                user
            )),
            ProgressError::Storage(e) => {
                tracing::error!("Progress storage failure: {:#}", e);
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(message)).into_response()
    }
}
