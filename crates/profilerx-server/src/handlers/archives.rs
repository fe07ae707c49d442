//! Archive management handlers (list, create, load, delete).

use axum::extract::{Path, State};
use axum::Json;

use profilerx_storage::ArchiveSummary;

use crate::error::ApiError;
use crate::schema::archives::{ArchiveCreatedResponse, SuccessResponse};
use crate::state::AppState;

/// Lists archives, newest first.
///
/// `GET /profilerx/archives`
pub async fn list_archives(State(state): State<AppState>) -> Json<Vec<ArchiveSummary>> {
    Json(state.adapter.store().list_archives())
}

/// Moves the current history into a new archive.
///
/// `POST /profilerx/archive`
pub async fn create_archive(
    State(state): State<AppState>,
) -> Result<Json<ArchiveCreatedResponse>, ApiError> {
    match state.adapter.store().try_archive_history() {
        Ok(Some(archive)) => Ok(Json(ArchiveCreatedResponse {
            success: true,
            archive,
        })),
        Ok(None) => Err(ApiError::InternalError(
            "failed to create archive: history is empty".to_string(),
        )),
        Err(e) => Err(ApiError::InternalError(format!(
            "failed to create archive: {}",
            e
        ))),
    }
}

/// Loads an archive into the current history.
///
/// `POST /profilerx/archive/{name}/load`
pub async fn load_archive(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .adapter
        .store()
        .try_load_archive(&name)
        .map_err(|e| ApiError::BadRequest(format!("failed to load archive {}: {}", name, e)))?;
    Ok(Json(SuccessResponse::ok()))
}

/// Deletes an archive.
///
/// `DELETE /profilerx/archive/{name}`
pub async fn delete_archive(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state
        .adapter
        .store()
        .try_delete_archive(&name)
        .map_err(|e| ApiError::BadRequest(format!("failed to delete archive {}: {}", name, e)))?;
    Ok(Json(SuccessResponse::ok()))
}
