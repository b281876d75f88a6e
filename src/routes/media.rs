use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::analysis::DreamAnalysis;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentSession;
use crate::images::UploadError;
use crate::state::AppState;

/// Headroom for multipart framing on top of the image itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct AnalysisRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct UploadBody {
    pub url: String,
}

pub fn router(max_image_bytes: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/images",
            post(upload_image).layer(DefaultBodyLimit::max(max_image_bytes + MULTIPART_OVERHEAD)),
        )
        .route("/analysis", post(analyze))
}

/// POST /images (multipart field `image`)
pub async fn upload_image(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    mut multipart: Multipart,
) -> AppResult<Json<UploadBody>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.body_text()))?
    {
        if field.name() != Some("image") {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;

        tracing::info!("User {} uploading {} bytes", session.user_id, data.len());
        let url = state
            .images
            .upload(state.store.as_ref(), data, file_name.as_deref())
            .await?;
        return Ok(Json(UploadBody { url }));
    }

    Err(UploadError::Empty.into())
}

/// POST /analysis
pub async fn analyze(
    State(state): State<AppState>,
    CurrentSession(_session): CurrentSession,
    Json(body): Json<AnalysisRequest>,
) -> AppResult<Json<DreamAnalysis>> {
    let analysis = state
        .analysis
        .analyze(state.store.as_ref(), &body.text)
        .await?;
    Ok(Json(analysis))
}
