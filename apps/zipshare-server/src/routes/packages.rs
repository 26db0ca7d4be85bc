//! Package Routes
//!
//! Public read side of published packages. Unknown, malformed and expired
//! tokens all answer 404.
//!
//! Endpoints:
//! - GET /api/v1/packages/:token - Package metadata and download link
//! - GET /api/v1/packages/:token/download - Stream the archive

use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::io::ReaderStream;

use crate::error::Result;
use crate::packages::PackageResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:token", get(show_package))
        .route("/:token/download", get(download_package))
}

/// GET /api/v1/packages/:token
async fn show_package(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<PackageResponse>> {
    let package = state.packages().get(&token).await?;

    Ok(Json(PackageResponse {
        download_link: state.download_link(&package.token),
        token: package.token,
        created_at: package.created_at,
        expires_at: package.expires_at,
    }))
}

/// GET /api/v1/packages/:token/download
async fn download_package(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Response> {
    let download = state.packages().open(&token).await?;

    tracing::info!(token = %download.package.token, size = download.size, "Serving package");

    let body = Body::from_stream(ReaderStream::new(download.file));
    let disposition = format!("attachment; filename=\"{}\"", download.package.filename);

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, download.size.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
