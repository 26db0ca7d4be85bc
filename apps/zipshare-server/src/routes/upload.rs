//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/uploads - Begin an upload, returns its token
//! - POST /api/v1/uploads/:token/chunks?path=&index=&total= - Upload one chunk
//! - POST /api/v1/uploads/:token/finalize - Assemble and publish the package

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    routing::post,
    Json, Router,
};

use crate::error::Result;
use crate::state::AppState;
use crate::upload::{BeginResponse, ChunkAck, ChunkQuery, FinalizeRequest, FinalizeResponse};

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(max_chunk_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/", post(begin_upload))
        .route(
            "/:token/chunks",
            post(upload_chunk).layer(DefaultBodyLimit::max(max_chunk_bytes)),
        )
        .route("/:token/finalize", post(finalize_upload))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/uploads
///
/// Start an upload. The token addresses every later call.
async fn begin_upload(State(state): State<AppState>) -> Result<Json<BeginResponse>> {
    let session = state.uploads().begin().await?;

    Ok(Json(BeginResponse {
        token: session.token().to_string(),
    }))
}

/// POST /api/v1/uploads/:token/chunks
///
/// Store one chunk. The raw request body is the chunk content.
async fn upload_chunk(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<Json<ChunkAck>> {
    let session = state.uploads().session(&token)?;
    let ack = session
        .receive_chunk(&query.path, query.index, query.total, &body)
        .await?;

    tracing::debug!(
        token = %token,
        path = %ack.path,
        index = ack.chunk_index,
        total = ack.total_chunks,
        size = ack.size,
        "Chunk received"
    );

    Ok(Json(ack))
}

/// POST /api/v1/uploads/:token/finalize
///
/// Build the archive from the declared entries and publish it.
async fn finalize_upload(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(request): Json<FinalizeRequest>,
) -> Result<Json<FinalizeResponse>> {
    let session = state.uploads().session(&token)?;
    let package = session.finalize(&request.entries).await?;

    Ok(Json(FinalizeResponse {
        link: state.package_link(&package.token),
        token: package.token,
        expires_at: package.expires_at,
    }))
}
