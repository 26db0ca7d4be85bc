//! Admin Routes
//!
//! Only mounted when `ADMIN_ENABLED` is set.
//!
//! Endpoints:
//! - GET /api/v1/admin/packages - List every package record
//! - DELETE /api/v1/admin/packages - Clear all packages and staged uploads
//! - POST /api/v1/admin/sweep - Run one reclamation sweep now

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};

use crate::error::Result;
use crate::packages::{ClearReport, Package, SweepReport};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/packages", get(list_packages).delete(clear_all))
        .route("/sweep", post(sweep))
}

/// GET /api/v1/admin/packages
async fn list_packages(State(state): State<AppState>) -> Result<Json<Vec<Package>>> {
    Ok(Json(state.admin().list_packages().await?))
}

/// DELETE /api/v1/admin/packages
async fn clear_all(State(state): State<AppState>) -> Result<Json<ClearReport>> {
    Ok(Json(state.admin().clear_all().await?))
}

/// POST /api/v1/admin/sweep
async fn sweep(State(state): State<AppState>) -> Json<SweepReport> {
    Json(state.sweeper().run_once().await)
}
