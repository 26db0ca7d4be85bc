//! Route modules for Zipshare Server

pub mod admin;
pub mod health;
pub mod packages;
pub mod upload;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the full application router
pub fn app(state: AppState) -> Router {
    // Build CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/health", get(health::health_check))
        .nest(
            "/api/v1/uploads",
            upload::router(state.config().server.max_chunk_bytes),
        )
        .nest("/api/v1/packages", packages::router());

    if state.config().admin.enabled {
        tracing::warn!("Admin routes enabled");
        router = router.nest("/api/v1/admin", admin::router());
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::Config;
    use crate::db::create_pool;
    use crate::packages::SqlitePackageRegistry;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_app(admin_enabled: bool) -> Router {
        let mut config = Config::default();
        config.admin.enabled = admin_enabled;
        let registry = Arc::new(SqlitePackageRegistry::new(
            create_pool("sqlite::memory:").await.unwrap(),
        ));
        app(AppState::new(config, registry, Arc::new(SystemClock)))
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        for uri in ["/health", "/api/v1/health"] {
            let response = test_app(false)
                .await
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_admin_router_mounted_only_when_enabled() {
        let request = || {
            Request::builder()
                .uri("/api/v1/admin/packages")
                .body(Body::empty())
                .unwrap()
        };

        let disabled = test_app(false).await.oneshot(request()).await.unwrap();
        assert_eq!(disabled.status(), StatusCode::NOT_FOUND);

        let enabled = test_app(true).await.oneshot(request()).await.unwrap();
        assert_eq!(enabled.status(), StatusCode::OK);
    }
}
