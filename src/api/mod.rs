//! HTTP routes

mod health;
mod runs;

pub use health::health_routes;
pub use runs::runs_routes;

use axum::Router;

use crate::state::AppState;
use std::sync::Arc;

pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health_routes())
        .merge(runs_routes())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ExtractorMode, Provider};
    use crate::services::backend::testing::ScriptedBackend;
    use crate::services::pipeline::Pipeline;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app(temp_dir: &TempDir) -> Router {
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/a.hpp"), "class A {\n};\n").unwrap();

        let mut config = AppConfig::default();
        config.source_root = root.join("src");
        config.docs_dir = root.join("docs");
        config.manifest_path = root.join("cache/manifest.json");
        config.cache.dir = root.join("cache/responses");
        config.backend.provider = Provider::Offline;
        config.extractor = ExtractorMode::Heuristic;

        let backend = ScriptedBackend::new().with_delay(Duration::from_millis(500));
        let pipeline = Pipeline::new(config, Arc::new(backend));
        create_api_routes(Arc::new(AppState::new(pipeline)))
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let temp_dir = TempDir::new().unwrap();
        let (status, body) = send(&app(&temp_dir), "GET", "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_run_is_404() {
        let temp_dir = TempDir::new().unwrap();
        let (status, body) = send(&app(&temp_dir), "GET", "/api/runs/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(&temp_dir);
        std::fs::remove_dir_all(temp_dir.path().join("src")).unwrap();

        let (status, body) = send(&app, "POST", "/api/runs").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);

        let (_, body) = send(&app, "GET", "/api/runs").await;
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_only_one_active_run() {
        let temp_dir = TempDir::new().unwrap();
        let app = app(&temp_dir);

        let (status, body) = send(&app, "POST", "/api/runs").await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["run_id"].as_str().unwrap().to_string();

        // Backend calls take long enough that the first run is still going
        let (status, _) = send(&app, "POST", "/api/runs").await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "POST", &format!("/api/runs/{}/cancel", run_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (status, body) = send(&app, "GET", "/api/runs").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["stop_requested"], true);
    }
}
