//! Router-level test harness over an in-memory library.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use companion_core::test_support::MemoryLibrary;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt as _;

use crate::config::PathsConfig;
use crate::keepalive::KeepAlive;
use crate::{bootstrap, router, AppState};

pub(crate) struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub library: Arc<MemoryLibrary>,
    pub dirs: TempDir,
}

impl TestApp {
    pub(crate) fn new(inactivity_timeout: Option<Duration>) -> Self {
        let dirs = tempfile::tempdir().expect("tempdir");
        let paths = PathsConfig {
            content_dir: dirs.path().join("content"),
            resource_dir: dirs.path().join("resources"),
            license_dir: dirs.path().join("licenses"),
        };
        for dir in [&paths.content_dir, &paths.resource_dir, &paths.license_dir] {
            std::fs::create_dir_all(dir).expect("create test dir");
        }
        let library = Arc::new(MemoryLibrary::new());
        let state = AppState::builder(library.clone(), library.clone(), library.clone())
            .with_keep_alive(KeepAlive::new())
            .with_paths(paths)
            .with_inactivity_timeout(inactivity_timeout)
            .build();
        let (routes, _) = router::build_router();
        let app = bootstrap::assemble(routes, state.clone(), 64);
        Self {
            app,
            state,
            library,
            dirs,
        }
    }

    pub(crate) async fn get(&self, uri: &str) -> Response {
        self.request(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
    }

    pub(crate) async fn get_range(&self, uri: &str, range: &str) -> Response {
        self.request(
            Request::builder()
                .uri(uri)
                .header("range", range)
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    pub(crate) async fn request(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.expect("infallible router")
    }
}

pub(crate) async fn body_bytes(response: Response) -> bytes::Bytes {
    use http_body_util::BodyExt;
    response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
}

pub(crate) async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}
