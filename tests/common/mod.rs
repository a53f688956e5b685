//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which builds the full pipeline with a temporary
//! static directory and drives it through the axum router with `oneshot`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use devcamper::config::{Config, Mode};
use devcamper::pipeline::stages::FixedWindowLimiter;
use devcamper::pipeline::{build_pipeline, Pipeline};
use devcamper::routes;
use devcamper::server::{create_router, AppContext, Shutdown};

pub const INDEX_HTML: &str = "<h1>DevCamper API</h1>";

/// Full pipeline over a throwaway `public/` directory.
pub struct TestHarness {
    pub config: Config,
    pub pipeline: Pipeline,
    pub shutdown: Shutdown,
    pub static_dir: TempDir,
}

impl TestHarness {
    /// Harness in test mode with default configuration.
    pub fn new() -> Self {
        Self::with_mode(Mode::Test)
    }

    pub fn with_mode(mode: Mode) -> Self {
        let mut config = Config::default();
        config.server.mode = mode;
        Self::with_config(config)
    }

    pub fn with_config(mut config: Config) -> Self {
        let static_dir = tempfile::tempdir().expect("failed to create static dir");
        std::fs::write(static_dir.path().join("index.html"), INDEX_HTML)
            .expect("failed to write index.html");
        config.server.static_dir = static_dir.path().to_path_buf();

        let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit));
        let pipeline = build_pipeline(&config, limiter, routes::api_v1());

        Self {
            config,
            pipeline,
            shutdown: Shutdown::new(),
            static_dir,
        }
    }

    /// Swap in a hand-built pipeline, keeping the static dir alive.
    pub fn with_pipeline(pipeline: Pipeline) -> Self {
        let mut harness = Self::new();
        harness.pipeline = pipeline;
        harness
    }

    pub fn app(&self) -> Router {
        create_router(
            AppContext {
                pipeline: self.pipeline.clone(),
                shutdown: self.shutdown.clone(),
            },
            self.config.body.upload_limit_bytes,
        )
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(get(uri)).await
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::HOST, "localhost:5000")
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::HOST, "localhost:5000")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let text = body_string(response).await;
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("not JSON ({e}): {text}"))
}
