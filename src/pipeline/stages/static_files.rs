//! Static file serving from the public directory.
//!
//! Answers `GET`/`HEAD` for files that exist; anything else falls through to
//! the next stage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::error::Error;
use crate::pipeline::{Flow, RequestContext, Stage};

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    serve_dir: ServeDir,
}

impl StaticFiles {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let serve_dir = ServeDir::new(&root).append_index_html_on_directories(true);
        Self { root, serve_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl Stage for StaticFiles {
    fn name(&self) -> &str {
        "static-files"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if ctx.method != Method::GET && ctx.method != Method::HEAD {
            return Flow::Continue;
        }

        let mut builder = Request::builder().method(ctx.method.clone()).uri(ctx.path.as_str());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(ctx.headers.clone());
        }
        let request = match builder.body(Body::empty()) {
            Ok(request) => request,
            Err(e) => return Flow::Fail(Error::Internal(e.to_string())),
        };

        let response = match self.serve_dir.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED => Flow::Continue,
            _ => Flow::Respond(response.map(Body::new)),
        }
    }
}
