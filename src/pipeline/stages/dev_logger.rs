//! Development request logger: `GET /path 200 1.234 ms - 512`, written once
//! the response is known. Only present in development mode.

use std::time::Instant;

use async_trait::async_trait;
use axum::http::header;
use axum::response::Response;

use crate::pipeline::{Flow, RequestContext, Stage};

/// When the dev logger first saw the request.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

#[derive(Debug, Default)]
pub struct DevLogger;

#[async_trait]
impl Stage for DevLogger {
    fn name(&self) -> &str {
        "dev-logger"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        match ctx.attributes.attach(RequestStart(Instant::now())) {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Fail(e),
        }
    }

    fn on_response(&self, ctx: &RequestContext, response: &Response) {
        let elapsed_ms = ctx
            .attributes
            .get::<RequestStart>()
            .map(|s| s.0.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or_default();
        let length = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");

        tracing::debug!(
            "{} {} {} {:.3} ms - {}",
            ctx.method,
            ctx.original_url(),
            response.status().as_u16(),
            elapsed_ms,
            length
        );
    }
}
