//! Terminal JSON error renderer.
//!
//! Every failure ends up here as `{"success": false, "error": "...", "code": "..."}`
//! with the status taken from [`Error::http_status`].

use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::config::Mode;
use crate::error::Error;
use crate::pipeline::stages::RequestId;
use crate::pipeline::{ErrorHandler, RequestContext};

#[derive(Debug, Clone, Default)]
pub struct JsonErrorHandler {
    mode: Mode,
}

impl JsonErrorHandler {
    pub fn new(mode: Mode) -> Self {
        Self { mode }
    }
}

impl ErrorHandler for JsonErrorHandler {
    fn render(&self, err: Error, ctx: &RequestContext) -> Result<Response, Error> {
        let status = err.http_status();

        if status.is_server_error() {
            tracing::error!(method = %ctx.method, path = %ctx.path, "{}", err);
        } else {
            tracing::debug!(method = %ctx.method, path = %ctx.path, status = status.as_u16(), "{}", err);
        }

        // Internal details stay in the log outside development.
        let message = if status.is_server_error() && !self.mode.is_development() {
            "Server Error".to_string()
        } else {
            err.to_string()
        };

        let mut body = json!({
            "success": false,
            "error": message,
            "code": err.code(),
        });
        if let Some(id) = ctx.attributes.get::<RequestId>() {
            body["request_id"] = json!(id.0);
        }

        let mut response = (status, Json(body)).into_response();

        if let Error::RateLimited { retry_after } = &err {
            let secs = retry_after.as_millis().div_ceil(1000).max(1);
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from_str(&secs.to_string())
                    .map_err(|e| Error::Internal(e.to_string()))?,
            );
        }

        Ok(response)
    }
}
