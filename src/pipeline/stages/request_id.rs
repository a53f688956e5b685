//! Request ID stage.
//!
//! Generates a UUID for each request (or keeps an existing `x-request-id`
//! header), attaches it as an attribute, and echoes it on the response.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use uuid::Uuid;

use crate::pipeline::{Flow, RequestContext, Stage};

/// Header name used for the request identifier.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request identifier attached by [`RequestIdStage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

#[derive(Debug, Default)]
pub struct RequestIdStage;

#[async_trait]
impl Stage for RequestIdStage {
    fn name(&self) -> &str {
        "request-id"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let id = ctx
            .header_str(&X_REQUEST_ID)
            .filter(|v| !v.is_empty() && v.len() <= 128)
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if let Ok(val) = HeaderValue::from_str(&id) {
            ctx.set_response_header(X_REQUEST_ID.clone(), val);
        }

        match ctx.attributes.attach(RequestId(id)) {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Fail(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[tokio::test]
    async fn keeps_incoming_id() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        ctx.headers
            .insert(X_REQUEST_ID.clone(), HeaderValue::from_static("req-123"));

        assert!(matches!(RequestIdStage.handle(&mut ctx).await, Flow::Continue));
        assert_eq!(ctx.attributes.get::<RequestId>().unwrap().0, "req-123");
        assert_eq!(ctx.response_headers[&X_REQUEST_ID], "req-123");
    }

    #[tokio::test]
    async fn generates_id_when_missing() {
        let mut ctx = RequestContext::new(Method::GET, "/");
        RequestIdStage.handle(&mut ctx).await;
        let id = &ctx.attributes.get::<RequestId>().unwrap().0;
        assert!(Uuid::parse_str(id).is_ok());
    }
}
