//! JSON body parser.
//!
//! Only claims bodies whose content type is JSON; every other body is left
//! unread for later stages (uploads) or the collaborator router.

use async_trait::async_trait;
use axum::body::Body;

use crate::error::Error;
use crate::pipeline::{Flow, RequestBody, RequestContext, Stage};

#[derive(Debug)]
pub struct BodyParser {
    limit: usize,
}

impl BodyParser {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

fn is_json(content_type: &str) -> bool {
    content_type == "application/json"
        || (content_type.starts_with("application/") && content_type.ends_with("+json"))
}

/// Read a body into memory, mapping an over-limit body to
/// [`Error::PayloadTooLarge`].
pub(crate) async fn read_limited(body: Body, limit: usize) -> Result<bytes::Bytes, Error> {
    axum::body::to_bytes(body, limit).await.map_err(|e| {
        let inner = e.into_inner();
        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&*inner);
        while let Some(err) = source {
            if err.is::<http_body_util::LengthLimitError>() {
                return Error::PayloadTooLarge { limit };
            }
            source = err.source();
        }
        Error::InvalidBody(inner.to_string())
    })
}

#[async_trait]
impl Stage for BodyParser {
    fn name(&self) -> &str {
        "body-parser"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let Some(content_type) = ctx.content_type() else {
            return Flow::Continue;
        };
        if !is_json(&content_type) {
            return Flow::Continue;
        }

        let RequestBody::Unread(body) = ctx.body.take() else {
            return Flow::Continue;
        };

        let bytes = match read_limited(body, self.limit).await {
            Ok(bytes) => bytes,
            Err(e) => return Flow::Fail(e),
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            ctx.body = RequestBody::Json(serde_json::Value::Object(Default::default()));
            return Flow::Continue;
        }

        match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) => {
                ctx.body = RequestBody::Json(value);
                Flow::Continue
            }
            Ok(_) => Flow::Fail(Error::InvalidBody(
                "top-level JSON value must be an object or array".into(),
            )),
            Err(e) => Flow::Fail(Error::InvalidBody(e.to_string())),
        }
    }
}
