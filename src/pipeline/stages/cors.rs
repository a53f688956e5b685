//! CORS headers and preflight answers.
//!
//! Header computation is delegated to a `tower_http` [`CorsLayer`] wrapped
//! around an empty service. Headers it adds are queued on the context so they
//! also land on responses rendered later, including error responses. Any
//! `OPTIONS` request is a preflight and is answered here with `204`.

use std::convert::Infallible;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::{service_fn, Layer, ServiceExt};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::config::CorsConfig;
use crate::error::Error;
use crate::pipeline::{Flow, RequestContext, Stage};

const ALLOWED_METHODS: [Method; 6] = [
    Method::GET,
    Method::HEAD,
    Method::PUT,
    Method::PATCH,
    Method::POST,
    Method::DELETE,
];

#[derive(Debug, Clone)]
pub struct Cors {
    layer: CorsLayer,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> Self {
        let origin = match HeaderValue::from_str(&config.allow_origin) {
            Ok(value) if value != "*" => AllowOrigin::exact(value),
            _ => AllowOrigin::any(),
        };
        let layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(ALLOWED_METHODS.to_vec())
            .allow_headers(AllowHeaders::mirror_request())
            .vary([header::ORIGIN]);
        Self { layer }
    }

    /// Headers the layer produces for this request.
    async fn headers_for(&self, request: Request<Body>) -> Result<HeaderMap, Error> {
        let service = self.layer.clone().layer(service_fn(empty));
        let response = match service.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        Ok(response
            .headers()
            .iter()
            .filter(|(name, _)| is_cors_header(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect())
    }
}

/// Built up front so no borrow of the (non-`Sync`) context is held across an await.
fn build_request(ctx: &RequestContext) -> Result<Request<Body>, Error> {
    let mut builder = Request::builder()
        .method(ctx.method.clone())
        .uri(ctx.path.as_str());
    if let Some(headers) = builder.headers_mut() {
        headers.extend(ctx.headers.clone());
    }
    builder
        .body(Body::empty())
        .map_err(|e| Error::Internal(e.to_string()))
}

async fn empty(_request: Request<Body>) -> Result<Response<Body>, Infallible> {
    Ok(Response::new(Body::empty()))
}

fn is_cors_header(name: &str) -> bool {
    name.starts_with("access-control-") || name == header::VARY.as_str()
}

#[async_trait]
impl Stage for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let request = match build_request(ctx) {
            Ok(request) => request,
            Err(e) => return Flow::Fail(e),
        };
        let headers = match self.headers_for(request).await {
            Ok(headers) => headers,
            Err(e) => return Flow::Fail(e),
        };

        if ctx.method == Method::OPTIONS {
            let mut response = StatusCode::NO_CONTENT.into_response();
            response.headers_mut().extend(headers);
            response
                .headers_mut()
                .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
            return Flow::Respond(response);
        }

        for (name, value) in headers {
            if let Some(name) = name {
                ctx.set_response_header(name, value);
            }
        }
        Flow::Continue
    }
}
