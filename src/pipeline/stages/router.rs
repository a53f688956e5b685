//! Route group stage: hands requests under a fixed prefix to a collaborator
//! [`axum::Router`].
//!
//! The collaborator sees the path with the prefix stripped, the (possibly
//! sanitized) query, the parsed body re-encoded as JSON (and as a
//! [`ParsedBody`] extension), and every attribute as a request extension. It reports "no route here" through [`RouteMiss`],
//! and handler errors through [`DeferredError`]; neither is rendered here.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tower::ServiceExt;

use crate::error::{DeferredError, Error};
use crate::pipeline::{Flow, RequestBody, RequestContext, Stage};

/// Marker set by the collaborator fallback when no route matched.
#[derive(Debug, Clone, Copy)]
pub struct RouteMiss;

async fn route_miss() -> Response {
    let mut response = StatusCode::NOT_FOUND.into_response();
    response.extensions_mut().insert(RouteMiss);
    response
}

/// Body as left by the parsing and cleaning stages. Absent when no stage
/// parsed the body.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBody(pub serde_json::Value);

#[derive(Debug, Clone)]
pub struct RouteGroup {
    name: String,
    prefix: String,
    router: Router,
}

impl RouteGroup {
    pub fn new(prefix: impl Into<String>, router: Router) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self {
            name: format!("router:{prefix}"),
            router: router.fallback(route_miss),
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Path relative to the prefix, if the prefix matches on a segment boundary.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let rest = path.strip_prefix(&self.prefix)?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    fn build_request(&self, ctx: &mut RequestContext, path: &str) -> Result<Request<Body>, Error> {
        let uri = if ctx.query.is_empty() {
            path.to_string()
        } else {
            format!("{path}?{}", ctx.query_string())
        };

        let mut headers = ctx.headers.clone();
        let mut parsed = None;
        let body = match ctx.body.take() {
            RequestBody::Unread(body) => body,
            RequestBody::Empty => Body::empty(),
            RequestBody::Json(value) => {
                let body = json_body(&mut headers, &value)?;
                parsed = Some(ParsedBody(value));
                body
            }
            RequestBody::Form(map) => {
                let value = serde_json::Value::Object(map);
                let body = json_body(&mut headers, &value)?;
                parsed = Some(ParsedBody(value));
                body
            }
        };

        let mut builder = Request::builder().method(ctx.method.clone()).uri(uri);
        if let Some(h) = builder.headers_mut() {
            *h = headers;
        }
        let mut request = builder
            .body(body)
            .map_err(|e| Error::Internal(format!("rebuilding request for {}: {e}", self.prefix)))?;
        *request.extensions_mut() = ctx.attributes.to_extensions();
        if let Some(parsed) = parsed {
            request.extensions_mut().insert(parsed);
        }
        Ok(request)
    }
}

fn json_body(
    headers: &mut axum::http::HeaderMap,
    value: &serde_json::Value,
) -> Result<Body, Error> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::Internal(e.to_string()))?;
    headers.remove(header::CONTENT_LENGTH);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    Ok(Body::from(bytes))
}

#[async_trait]
impl Stage for RouteGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_router(&self) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let Some(path) = self.strip(&ctx.path).map(String::from) else {
            return Flow::Continue;
        };

        let request = match self.build_request(ctx, &path) {
            Ok(request) => request,
            Err(e) => return Flow::Fail(e),
        };

        let mut response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        if response.extensions().get::<RouteMiss>().is_some() {
            return Flow::Continue;
        }

        if let Some(deferred) = response.extensions_mut().remove::<DeferredError>() {
            if let Some(err) = deferred.take() {
                return Flow::Fail(err);
            }
        }

        // Path matched but no handler for the method: not this group's route.
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Flow::Continue;
        }

        Flow::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::Greeting;
    use axum::extract::{Extension, Path, Query};
    use axum::http::Method;
    use axum::routing::get;
    use axum::Json;
    use http_body_util::BodyExt;
    use std::collections::HashMap;

    fn group() -> RouteGroup {
        let router = Router::new()
            .route(
                "/",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    Json(serde_json::json!({ "query": q }))
                })
                .post(|Json(v): Json<serde_json::Value>| async move { Json(v) }),
            )
            .route(
                "/id/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "missing" {
                        Err(Error::not_found("bootcamp", id))
                    } else {
                        Ok(id)
                    }
                }),
            )
            .route(
                "/greet",
                get(|Extension(g): Extension<Greeting>| async move { g.0 }),
            )
            .route(
                "/parsed",
                axum::routing::post(|parsed: Option<Extension<ParsedBody>>| async move {
                    match parsed {
                        Some(Extension(ParsedBody(v))) => v.to_string(),
                        None => "unparsed".to_string(),
                    }
                }),
            );
        RouteGroup::new("/api/v1/bootcamps", router)
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn prefix_matches_on_segment_boundary() {
        let g = group();
        assert_eq!(g.strip("/api/v1/bootcamps"), Some("/"));
        assert_eq!(g.strip("/api/v1/bootcamps/"), Some("/"));
        assert_eq!(g.strip("/api/v1/bootcamps/5"), Some("/5"));
        assert_eq!(g.strip("/api/v1/bootcampsx"), None);
        assert_eq!(g.strip("/api/v1/courses"), None);
    }

    #[tokio::test]
    async fn other_prefix_continues() {
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/courses");
        assert!(matches!(group().handle(&mut ctx).await, Flow::Continue));
    }

    #[tokio::test]
    async fn dispatches_with_query() {
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/bootcamps?careers=Web");
        let Flow::Respond(response) = group().handle(&mut ctx).await else {
            panic!("expected a response");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, r#"{"query":{"careers":"Web"}}"#);
    }

    #[tokio::test]
    async fn parsed_json_body_is_forwarded() {
        let mut ctx = RequestContext::new(Method::POST, "/api/v1/bootcamps");
        ctx.body = RequestBody::Json(serde_json::json!({"name": "ModernTech"}));
        let Flow::Respond(response) = group().handle(&mut ctx).await else {
            panic!("expected a response");
        };
        assert_eq!(body_text(response).await, r#"{"name":"ModernTech"}"#);
    }

    #[tokio::test]
    async fn attributes_reach_the_collaborator() {
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/bootcamps/greet");
        ctx.attributes.attach(Greeting("Hello ".into())).unwrap();
        let Flow::Respond(response) = group().handle(&mut ctx).await else {
            panic!("expected a response");
        };
        assert_eq!(body_text(response).await, "Hello ");
    }

    #[tokio::test]
    async fn handler_error_becomes_failure() {
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/bootcamps/id/missing");
        let flow = group().handle(&mut ctx).await;
        assert!(matches!(flow, Flow::Fail(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn unmatched_route_continues() {
        let mut ctx = RequestContext::new(Method::GET, "/api/v1/bootcamps/a/b/c");
        assert!(matches!(group().handle(&mut ctx).await, Flow::Continue));
    }

    #[tokio::test]
    async fn method_mismatch_continues() {
        let mut ctx = RequestContext::new(Method::PATCH, "/api/v1/bootcamps");
        assert!(matches!(group().handle(&mut ctx).await, Flow::Continue));
    }

    #[tokio::test]
    async fn only_parsed_bodies_carry_the_extension() {
        let mut ctx = RequestContext::new(Method::POST, "/api/v1/bootcamps/parsed");
        ctx.body = RequestBody::Json(serde_json::json!({"name": "ModernTech"}));
        let Flow::Respond(response) = group().handle(&mut ctx).await else {
            panic!("expected a response");
        };
        assert_eq!(body_text(response).await, r#"{"name":"ModernTech"}"#);

        let mut ctx = RequestContext::new(Method::POST, "/api/v1/bootcamps/parsed");
        ctx.body = RequestBody::Unread(Body::from(r#"{"name":"raw"}"#));
        let Flow::Respond(response) = group().handle(&mut ctx).await else {
            panic!("expected a response");
        };
        assert_eq!(body_text(response).await, "unparsed");
    }
}
