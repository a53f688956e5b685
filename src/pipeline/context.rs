//! Per-request state carried through the pipeline.
//!
//! A [`RequestContext`] is created by the server adapter for every inbound
//! request and owned by a single [`Pipeline::run`](super::Pipeline::run)
//! call. Stages mutate the request fields in place; derived values go into
//! the append-only [`Attributes`] bag.

use std::any::type_name;
use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};

use crate::error::{Error, Result};

/// The request body as it moves through the parsing stages.
#[derive(Debug, Default)]
pub enum RequestBody {
    /// Not yet consumed by any stage.
    Unread(Body),
    /// Parsed from `application/json`.
    Json(serde_json::Value),
    /// Non-file fields of a multipart upload.
    Form(serde_json::Map<String, serde_json::Value>),
    /// No body, or the body was consumed.
    #[default]
    Empty,
}

impl RequestBody {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            RequestBody::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn take(&mut self) -> RequestBody {
        std::mem::take(self)
    }
}

/// Type-keyed, append-only attribute bag.
///
/// A value can be attached once per type and is never handed out mutably,
/// so whatever an earlier stage attaches is exactly what later stages see.
#[derive(Debug, Clone, Default)]
pub struct Attributes {
    inner: Extensions,
}

impl Attributes {
    pub(crate) fn from_extensions(inner: Extensions) -> Self {
        Self { inner }
    }

    /// Attach `value`. Fails if a value of type `T` is already attached.
    pub fn attach<T>(&mut self, value: T) -> Result<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        if self.inner.get::<T>().is_some() {
            return Err(Error::Internal(format!(
                "attribute {} is already attached",
                type_name::<T>()
            )));
        }
        self.inner.insert(value);
        Ok(())
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.inner.get::<T>()
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.inner.get::<T>().is_some()
    }

    /// Snapshot of the bag as request extensions, for collaborator routers.
    pub(crate) fn to_extensions(&self) -> Extensions {
        self.inner.clone()
    }
}

/// Mutable per-request context passed to every stage.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// The URI as received. Never rewritten.
    pub original_uri: Uri,
    /// Request path, percent-encoded as received.
    pub path: String,
    /// Decoded query pairs in arrival order.
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: RequestBody,
    pub remote_addr: Option<SocketAddr>,
    pub attributes: Attributes,
    /// Headers queued by stages for whichever response ends up being sent.
    pub response_headers: HeaderMap,
}

impl RequestContext {
    /// Build a context from an inbound request.
    pub fn from_request(request: Request<Body>, remote_addr: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        let query = parts
            .uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();

        Self {
            method: parts.method,
            path: parts.uri.path().to_string(),
            original_uri: parts.uri,
            query,
            headers: parts.headers,
            body: RequestBody::Unread(body),
            remote_addr,
            attributes: Attributes::from_extensions(parts.extensions),
            response_headers: HeaderMap::new(),
        }
    }

    /// Convenience for tests and internal callers.
    pub fn new(method: Method, uri: &str) -> Self {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap_or_default();
        Self::from_request(request, None)
    }

    /// Value of the `Host` header, falling back to the URI authority.
    pub fn host(&self) -> &str {
        self.headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.original_uri.host())
            .unwrap_or("localhost")
    }

    /// Request scheme. The server speaks plain HTTP unless the URI says otherwise.
    pub fn protocol(&self) -> &str {
        self.original_uri.scheme_str().unwrap_or("http")
    }

    /// Path and query exactly as received.
    pub fn original_url(&self) -> &str {
        self.original_uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
    }

    pub fn header_str(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Media type of the body without parameters, lowercased.
    pub fn content_type(&self) -> Option<String> {
        self.header_str(header::CONTENT_TYPE).map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Queue a header for the final response.
    pub fn set_response_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.response_headers.insert(name, value);
    }

    /// Re-encode the current query pairs.
    pub fn query_string(&self) -> String {
        serde_urlencoded::to_string(&self.query).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Marker(&'static str);

    #[test]
    fn attributes_are_append_only() {
        let mut attrs = Attributes::default();
        attrs.attach(Marker("first")).unwrap();
        let err = attrs.attach(Marker("second")).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(attrs.get::<Marker>(), Some(&Marker("first")));
    }

    #[test]
    fn context_parses_query_and_host() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/bootcamps?sort=name&page=2")
            .header(header::HOST, "localhost:5000")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(request, None);

        assert_eq!(ctx.path, "/api/v1/bootcamps");
        assert_eq!(
            ctx.query,
            vec![
                ("sort".to_string(), "name".to_string()),
                ("page".to_string(), "2".to_string())
            ]
        );
        assert_eq!(ctx.host(), "localhost:5000");
        assert_eq!(ctx.protocol(), "http");
        assert_eq!(ctx.original_url(), "/api/v1/bootcamps?sort=name&page=2");
    }

    #[test]
    fn content_type_strips_parameters() {
        let request = Request::builder()
            .uri("/")
            .header(header::CONTENT_TYPE, "Application/JSON; charset=utf-8")
            .body(Body::empty())
            .unwrap();
        let ctx = RequestContext::from_request(request, None);
        assert_eq!(ctx.content_type().as_deref(), Some("application/json"));
    }
}
