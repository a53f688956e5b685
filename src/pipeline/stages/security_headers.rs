//! Security headers queued for every response.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::pipeline::{Flow, RequestContext, Stage};

const DEFAULT_HEADERS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';block-all-mixed-content;font-src 'self' https: data:;\
         frame-ancestors 'self';img-src 'self' data:;object-src 'none';script-src 'self';\
         script-src-attr 'none';style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("x-dns-prefetch-control", "off"),
    ("x-frame-options", "SAMEORIGIN"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-download-options", "noopen"),
    ("x-content-type-options", "nosniff"),
    ("x-permitted-cross-domain-policies", "none"),
    ("referrer-policy", "no-referrer"),
    ("x-xss-protection", "0"),
];

#[derive(Debug)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for SecurityHeaders {
    fn default() -> Self {
        let headers = DEFAULT_HEADERS
            .iter()
            .map(|&(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        Self { headers }
    }
}

#[async_trait]
impl Stage for SecurityHeaders {
    fn name(&self) -> &str {
        "security-headers"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        for (name, value) in &self.headers {
            ctx.set_response_header(name.clone(), value.clone());
        }
        Flow::Continue
    }
}
