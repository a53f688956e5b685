//! Cookie parser. Attaches the parsed `Cookie` headers as [`Cookies`].

use async_trait::async_trait;
use axum_extra::extract::cookie::CookieJar;

use crate::pipeline::{Flow, RequestContext, Stage};

/// Cookies sent with the request.
#[derive(Debug, Clone, Default)]
pub struct Cookies(pub CookieJar);

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(|c| c.value())
    }

    pub fn len(&self) -> usize {
        self.0.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
pub struct CookieParser;

#[async_trait]
impl Stage for CookieParser {
    fn name(&self) -> &str {
        "cookie-parser"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let jar = CookieJar::from_headers(&ctx.headers);
        match ctx.attributes.attach(Cookies(jar)) {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Fail(e),
        }
    }
}
