//! Request logger: one line per request, plus a greeting attribute that
//! later stages (and the error handler) can read.

use async_trait::async_trait;

use crate::pipeline::{Flow, RequestContext, Stage};

/// Value attached by [`Logger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting(pub String);

#[derive(Debug, Default)]
pub struct Logger;

#[async_trait]
impl Stage for Logger {
    fn name(&self) -> &str {
        "logger"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        if let Err(e) = ctx.attributes.attach(Greeting("Hello ".to_string())) {
            return Flow::Fail(e);
        }

        tracing::info!(
            "{} {}://{}{}",
            ctx.method,
            ctx.protocol(),
            ctx.host(),
            ctx.original_url()
        );

        Flow::Continue
    }
}
