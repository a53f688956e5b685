//! Escapes `<` in user-supplied strings so stored values can't open tags.

use async_trait::async_trait;

use super::for_each_string;
use crate::pipeline::{Flow, RequestBody, RequestContext, Stage};

fn clean(s: &mut String) {
    if s.contains('<') {
        *s = s.replace('<', "&lt;");
    }
}

#[derive(Debug, Default)]
pub struct XssClean;

#[async_trait]
impl Stage for XssClean {
    fn name(&self) -> &str {
        "xss-clean"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        match &mut ctx.body {
            RequestBody::Json(value) => for_each_string(value, &mut clean),
            RequestBody::Form(map) => {
                for (_, value) in map.iter_mut() {
                    for_each_string(value, &mut clean);
                }
            }
            RequestBody::Unread(_) | RequestBody::Empty => {}
        }

        for (_, value) in ctx.query.iter_mut() {
            clean(value);
        }

        Flow::Continue
    }
}
