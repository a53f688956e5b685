//! HTTP parameter pollution guard.
//!
//! A query key repeated several times collapses to its last value; the full
//! list is kept in [`PollutedQuery`] for handlers that want it.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::pipeline::{Flow, RequestContext, Stage};

/// Every value a repeated query key arrived with, in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollutedQuery(pub HashMap<String, Vec<String>>);

#[derive(Debug, Default)]
pub struct ParamPollution;

#[async_trait]
impl Stage for ParamPollution {
    fn name(&self) -> &str {
        "hpp"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let mut seen: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in &ctx.query {
            seen.entry(key.clone()).or_default().push(value.clone());
        }

        let polluted: HashMap<_, _> = seen.into_iter().filter(|(_, v)| v.len() > 1).collect();
        if polluted.is_empty() {
            return Flow::Continue;
        }

        let mut deduped: Vec<(String, String)> = Vec::with_capacity(ctx.query.len());
        for (key, value) in &ctx.query {
            if deduped.iter().any(|(k, _)| k == key) {
                continue;
            }
            let value = polluted
                .get(key)
                .and_then(|values| values.last())
                .unwrap_or(value);
            deduped.push((key.clone(), value.clone()));
        }
        ctx.query = deduped;

        tracing::debug!(keys = ?polluted.keys().collect::<Vec<_>>(), "collapsed repeated query keys");

        match ctx.attributes.attach(PollutedQuery(polluted)) {
            Ok(()) => Flow::Continue,
            Err(e) => Flow::Fail(e),
        }
    }
}
