//! Operator-injection sanitizer.
//!
//! Keys that start with `$` or contain `.` are how query operators sneak
//! into document-store lookups. They are stripped from the parsed body and
//! the query string, or the request is rejected, depending on the mode.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::SanitizeMode;
use crate::error::Error;
use crate::pipeline::{Flow, RequestBody, RequestContext, Stage};

#[derive(Debug)]
pub struct Sanitizer {
    mode: SanitizeMode,
}

impl Sanitizer {
    pub fn new(mode: SanitizeMode) -> Self {
        Self { mode }
    }
}

fn is_prohibited(key: &str) -> bool {
    key.starts_with('$') || key.contains('.')
}

/// Remove prohibited keys, recursively. Returns the removed keys.
fn strip_value(value: &mut Value, removed: &mut Vec<String>) {
    match value {
        Value::Object(map) => strip_map(map, removed),
        Value::Array(items) => {
            for item in items {
                strip_value(item, removed);
            }
        }
        _ => {}
    }
}

fn strip_map(map: &mut serde_json::Map<String, Value>, removed: &mut Vec<String>) {
    map.retain(|key, _| {
        if is_prohibited(key) {
            removed.push(key.clone());
            false
        } else {
            true
        }
    });
    for (_, item) in map.iter_mut() {
        strip_value(item, removed);
    }
}

#[async_trait]
impl Stage for Sanitizer {
    fn name(&self) -> &str {
        "sanitizer"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow {
        let mut removed = Vec::new();

        match &mut ctx.body {
            RequestBody::Json(value) => strip_value(value, &mut removed),
            RequestBody::Form(map) => strip_map(map, &mut removed),
            RequestBody::Unread(_) | RequestBody::Empty => {}
        }

        ctx.query.retain(|(key, _)| {
            if is_prohibited(key) {
                removed.push(key.clone());
                false
            } else {
                true
            }
        });

        if removed.is_empty() {
            return Flow::Continue;
        }

        match self.mode {
            SanitizeMode::Strip => {
                tracing::warn!(keys = ?removed, path = %ctx.path, "stripped prohibited keys");
                Flow::Continue
            }
            SanitizeMode::Reject => Flow::Fail(Error::Policy(format!(
                "prohibited key '{}'",
                removed[0]
            ))),
        }
    }
}
