//! Ordered request pipeline with a single terminal error handler.
//!
//! A [`Pipeline`] is an immutable, ordered list of [`Stage`]s plus exactly
//! one [`ErrorHandler`]. For every request the runner:
//!
//! 1. calls each stage in order while it returns [`Flow::Continue`];
//! 2. stops at the first [`Flow::Respond`] and uses that response;
//! 3. on [`Flow::Fail`] (or a stage panic) skips every remaining stage and
//!    hands the error to the terminal handler;
//! 4. if the chain runs out without a response, fails with
//!    [`Error::RouteNotFound`];
//! 5. merges queued response headers and lets every stage that ran observe
//!    the final response.
//!
//! The terminal handler is not a stage, so it cannot sit mid-chain and has
//! no way to continue. If it fails, [`Pipeline::run`] returns [`Fatal`].

pub mod builder;
pub mod context;
pub mod stages;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::FutureExt;

use crate::error::Error;

pub use builder::build_pipeline;
pub use context::{Attributes, RequestBody, RequestContext};

/// Outcome of a single stage.
#[derive(Debug)]
pub enum Flow {
    /// Hand the (possibly mutated) request to the next stage.
    Continue,
    /// End the pipeline with this response.
    Respond(Response),
    /// Skip to the terminal error handler.
    Fail(Error),
}

impl From<Error> for Flow {
    fn from(err: Error) -> Self {
        Flow::Fail(err)
    }
}

/// One unit of request processing.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stable name, used in logs and ordering checks.
    fn name(&self) -> &str;

    /// Whether this stage dispatches to a collaborator router.
    fn is_router(&self) -> bool {
        false
    }

    async fn handle(&self, ctx: &mut RequestContext) -> Flow;

    /// Observe the final response. Called for every stage that ran, in
    /// reverse order, after the response has been produced.
    fn on_response(&self, _ctx: &RequestContext, _response: &Response) {}
}

/// Renders every error response. Exactly one per pipeline.
pub trait ErrorHandler: Send + Sync {
    fn name(&self) -> &str {
        "error-handler"
    }

    fn render(&self, err: Error, ctx: &RequestContext) -> Result<Response, Error>;
}

/// The terminal handler itself failed. The process must not carry on as if
/// nothing happened.
#[derive(Debug, thiserror::Error)]
#[error("terminal error handler failed: {message}")]
pub struct Fatal {
    pub message: String,
    /// Bare response to send on the way down.
    pub response: Response,
}

/// Immutable stage list plus its terminal handler.
#[derive(Clone)]
pub struct Pipeline {
    stages: Arc<[Arc<dyn Stage>]>,
    error_handler: Arc<dyn ErrorHandler>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .field("error_handler", &self.error_handler.name())
            .finish()
    }
}

impl Pipeline {
    pub fn new(stages: Vec<Arc<dyn Stage>>, error_handler: Arc<dyn ErrorHandler>) -> Self {
        Self {
            stages: stages.into(),
            error_handler,
        }
    }

    /// Stage names in execution order, terminal handler last.
    pub fn stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .map(|s| s.name().to_string())
            .chain(std::iter::once(self.error_handler.name().to_string()))
            .collect()
    }

    pub fn stages(&self) -> impl Iterator<Item = &Arc<dyn Stage>> {
        self.stages.iter()
    }

    pub fn error_handler_name(&self) -> &str {
        self.error_handler.name()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.iter().any(|s| s.name() == name)
    }

    /// Run one request through the pipeline.
    pub async fn run(&self, mut ctx: RequestContext) -> Result<Response, Fatal> {
        let mut ran = 0;
        let mut outcome = None;

        for stage in self.stages.iter() {
            ran += 1;
            let flow = match AssertUnwindSafe(stage.handle(&mut ctx)).catch_unwind().await {
                Ok(flow) => flow,
                Err(panic) => Flow::Fail(Error::Internal(format!(
                    "stage '{}' panicked: {}",
                    stage.name(),
                    panic_message(&*panic)
                ))),
            };

            match flow {
                Flow::Continue => continue,
                Flow::Respond(response) => {
                    outcome = Some(Ok(response));
                    break;
                }
                Flow::Fail(err) => {
                    tracing::debug!(stage = stage.name(), error = %err, "stage failed");
                    outcome = Some(Err(err));
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or_else(|| {
            Err(Error::RouteNotFound {
                method: ctx.method.to_string(),
                path: ctx.path.clone(),
            })
        });

        let mut response = match outcome {
            Ok(response) => response,
            Err(err) => self.render_error(err, &ctx)?,
        };

        merge_headers(&mut response, &ctx);

        for stage in self.stages[..ran].iter().rev() {
            stage.on_response(&ctx, &response);
        }

        Ok(response)
    }

    fn render_error(&self, err: Error, ctx: &RequestContext) -> Result<Response, Fatal> {
        let rendered = std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.error_handler.render(err, ctx)
        }));

        let message = match rendered {
            Ok(Ok(response)) => return Ok(response),
            Ok(Err(handler_err)) => handler_err.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };

        Err(Fatal {
            message,
            response: StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        })
    }
}

/// Queued headers never override what the producer of the response set.
fn merge_headers(response: &mut Response, ctx: &RequestContext) {
    let headers = response.headers_mut();
    for (name, value) in ctx.response_headers.iter() {
        if !headers.contains_key(name) {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Method};
    use parking_lot::Mutex;

    type Trace = Arc<Mutex<Vec<String>>>;

    /// Records its name and then behaves as configured.
    struct Recorder {
        name: &'static str,
        trace: Trace,
        behavior: Behavior,
    }

    #[derive(Clone, Copy)]
    enum Behavior {
        Continue,
        Respond,
        Fail,
        Panic,
    }

    #[async_trait]
    impl Stage for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn handle(&self, ctx: &mut RequestContext) -> Flow {
            self.trace.lock().push(self.name.to_string());
            match self.behavior {
                Behavior::Continue => Flow::Continue,
                Behavior::Respond => {
                    ctx.set_response_header(
                        axum::http::HeaderName::from_static("x-stage"),
                        HeaderValue::from_static("queued"),
                    );
                    Flow::Respond((StatusCode::OK, self.name).into_response())
                }
                Behavior::Fail => Flow::Fail(Error::BadRequest(self.name.to_string())),
                Behavior::Panic => panic!("boom"),
            }
        }

        fn on_response(&self, _ctx: &RequestContext, _response: &Response) {
            self.trace.lock().push(format!("after:{}", self.name));
        }
    }

    struct RecordingHandler {
        trace: Trace,
    }

    impl ErrorHandler for RecordingHandler {
        fn render(&self, err: Error, _ctx: &RequestContext) -> Result<Response, Error> {
            self.trace.lock().push(format!("handler:{err}"));
            Ok((err.http_status(), err.to_string()).into_response())
        }
    }

    struct BrokenHandler;

    impl ErrorHandler for BrokenHandler {
        fn render(&self, _err: Error, _ctx: &RequestContext) -> Result<Response, Error> {
            Err(Error::Internal("renderer offline".into()))
        }
    }

    fn pipeline(behaviors: &[(&'static str, Behavior)], trace: &Trace) -> Pipeline {
        let stages = behaviors
            .iter()
            .map(|(name, behavior)| {
                Arc::new(Recorder {
                    name: *name,
                    trace: trace.clone(),
                    behavior: *behavior,
                }) as Arc<dyn Stage>
            })
            .collect();
        Pipeline::new(
            stages,
            Arc::new(RecordingHandler {
                trace: trace.clone(),
            }),
        )
    }

    fn get(uri: &str) -> RequestContext {
        RequestContext::new(Method::GET, uri)
    }

    #[tokio::test]
    async fn respond_ends_the_chain() {
        let trace = Trace::default();
        let p = pipeline(
            &[
                ("a", Behavior::Continue),
                ("b", Behavior::Respond),
                ("c", Behavior::Continue),
            ],
            &trace,
        );

        let response = p.run(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-stage"], "queued");
        assert_eq!(*trace.lock(), vec!["a", "b", "after:b", "after:a"]);
    }

    #[tokio::test]
    async fn failure_at_any_position_reaches_the_handler() {
        for position in 0..4 {
            let trace = Trace::default();
            let names = ["s0", "s1", "s2", "s3"];
            let behaviors: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let b = if i == position {
                        Behavior::Fail
                    } else {
                        Behavior::Continue
                    };
                    (*n, b)
                })
                .collect();
            let p = pipeline(&behaviors, &trace);

            let response = p.run(get("/")).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);

            let trace = trace.lock();
            let handled = trace.iter().position(|t| t.starts_with("handler:")).unwrap();
            assert_eq!(handled, position + 1, "trace: {trace:?}");
            for later in &names[position + 1..] {
                assert!(!trace.contains(&later.to_string()), "{later} ran: {trace:?}");
            }
        }
    }

    #[tokio::test]
    async fn panic_is_routed_to_the_handler() {
        let trace = Trace::default();
        let p = pipeline(&[("a", Behavior::Panic), ("b", Behavior::Continue)], &trace);

        let response = p.run(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let trace = trace.lock();
        assert!(trace[1].contains("stage 'a' panicked: boom"));
        assert!(!trace.contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn exhausted_chain_is_not_found() {
        let trace = Trace::default();
        let p = pipeline(&[("a", Behavior::Continue)], &trace);

        let response = p.run(get("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(trace.lock()[1], "handler:Cannot GET /missing");
    }

    #[tokio::test]
    async fn broken_handler_is_fatal() {
        let stages: Vec<Arc<dyn Stage>> = vec![Arc::new(Recorder {
            name: "a",
            trace: Trace::default(),
            behavior: Behavior::Fail,
        })];
        let p = Pipeline::new(stages, Arc::new(BrokenHandler));

        let fatal = p.run(get("/")).await.unwrap_err();
        assert!(fatal.message.contains("renderer offline"));
        assert_eq!(fatal.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn error_handler_is_always_last() {
        let trace = Trace::default();
        let p = pipeline(&[("a", Behavior::Continue), ("b", Behavior::Continue)], &trace);
        assert_eq!(p.stage_names(), vec!["a", "b", "error-handler"]);
    }
}
