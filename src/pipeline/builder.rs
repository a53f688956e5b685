//! Assembles the stage list once at startup.

use std::sync::Arc;

use crate::config::Config;
use crate::pipeline::stages::{
    BodyParser, CookieParser, Cors, DevLogger, FixedWindowLimiter, JsonErrorHandler, Logger,
    ParamPollution, RateLimit, RequestIdStage, RouteGroup, Sanitizer, SecurityHeaders,
    StaticFiles, UploadHandler, XssClean,
};
use crate::pipeline::{Pipeline, Stage};

/// Build the request pipeline for `config`.
///
/// Order: request id, logger, body parser, cookie parser, dev logger
/// (development only), upload handler, sanitizer, security headers, xss
/// cleaner, rate limiter, parameter pollution guard, cors, static files, one
/// router per group, and finally the JSON error handler.
pub fn build_pipeline(
    config: &Config,
    limiter: Arc<FixedWindowLimiter>,
    groups: Vec<RouteGroup>,
) -> Pipeline {
    let mut stages: Vec<Arc<dyn Stage>> = vec![
        Arc::new(RequestIdStage),
        Arc::new(Logger),
        Arc::new(BodyParser::new(config.body.json_limit_bytes)),
        Arc::new(CookieParser),
    ];

    if config.server.mode.is_development() {
        stages.push(Arc::new(DevLogger));
    }

    stages.push(Arc::new(UploadHandler::new(config.body.upload_limit_bytes)));
    stages.push(Arc::new(Sanitizer::new(config.sanitize.mode)));
    stages.push(Arc::new(SecurityHeaders::default()));
    stages.push(Arc::new(XssClean));
    stages.push(Arc::new(RateLimit::new(limiter)));
    stages.push(Arc::new(ParamPollution));
    stages.push(Arc::new(Cors::new(&config.cors)));
    stages.push(Arc::new(StaticFiles::new(&config.server.static_dir)));

    for group in groups {
        stages.push(Arc::new(group));
    }

    let pipeline = Pipeline::new(
        stages,
        Arc::new(JsonErrorHandler::new(config.server.mode.clone())),
    );
    tracing::debug!(stages = ?pipeline.stage_names(), "pipeline built");
    pipeline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use axum::Router;

    fn build(mode: Mode) -> Pipeline {
        let mut config = Config::default();
        config.server.mode = mode;
        let limiter = Arc::new(FixedWindowLimiter::new(&config.rate_limit));
        let groups = vec![
            RouteGroup::new("/api/v1/bootcamps", Router::new()),
            RouteGroup::new("/api/v1/courses", Router::new()),
        ];
        build_pipeline(&config, limiter, groups)
    }

    #[test]
    fn stage_order_in_development() {
        assert_eq!(
            build(Mode::Development).stage_names(),
            vec![
                "request-id",
                "logger",
                "body-parser",
                "cookie-parser",
                "dev-logger",
                "upload-handler",
                "sanitizer",
                "security-headers",
                "xss-clean",
                "rate-limiter",
                "hpp",
                "cors",
                "static-files",
                "router:/api/v1/bootcamps",
                "router:/api/v1/courses",
                "error-handler",
            ]
        );
    }

    #[test]
    fn dev_logger_only_in_development() {
        assert!(build(Mode::Development).contains("dev-logger"));
        assert!(!build(Mode::Production).contains("dev-logger"));
        assert!(!build(Mode::Test).contains("dev-logger"));
        assert!(!build(Mode::Other("staging".into())).contains("dev-logger"));
    }

    #[test]
    fn error_handler_closes_every_variant() {
        for mode in [Mode::Development, Mode::Production, Mode::Test] {
            let names = build(mode).stage_names();
            assert_eq!(names.last().map(String::as_str), Some("error-handler"));
            assert_eq!(names.iter().filter(|n| *n == "error-handler").count(), 1);
        }
    }
}
