//! Built-in pipeline stages.

pub mod body_parser;
pub mod cookie_parser;
pub mod cors;
pub mod dev_logger;
pub mod error_handler;
pub mod hpp;
pub mod logger;
pub mod rate_limit;
pub mod request_id;
pub mod router;
pub mod sanitize;
pub mod security_headers;
pub mod static_files;
pub mod upload;
pub mod xss;

pub use body_parser::BodyParser;
pub use cookie_parser::{CookieParser, Cookies};
pub use cors::Cors;
pub use dev_logger::DevLogger;
pub use error_handler::JsonErrorHandler;
pub use hpp::{ParamPollution, PollutedQuery};
pub use logger::{Greeting, Logger};
pub use rate_limit::{FixedWindowLimiter, RateLimit};
pub use request_id::{RequestId, RequestIdStage};
pub use router::{ParsedBody, RouteGroup, RouteMiss};
pub use sanitize::Sanitizer;
pub use security_headers::SecurityHeaders;
pub use static_files::StaticFiles;
pub use upload::{UploadHandler, UploadedFile, Uploads};
pub use xss::XssClean;

/// Walk every string in a JSON value.
pub(crate) fn for_each_string(value: &mut serde_json::Value, f: &mut impl FnMut(&mut String)) {
    match value {
        serde_json::Value::String(s) => f(s),
        serde_json::Value::Array(items) => {
            for item in items {
                for_each_string(item, f);
            }
        }
        serde_json::Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                for_each_string(item, f);
            }
        }
        _ => {}
    }
}
