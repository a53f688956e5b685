//! Unified error type for the devcamper server.
//!
//! Every stage and collaborator router funnels its failures into [`Error`].
//! The terminal error handler derives the HTTP status from
//! [`Error::http_status`] and the machine-readable code from [`Error::code`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parking_lot::Mutex;

/// Unified error type covering all failure modes of the request pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// One or more fields failed validation.
    #[error("{}", .0.join(", "))]
    Validation(Vec<String>),

    /// The request was malformed in some other way.
    #[error("{0}")]
    BadRequest(String),

    /// The request body could not be parsed.
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The request body exceeded the configured limit.
    #[error("Request body exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },

    /// A unique field collided with an existing record.
    #[error("Duplicate field value entered")]
    Duplicate,

    /// A path identifier did not parse as a resource id.
    #[error("Resource not found with id of {0}")]
    InvalidId(String),

    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "bootcamp", "review").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// No stage or router produced a response for this request.
    #[error("Cannot {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: String,
        /// Original request path.
        path: String,
    },

    /// The caller exceeded the rate limit for the current window.
    #[error("Too many requests, please try again later.")]
    RateLimited {
        /// Time until the current window closes.
        retry_after: Duration,
    },

    /// A security policy rejected the request.
    #[error("Request rejected: {0}")]
    Policy(String),

    /// The caller is not authenticated.
    #[error("Not authorized to access this route")]
    Unauthorized,

    /// The caller lacks permission for the requested action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A collaborator service (database, auth backend) failed.
    #[error("Upstream error [{service}]: {message}")]
    Upstream {
        /// Name of the collaborator that failed.
        service: String,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::Validation(_)
            | Error::BadRequest(_)
            | Error::InvalidBody(_)
            | Error::Duplicate
            | Error::Policy(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::InvalidId(_) | Error::NotFound { .. } | Error::RouteNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Error::Io { .. } | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::BadRequest(_) => "bad_request",
            Error::InvalidBody(_) => "invalid_body",
            Error::PayloadTooLarge { .. } => "payload_too_large",
            Error::Duplicate => "duplicate",
            Error::InvalidId(_) | Error::NotFound { .. } => "not_found",
            Error::RouteNotFound { .. } => "route_not_found",
            Error::RateLimited { .. } => "rate_limited",
            Error::Policy(_) => "policy_violation",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Upstream { .. } => "upstream_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Upstream`].
    pub fn upstream(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Upstream {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Validation`] with a single message.
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(vec![message.into()])
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised inside a collaborator router, parked in the response
/// extensions until the router stage hands it to the terminal handler.
#[derive(Clone, Debug)]
pub struct DeferredError(Arc<Mutex<Option<Error>>>);

impl DeferredError {
    pub fn new(err: Error) -> Self {
        Self(Arc::new(Mutex::new(Some(err))))
    }

    /// Take the parked error. Returns `None` if it was already taken.
    pub fn take(&self) -> Option<Error> {
        self.0.lock().take()
    }
}

/// Collaborator handlers return `Result<_, Error>`. They never render the
/// error themselves: the response only carries the error back to the runner.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let mut response = status.into_response();
        response.extensions_mut().insert(DeferredError::new(self));
        response
    }
}
