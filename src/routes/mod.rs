//! Collaborator routers mounted under `/api/v1`.

pub mod auth;
pub mod bootcamps;
pub mod collection;

use std::sync::Arc;

use crate::pipeline::stages::RouteGroup;

pub use collection::{Collection, Schema, BOOTCAMP, COURSE, REVIEW, USER};

pub const API_PREFIX: &str = "/api/v1";

/// Route groups in mount order: bootcamps, courses, auth, users, reviews.
pub fn api_v1() -> Vec<RouteGroup> {
    let group = |name: &str, router| RouteGroup::new(format!("{API_PREFIX}/{name}"), router);

    vec![
        group("bootcamps", bootcamps::router(Arc::new(Collection::new(BOOTCAMP)))),
        group("courses", collection::router(Arc::new(Collection::new(COURSE)))),
        group("auth", auth::router()),
        group("users", collection::router(Arc::new(Collection::new(USER)))),
        group("reviews", collection::router(Arc::new(Collection::new(REVIEW)))),
    ]
}
