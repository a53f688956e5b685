//! devcamper - REST API server built on an ordered request pipeline
//!
//! This library crate exposes the core functionality for integration testing.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod server;
