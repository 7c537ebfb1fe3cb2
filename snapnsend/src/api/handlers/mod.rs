//! HTTP request handlers for all API endpoints.
//!
//! Handlers are async functions that take axum extractors and return either a JSON response or
//! an [`Error`](crate::errors::Error), which converts itself into a status code with a
//! `{"detail": ...}` body. Every handler carries a `#[utoipa::path]` annotation that feeds the
//! OpenAPI document.
//!
//! - [`health`]: service info and liveness
//! - [`users`]: registration and user lookup
//! - [`requests`]: image search submission and status

pub mod health;
pub mod requests;
pub mod users;
