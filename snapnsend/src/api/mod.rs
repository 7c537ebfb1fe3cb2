//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! Everything except the service info route lives under the configured `api_prefix` (`/v1` by
//! default):
//!
//! - **Health** (`/v1/health`)
//! - **Users** (`/v1/register`, `/v1/users/*`): registration and lookup
//! - **Requests** (`/v1/requests/*`): image search submission and status
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa` annotations. The document is served at
//! `/api-docs/openapi.json` and rendered at `/docs`.

pub mod handlers;
pub mod models;
