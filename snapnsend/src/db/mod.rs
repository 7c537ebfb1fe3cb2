//! Database layer for data persistence and access.
//!
//! This module implements the data access layer using SQLx with SQLite. It follows the
//! Repository pattern to provide clean abstractions over database operations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐
//! │  Handlers   │  (API request handlers, request orchestrator)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │ Repositories│  (db::handlers - queries)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   Models    │  (db::models - database records)
//! └──────┬──────┘
//!        │
//!        ↓
//! ┌─────────────┐
//! │   SQLite    │
//! └─────────────┘
//! ```
//!
//! # Modules
//!
//! - [`handlers`]: Repository implementations
//! - [`models`]: Database record structures matching table schemas
//! - [`errors`]: Database-specific error types
//!
//! # Connections
//!
//! Repositories borrow a single connection. Acquire it from the pool for the shortest span that
//! covers the queries; never hold one connection while acquiring another, since test pools have
//! exactly one.
//!
//! ```ignore
//! let mut conn = pool.acquire().await?;
//! let mut repo = Users::new(&mut conn);
//! let user = repo.get_by_id(user_id).await?;
//! ```
//!
//! # Migrations
//!
//! Database migrations are managed by SQLx and located in the `migrations/` directory.
//! The [`crate::migrator`] function provides access to the migrator:
//!
//! ```ignore
//! snapnsend::migrator().run(&pool).await?;
//! ```

pub mod errors;
pub mod handlers;
pub mod models;
