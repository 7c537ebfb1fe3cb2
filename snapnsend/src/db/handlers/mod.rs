//! Repository implementations for database access.
//!
//! Each repository wraps a SQLx connection, binds parameters, and returns domain models from
//! [`crate::db::models`].
//!
//! ```ignore
//! use snapnsend::db::handlers::{Users, Repository};
//!
//! async fn example(pool: &sqlx::SqlitePool) -> Result<(), Box<dyn std::error::Error>> {
//!     let mut conn = pool.acquire().await?;
//!     let mut repo = Users::new(&mut conn);
//!
//!     if let Some(user) = repo.get_user_by_email("alice@example.com").await? {
//!         println!("Found user: {}", user.user_name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod repository;
pub mod users;

pub use repository::Repository;
pub use users::Users;
