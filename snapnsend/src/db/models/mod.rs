//! Database record models matching table schemas.
//!
//! These models are used by repositories to return query results and accept insertion data.
//! They are kept separate from the API models in [`crate::api::models`] so storage and wire
//! representations can change independently.
//!
//! - [`users`]: Registered users (the only persisted entity; search requests live in memory)

pub mod users;
