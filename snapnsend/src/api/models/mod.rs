//! API request and response data models.
//!
//! These types are the JSON shapes of the HTTP API. They derive `Serialize`/`Deserialize` for
//! the wire and `ToSchema` so they appear in the generated OpenAPI document. Conversions from
//! the database and pipeline types live next to each response type.
//!
//! - [`users`]: registration and user records
//! - [`requests`]: image search submission and status
//! - [`pagination`]: `skip`/`limit` query parameters

pub mod pagination;
pub mod requests;
pub mod users;
