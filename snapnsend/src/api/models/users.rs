//! API request/response models for users.

use crate::db::models::users::UserDBResponse;
use crate::types::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Longest accepted user name, counted in characters after trimming.
pub const MAX_USER_NAME_CHARS: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    /// Unique display name; also accepted as `name`
    #[serde(alias = "name")]
    #[schema(example = "alice")]
    pub user_name: String,
    /// Unique email address; also accepted as `email`
    #[serde(alias = "email")]
    #[schema(example = "alice@example.com")]
    pub user_mail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    #[schema(value_type = String, format = "uuid")]
    pub user_id: UserId,
    /// Always `done`; a failed confirmation email is reported in `error`
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: UserId,
    pub user_name: String,
    pub user_mail: String,
    pub created_at: DateTime<Utc>,
}

impl From<UserDBResponse> for UserResponse {
    fn from(db: UserDBResponse) -> Self {
        Self {
            id: db.id,
            user_name: db.user_name,
            user_mail: db.user_mail,
            created_at: db.created_at,
        }
    }
}
