//! Database models for users.

use crate::api::models::users::RegisterRequest;
use crate::types::UserId;
use chrono::{DateTime, Utc};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateDBRequest {
    pub user_name: String,
    pub user_mail: String,
}

impl From<RegisterRequest> for UserCreateDBRequest {
    fn from(api: RegisterRequest) -> Self {
        Self {
            user_name: api.user_name.trim().to_string(),
            user_mail: api.user_mail.trim().to_string(),
        }
    }
}

/// Database response for a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserDBResponse {
    pub id: UserId,
    pub user_name: String,
    pub user_mail: String,
    pub created_at: DateTime<Utc>,
}
