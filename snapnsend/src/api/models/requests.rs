//! API request/response models for image search requests.

use crate::pipeline::{RequestMode, RequestStatus, SearchRecord};
use crate::types::{RequestId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_IMAGE_COUNT: i64 = 10;

pub const MAX_IMAGE_COUNT: i64 = 50;

fn default_image_count() -> i64 {
    DEFAULT_IMAGE_COUNT
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchRequestCreate {
    /// Requesting user. Requests without a known user are recorded with status `error`.
    #[schema(value_type = Option<String>, format = "uuid")]
    #[serde(default)]
    pub user: Option<UserId>,
    /// Number of images to deliver, 1 to 50
    #[serde(default = "default_image_count")]
    #[schema(default = 10, minimum = 1, maximum = 50)]
    pub n: i64,
    #[schema(example = "mountains")]
    pub prompt: String,
    #[serde(default)]
    pub mode: RequestMode,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SearchRequestResponse {
    #[schema(value_type = String, format = "uuid")]
    pub request_id: RequestId,
    #[schema(value_type = Option<String>, format = "uuid")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub prompt: String,
    pub n: usize,
    pub mode: RequestMode,
    pub status: RequestStatus,
    /// Local file paths, in request order
    pub images: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<SearchRecord> for SearchRequestResponse {
    fn from(record: SearchRecord) -> Self {
        Self {
            request_id: record.id,
            user_id: record.user_id,
            prompt: record.prompt,
            n: record.count,
            mode: record.mode,
            status: record.status,
            images: record.images.iter().map(|p| p.to_string_lossy().into_owned()).collect(),
            error: record.error,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
