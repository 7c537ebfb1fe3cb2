//! In-memory table of search requests.
//!
//! Records are never deleted and do not survive a restart. Every mutation goes through
//! [`SearchRecord::advance`], which refuses to move a request backwards through its lifecycle:
//!
//! ```text
//! pending ──► processing ──► done ──► done_with_errors
//!    │             │
//!    └─────────────┴──► error
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, sync::Arc};
use thiserror::Error;
use utoipa::ToSchema;

use crate::types::{RequestId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Done,
    DoneWithErrors,
    Error,
}

impl RequestStatus {
    /// Whether a record in this state may move to `next`.
    pub fn can_advance_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Error) | (Processing, Done) | (Processing, Error) | (Done, DoneWithErrors)
        )
    }

    /// No further pipeline work happens in this state.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::DoneWithErrors | Self::Error)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::DoneWithErrors => "done_with_errors",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Whether the HTTP call waits for the pipeline to finish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestMode {
    /// Run the pipeline before responding
    #[default]
    Sync,
    /// Respond with the pending record and run the pipeline in the background
    Async,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("request cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: RequestStatus,
    pub to: RequestStatus,
}

/// One submitted search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub id: RequestId,
    /// Absent when the request was submitted without a user
    pub user_id: Option<UserId>,
    pub prompt: String,
    pub count: usize,
    pub mode: RequestMode,
    pub status: RequestStatus,
    pub images: Vec<PathBuf>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchRecord {
    pub fn new(user_id: Option<UserId>, prompt: String, count: usize, mode: RequestMode) -> Self {
        let now = Utc::now();
        Self {
            id: RequestId::new_v4(),
            user_id,
            prompt,
            count,
            mode,
            status: RequestStatus::Pending,
            images: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A record that was refused before any work started.
    pub fn rejected(user_id: Option<UserId>, prompt: String, count: usize, mode: RequestMode, error: String) -> Self {
        let mut record = Self::new(user_id, prompt, count, mode);
        record.status = RequestStatus::Error;
        record.error = Some(error);
        record
    }

    /// Move to `next`, refusing backwards or repeated transitions.
    pub fn advance(&mut self, next: RequestStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Add to the error message, separating from any existing one with `; `.
    pub fn append_error(&mut self, message: &str) {
        self.error = Some(match self.error.take() {
            Some(existing) if !existing.is_empty() => format!("{existing}; {message}"),
            _ => message.to_string(),
        });
    }
}

/// Shared request table.
///
/// Updates lock a single entry and never across an await point.
#[derive(Clone, Default)]
pub struct RequestStore {
    records: Arc<DashMap<RequestId, SearchRecord>>,
}

impl RequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SearchRecord) {
        self.records.insert(record.id, record);
    }

    pub fn get(&self, id: RequestId) -> Option<SearchRecord> {
        self.records.get(&id).map(|entry| entry.value().clone())
    }

    /// All records, oldest first.
    pub fn list(&self) -> Vec<SearchRecord> {
        let mut records: Vec<SearchRecord> = self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Advance a record to `next` and apply `update` to it in the same critical section.
    ///
    /// Returns the updated record. `Ok(None)` means the id is unknown.
    pub fn advance(
        &self,
        id: RequestId,
        next: RequestStatus,
        update: impl FnOnce(&mut SearchRecord),
    ) -> Result<Option<SearchRecord>, InvalidTransition> {
        let Some(mut entry) = self.records.get_mut(&id) else {
            return Ok(None);
        };
        let record = entry.value_mut();
        record.advance(next)?;
        update(record);
        Ok(Some(record.clone()))
    }
}
