//! Drives one search request through the pipeline and owns its lifecycle.

use bon::Builder;
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};
use tracing::{Instrument, error, info, info_span, instrument, warn};

use super::{
    ExtractTerms, ImageMaterializer, ImageResolver, LlmTermExtractor, Materialize, PipelineError, RequestMode, RequestStatus,
    RequestStore, SearchRecord,
};
use crate::{
    config::Config,
    db::{
        handlers::{Repository, Users},
        models::users::UserDBResponse,
    },
    email::Notifier,
    types::{RequestId, UserId, abbrev_uuid},
};

/// Appended to a finished request when the result email could not be sent.
pub const EMAIL_FAILURE_MESSAGE: &str = "Failed to send email";

#[derive(Clone, Builder)]
pub struct Orchestrator {
    db: SqlitePool,
    store: RequestStore,
    extractor: Arc<dyn ExtractTerms>,
    resolver: ImageResolver,
    materializer: Arc<dyn Materialize>,
    notifier: Arc<dyn Notifier>,
}

impl Orchestrator {
    /// Wire up the live pipeline stages from configuration.
    pub fn from_config(config: &Config, db: SqlitePool, store: RequestStore, notifier: Arc<dyn Notifier>) -> Result<Self, PipelineError> {
        Ok(Self::builder()
            .db(db)
            .store(store)
            .extractor(Arc::from(LlmTermExtractor::from_config(&config.llm)?))
            .resolver(ImageResolver::from_config(&config.image_search)?)
            .materializer(Arc::new(ImageMaterializer::new(&config.downloads)?))
            .notifier(notifier)
            .build())
    }

    pub fn store(&self) -> &RequestStore {
        &self.store
    }

    /// Record a new request and process it according to `mode`.
    ///
    /// Requests without a known user are stored directly in the `error` state and never reach the
    /// pipeline. Processing always runs on a spawned task. In sync mode the returned record is the
    /// final one; in async mode it is the pending record.
    #[instrument(skip(self, user_id, prompt), fields(user_id = ?user_id.as_ref().map(abbrev_uuid)))]
    pub async fn submit(&self, user_id: Option<UserId>, prompt: String, count: usize, mode: RequestMode) -> SearchRecord {
        let Some(user_id) = user_id else {
            return self.reject(None, prompt, count, mode, "Unauthorized: No user ID provided".to_string());
        };

        let user = match self.lookup_user(user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let message = format!("Unauthorized: User with ID {user_id} does not exist");
                return self.reject(Some(user_id), prompt, count, mode, message);
            }
            Err(e) => {
                error!(error = %e, "User lookup failed");
                let message = format!("Error processing images: {e}");
                return self.reject(Some(user_id), prompt, count, mode, message);
            }
        };

        let record = SearchRecord::new(Some(user.id), prompt, count, mode);
        self.store.insert(record.clone());
        info!(request_id = %abbrev_uuid(&record.id), "Accepted search request");

        // Spawned in both modes: a dropped sync caller must not stop the pipeline midway
        let id = record.id;
        let pending = record.clone();
        let orchestrator = self.clone();
        let span = info_span!("search_request", request_id = %abbrev_uuid(&id));
        let handle = tokio::spawn(async move { orchestrator.run(record, user).await }.instrument(span));

        match mode {
            RequestMode::Sync => match handle.await {
                Ok(record) => record,
                Err(e) => {
                    error!(error = %e, "Search request task failed");
                    self.transition(id, RequestStatus::Error, |r| r.error = Some(format!("Error processing images: {e}")));
                    self.store.get(id).unwrap_or(pending)
                }
            },
            RequestMode::Async => pending,
        }
    }

    fn reject(&self, user_id: Option<UserId>, prompt: String, count: usize, mode: RequestMode, message: String) -> SearchRecord {
        warn!(%message, "Rejected search request");
        let record = SearchRecord::rejected(user_id, prompt, count, mode, message);
        self.store.insert(record.clone());
        record
    }

    async fn lookup_user(&self, user_id: UserId) -> Result<Option<UserDBResponse>, PipelineError> {
        let mut conn = self.db.acquire().await.map_err(crate::db::errors::DbError::from)?;
        Ok(Users::new(&mut conn).get_by_id(user_id).await?)
    }

    /// Extract terms, resolve references and write files for one request.
    async fn acquire_images(&self, record: &SearchRecord, user_id: UserId) -> Result<Vec<PathBuf>, PipelineError> {
        let terms = self.extractor.extract(&record.prompt).await;
        let references = self.resolver.resolve(&terms, record.count).await;
        self.materializer.materialize(&references, user_id, record.id).await
    }

    /// Run a pending record to completion. Returns the final stored record.
    async fn run(&self, record: SearchRecord, user: UserDBResponse) -> SearchRecord {
        let id = record.id;
        self.transition(id, RequestStatus::Processing, |_| {});

        match self.acquire_images(&record, user.id).await {
            Ok(paths) => {
                info!(images = paths.len(), "Images ready");
                self.transition(id, RequestStatus::Done, |r| r.images = paths.clone());

                if let Err(e) = self.notifier.send_images_email(&user, &record.prompt, &paths).await {
                    warn!(error = %e, "Result email failed");
                    self.transition(id, RequestStatus::DoneWithErrors, |r| r.append_error(EMAIL_FAILURE_MESSAGE));
                }
            }
            Err(e) => {
                error!(error = %e, "Search request failed");
                self.transition(id, RequestStatus::Error, |r| r.error = Some(format!("Error processing images: {e}")));
            }
        }

        self.store.get(id).unwrap_or(record)
    }

    fn transition(&self, id: RequestId, next: RequestStatus, update: impl FnOnce(&mut SearchRecord)) {
        match self.store.advance(id, next, update) {
            Ok(Some(_)) => {}
            Ok(None) => warn!(request_id = %abbrev_uuid(&id), "Request vanished from store"),
            Err(e) => warn!(request_id = %abbrev_uuid(&id), error = %e, "Ignoring invalid status transition"),
        }
    }
}
