//! Image acquisition pipeline.
//!
//! A search request flows through four stages, each behind its own seam so they can be replaced
//! in tests:
//!
//! ```text
//! prompt ──► terms::ExtractTerms ──► resolver::ImageResolver ──► materializer::Materialize ──► files
//!             (LLM chat API)          (image search + padding)     (download / placeholder)
//! ```
//!
//! [`orchestrator::Orchestrator`] drives the stages for one request, records progress in the
//! in-memory [`store::RequestStore`], and hands the resulting files to the
//! [`crate::email::Notifier`].
//!
//! Upstream failures (LLM, image provider, individual downloads) degrade to fallback data and
//! never fail a request. Only the errors in [`PipelineError`] do.

pub mod materializer;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod terms;

use std::{path::PathBuf, time::Duration};
use thiserror::Error;

use crate::db::errors::DbError;

pub use materializer::{ImageMaterializer, Materialize};
pub use orchestrator::Orchestrator;
pub use resolver::{ImageReference, ImageResolver, ImageSearch, SyntheticSearch, UnsplashSearch};
pub use store::{RequestMode, RequestStatus, RequestStore, SearchRecord};
pub use terms::{ExtractTerms, LlmTermExtractor, PassthroughExtractor, parse_search_terms};

/// Failures that abort a request and move it to the `error` state.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A filesystem operation on the downloads tree failed
    #[error("{operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Placeholder image could not be encoded
    #[error("encode placeholder image: {0}")]
    Image(#[from] image::ImageError),

    /// User lookup failed for a reason other than the user being absent
    #[error("user lookup failed: {0}")]
    Database(#[from] DbError),

    /// An outbound HTTP client could not be constructed
    #[error("build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

impl PipelineError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Build an outbound client with a whole-request timeout.
pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client, PipelineError> {
    crate::install_crypto_provider();
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("snapnsend/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Makes sure a url has a trailing slash.
///
/// Joining `/hello` and `world` gives `/world`, but `/hello/` and `world` gives `/hello/world`.
/// Call this before calling `.join` on a configured base URL.
pub(crate) fn ensure_slash(url: &url::Url) -> url::Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let path = format!("{}/", url.path());
        new_url.set_path(&path);
        new_url
    }
}
