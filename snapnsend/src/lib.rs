//! # snapnsend: prompt to pictures, by email
//!
//! `snapnsend` is a small HTTP service that turns a text prompt from a registered user into a set
//! of related images and emails them back as attachments.
//!
//! ## Overview
//!
//! A user registers with a name and an email address. They then submit a search request: a
//! prompt and the number of images wanted. The service asks an LLM chat API for image search
//! terms related to the prompt, looks those terms up with an image search provider, downloads
//! the hits (or writes placeholder JPEGs when there are not enough), and mails the files to the
//! user. Every request is tracked in memory through a small status state machine that clients
//! can poll.
//!
//! ## Architecture
//!
//! The application is built on [Axum](https://github.com/tokio-rs/axum) for the HTTP layer and
//! SQLite (through sqlx) for the user table. Search requests are not persisted.
//!
//! ### Request Flow
//!
//! ```text
//! POST /v1/requests
//!        │
//!        ▼
//! Orchestrator ──► ExtractTerms ──► ImageResolver ──► Materialize ──► Notifier
//!        │              (LLM)        (image search)     (files)        (email)
//!        ▼
//! RequestStore: pending → processing → done | done_with_errors | error
//! ```
//!
//! In `sync` mode the HTTP call waits for the pipeline and returns the final record; in `async`
//! mode it returns the pending record and the pipeline runs on a spawned task.
//!
//! Upstream trouble never fails a request: an LLM error falls back to the prompt as the only
//! search term, a missing or failing image provider falls back to placeholders, and a failed
//! download leaves an error note in place of the image. A failed email marks the request
//! `done_with_errors`.
//!
//! ### Core Components
//!
//! - The **API layer** ([`api`]) exposes registration, user lookup and request endpoints under
//!   the configured prefix (`/v1` by default), documented with OpenAPI at `/docs`.
//! - The **database layer** ([`db`]) wraps the `users` table in a repository.
//! - The **pipeline** ([`pipeline`]) holds the stages, the orchestrator and the request store.
//! - The **email service** ([`email`]) sends registration confirmations and image deliveries
//!   over SMTP, or writes them to a directory in development.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use snapnsend::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = snapnsend::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     snapnsend::telemetry::init_telemetry(&config.log)?;
//!     snapnsend::install_crypto_provider();
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Database Setup
//!
//! The SQLite file is created if missing and migrations run on startup:
//!
//! ```no_run
//! # use sqlx::SqlitePool;
//! # async fn example(pool: SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
//! snapnsend::migrator().run(&pool).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.
pub mod api;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
mod openapi;
pub mod pipeline;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

#[cfg(test)]
mod test;

use crate::{
    api::handlers::{health, requests, users},
    config::CorsOrigin,
    email::{EmailService, Notifier},
    pipeline::{Orchestrator, RequestStore},
};
use axum::{
    Json, Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa_scalar::{Scalar, Servable};

pub use types::{RequestId, UserId};

/// Application state shared across all request handlers.
///
/// # Fields
///
/// - `db`: SQLite connection pool for the user table
/// - `config`: Application configuration loaded from file and environment
/// - `store`: In-memory search request table, shared with the orchestrator
/// - `orchestrator`: Runs search requests through the image pipeline
/// - `notifier`: Sends registration and delivery emails
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .db(pool)
///     .config(config)
///     .store(store)
///     .orchestrator(orchestrator)
///     .notifier(notifier)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Config,
    pub store: RequestStore,
    pub orchestrator: Orchestrator,
    pub notifier: Arc<dyn Notifier>,
}

/// Get the snapnsend database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Install the process-wide rustls crypto provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err only means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Open (creating if needed) the SQLite database and run migrations.
async fn setup_database(config: &Config) -> anyhow::Result<SqlitePool> {
    info!(url = %config.database.url, "Opening database");

    let options = SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(config.database.acquire_timeout)
        .connect_with(options)
        .await?;

    migrator().run(&pool).await?;
    Ok(pool)
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let allow_origin = if config.cors.allowed_origins.contains(&CorsOrigin::Wildcard) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &config.cors.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                // Origins never carry a trailing slash
                origins.push(url.as_str().trim_end_matches('/').parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE])
        .allow_credentials(config.cors.allow_credentials);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router with all endpoints and middleware.
///
/// - `GET /`: service info
/// - `{api_prefix}/...`: health, users and requests
/// - `/api-docs/openapi.json` and `/docs`: OpenAPI document and viewer
/// - CORS and request tracing on everything
///
/// # Errors
///
/// Returns an error if the CORS configuration cannot be turned into header values.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/health", get(health::health))
        .route("/register", post(users::register))
        .route("/users", get(users::list_users))
        .route("/users/{user_id}", get(users::get_user))
        .route("/requests", post(requests::create_request).get(requests::list_requests))
        .route("/requests/{request_id}", get(requests::get_request));

    let doc = openapi::api_doc(&state.config.api_prefix);

    let router = Router::new()
        .route("/", get(health::root))
        .nest(&state.config.api_prefix, api_routes)
        .route(
            "/api-docs/openapi.json",
            get({
                let doc = doc.clone();
                move || {
                    let doc = doc.clone();
                    async move { Json(doc) }
                }
            }),
        )
        .merge(Scalar::with_url("/docs", doc))
        .with_state(state.clone())
        .layer(create_cors_layer(&state.config)?)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    Ok(router)
}

pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
    pool: SqlitePool,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let pool = setup_database(&config).await?;
        Self::new_with_pool(config, pool)
    }

    /// Create an application over an existing, already migrated pool
    pub fn new_with_pool(config: Config, pool: SqlitePool) -> anyhow::Result<Self> {
        debug!(
            bind_address = %config.bind_address(),
            environment = %config.environment,
            api_prefix = %config.api_prefix,
            "Starting SnapNSend"
        );

        if config.llm.api_key.is_none() {
            info!("No LLM API key configured; prompts are used verbatim as search terms");
        }
        if config.image_search.access_key.is_none() {
            info!("No image search key configured; requests will be filled with placeholder images");
        }

        let notifier: Arc<dyn Notifier> = Arc::new(EmailService::new(&config)?);
        let store = RequestStore::new();
        let orchestrator = Orchestrator::from_config(&config, pool.clone(), store.clone(), notifier.clone())?;

        let app_state = AppState::builder()
            .db(pool.clone())
            .config(config.clone())
            .store(store)
            .orchestrator(orchestrator)
            .notifier(notifier)
            .build();

        let router = build_router(&app_state)?;

        Ok(Self {
            router,
            app_state,
            config,
            pool,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> (axum_test::TestServer, AppState) {
        let server = axum_test::TestServer::new(self.router).expect("Failed to create test server");
        (server, self.app_state)
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "SnapNSend listening on http://{}, API docs at http://localhost:{}/docs",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Async-mode requests still running are dropped with the runtime
        let unfinished = self.app_state.store.list().iter().filter(|r| !r.status.is_finished()).count();
        if unfinished > 0 {
            info!(unfinished, "Abandoning unfinished search requests");
        }

        info!("Closing database connections...");
        self.pool.close().await;

        Ok(())
    }
}
