//! Test utilities shared by unit and integration tests.

use crate::{
    AppState,
    config::{Config, DownloadsConfig, EmailTransportConfig, ImageSearchConfig, LlmConfig},
    db::{
        handlers::{Repository, Users},
        models::users::{UserCreateDBRequest, UserDBResponse},
    },
    email::Notifier,
    errors::Error,
};
use async_trait::async_trait;
use axum_test::TestServer;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    path::{Path, PathBuf},
    str::FromStr,
    sync::Mutex,
    time::Duration,
};
use tempfile::TempDir;

/// Fresh in-memory database with migrations applied.
///
/// Every SQLite in-memory connection is its own database, so the pool is pinned to exactly one
/// long-lived connection.
pub async fn create_test_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").expect("Invalid SQLite URL");
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .expect("Failed to create test pool");

    crate::migrator().run(&pool).await.expect("Failed to run migrations");
    pool
}

/// Configuration with no upstream keys and the file email transport.
///
/// Emails and downloads are written below `scratch`, which the caller owns.
pub fn create_test_config(scratch: &Path) -> Config {
    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        llm: LlmConfig {
            api_key: None,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        image_search: ImageSearchConfig {
            access_key: None,
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        downloads: DownloadsConfig {
            root: scratch.join("downloads"),
            placeholder_size: 8,
            request_timeout: Duration::from_secs(5),
        },
        ..Default::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: scratch.join("emails").to_string_lossy().into_owned(),
    };
    config
}

/// Temporary directory for one test's emails and downloads, removed on drop.
pub fn create_scratch_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("snapnsend-test-")
        .tempdir()
        .expect("Failed to create scratch directory")
}

/// The full application over an in-memory database.
///
/// Keep the returned directory alive for as long as the test inspects written files.
pub async fn create_test_app() -> (TestServer, AppState, TempDir) {
    let scratch = create_scratch_dir();
    let config = create_test_config(scratch.path());
    let app = crate::Application::new_with_pool(config, create_test_pool().await).expect("Failed to create application");

    let (server, state) = app.into_test_server();
    (server, state, scratch)
}

pub async fn create_test_user(pool: &SqlitePool, user_name: &str, user_mail: &str) -> UserDBResponse {
    let mut conn = pool.acquire().await.expect("Failed to acquire connection");
    Users::new(&mut conn)
        .create(&UserCreateDBRequest {
            user_name: user_name.to_string(),
            user_mail: user_mail.to_string(),
        })
        .await
        .expect("Failed to create test user")
}

/// Notifier that records what it was asked to send instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    fail: bool,
    registrations: Mutex<Vec<String>>,
    images: Mutex<Vec<(String, String, Vec<PathBuf>)>>,
}

impl RecordingNotifier {
    /// A notifier whose every send fails after being recorded.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Addresses that received a registration email.
    pub fn registrations(&self) -> Vec<String> {
        self.registrations.lock().unwrap().clone()
    }

    /// `(address, prompt, attachments)` for each images email.
    pub fn sent_images(&self) -> Vec<(String, String, Vec<PathBuf>)> {
        self.images.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), Error> {
        if self.fail {
            Err(Error::Internal {
                operation: "send email: connection refused".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_registration_email(&self, user: &UserDBResponse) -> Result<(), Error> {
        self.registrations.lock().unwrap().push(user.user_mail.clone());
        self.outcome()
    }

    async fn send_images_email(&self, user: &UserDBResponse, prompt: &str, image_paths: &[PathBuf]) -> Result<(), Error> {
        self.images
            .lock()
            .unwrap()
            .push((user.user_mail.clone(), prompt.to_string(), image_paths.to_vec()));
        self.outcome()
    }
}
