//! End-to-end tests over the full router.

use crate::{
    AppState, Application,
    api::models::{
        requests::SearchRequestResponse,
        users::{RegisterResponse, UserResponse},
    },
    build_router,
    config::{Config, EmailTransportConfig},
    email::Notifier,
    pipeline::{Orchestrator, RequestStatus, RequestStore},
    test_utils::*,
};
use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::json;
use std::{path::Path, sync::Arc, time::Duration};
use tempfile::TempDir;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn file_name(path: &str) -> String {
    Path::new(path).file_name().unwrap().to_string_lossy().into_owned()
}

fn emails_dir(config: &Config) -> String {
    match &config.email.transport {
        EmailTransportConfig::File { path } => path.clone(),
        EmailTransportConfig::Smtp { .. } => panic!("test config should use the file transport"),
    }
}

async fn register(server: &TestServer, name: &str, mail: &str) -> RegisterResponse {
    let response = server
        .post("/v1/register")
        .json(&json!({"user_name": name, "user_mail": mail}))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json()
}

/// Test server whose notifier is supplied by the caller instead of built from config.
async fn app_with_notifier(notifier: Arc<dyn Notifier>) -> (TestServer, AppState, TempDir) {
    let scratch = create_scratch_dir();
    let config = create_test_config(scratch.path());
    let pool = create_test_pool().await;
    let store = RequestStore::new();
    let orchestrator = Orchestrator::from_config(&config, pool.clone(), store.clone(), notifier.clone()).unwrap();

    let state = AppState::builder()
        .db(pool)
        .config(config)
        .store(store)
        .orchestrator(orchestrator)
        .notifier(notifier)
        .build();
    let router = build_router(&state).unwrap();
    (TestServer::new(router).unwrap(), state, scratch)
}

/// Register alice, ask for three "mountains" images with no provider keys configured, and
/// receive three placeholder JPEGs by email.
#[test_log::test(tokio::test)]
async fn test_e2e_register_and_request_placeholders() {
    let (server, state, _scratch) = create_test_app().await;

    let alice = register(&server, "alice", "alice@example.com").await;
    assert_eq!(alice.status, "done");
    assert!(alice.error.is_none());

    let response = server
        .post("/v1/requests")
        .json(&json!({"user": alice.user_id, "n": 3, "prompt": "mountains"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let request: SearchRequestResponse = response.json();

    assert_eq!(request.status, RequestStatus::Done);
    assert!(request.error.is_none());
    let names: Vec<String> = request.images.iter().map(|p| file_name(p)).collect();
    assert_eq!(names, vec!["placeholder_img_01.jpg", "placeholder_img_02.jpg", "placeholder_img_03.jpg"]);
    for image in &request.images {
        assert!(Path::new(image).exists(), "{image} was not written");
        assert!(Path::new(image).starts_with(&state.config.downloads.root));
    }

    // Confirmation plus delivery
    let emails: Vec<String> = std::fs::read_dir(emails_dir(&state.config))
        .unwrap()
        .map(|entry| std::fs::read_to_string(entry.unwrap().path()).unwrap())
        .collect();
    assert_eq!(emails.len(), 2);
    assert!(emails.iter().any(|e| e.contains("placeholder_img_03.jpg")));

    let fetched: SearchRequestResponse = server.get(&format!("/v1/requests/{}", request.request_id)).await.json();
    assert_eq!(fetched.status, RequestStatus::Done);
    assert_eq!(fetched.images, request.images);
}

#[test_log::test(tokio::test)]
async fn test_e2e_duplicate_email_leaves_users_unchanged() {
    let (server, _, _scratch) = create_test_app().await;
    register(&server, "alice", "alice@example.com").await;

    let response = server
        .post("/v1/register")
        .json(&json!({"user_name": "alice-again", "user_mail": "alice@example.com"}))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let users: Vec<UserResponse> = server.get("/v1/users").await.json();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].user_name, "alice");
}

#[test_log::test(tokio::test)]
async fn test_e2e_unknown_user_is_unauthorized() {
    let (server, state, _scratch) = create_test_app().await;
    let stranger = uuid::Uuid::new_v4();

    let request: SearchRequestResponse = server
        .post("/v1/requests")
        .json(&json!({"user": stranger, "n": 3, "prompt": "mountains"}))
        .await
        .json();

    assert_eq!(request.status, RequestStatus::Error);
    assert_eq!(request.error, Some(format!("Unauthorized: User with ID {stranger} does not exist")));
    assert!(request.images.is_empty());
    // Nothing was materialized
    assert!(!state.config.downloads.root.exists());
}

#[test_log::test(tokio::test)]
async fn test_e2e_email_failures_are_reported_not_fatal() {
    let notifier = Arc::new(RecordingNotifier::failing());
    let (server, _, _scratch) = app_with_notifier(notifier.clone()).await;

    let alice = register(&server, "alice", "alice@example.com").await;
    assert_eq!(alice.status, "done");
    assert!(alice.error.unwrap().contains("Failed to send registration email"));

    let request: SearchRequestResponse = server
        .post("/v1/requests")
        .json(&json!({"user": alice.user_id, "n": 2, "prompt": "lakes"}))
        .await
        .json();

    assert_eq!(request.status, RequestStatus::DoneWithErrors);
    assert_eq!(request.images.len(), 2);
    assert_eq!(request.error.as_deref(), Some("Failed to send email"));
    assert_eq!(notifier.registrations(), vec!["alice@example.com"]);
    assert_eq!(notifier.sent_images().len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_e2e_async_request_can_be_polled() {
    let notifier = Arc::new(RecordingNotifier::default());
    let (server, _, _scratch) = app_with_notifier(notifier.clone()).await;
    let alice = register(&server, "alice", "alice@example.com").await;

    let response = server
        .post("/v1/requests")
        .json(&json!({"user": alice.user_id, "n": 4, "prompt": "forests", "mode": "async"}))
        .await;
    response.assert_status(StatusCode::CREATED);
    let pending: SearchRequestResponse = response.json();
    assert_eq!(pending.status, RequestStatus::Pending);
    assert!(pending.images.is_empty());

    let mut finished = None;
    for _ in 0..200 {
        let current: SearchRequestResponse = server.get(&format!("/v1/requests/{}", pending.request_id)).await.json();
        if current.status.is_finished() {
            finished = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let finished = finished.expect("async request did not finish");
    assert_eq!(finished.status, RequestStatus::Done);
    assert_eq!(finished.images.len(), 4);
    assert_eq!(notifier.sent_images()[0].1, "forests");
}

/// Live pipeline against mocked LLM, image search and image hosts.
#[test_log::test(tokio::test)]
async fn test_e2e_live_pipeline_with_mocked_upstreams() {
    let upstream = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer llm-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{ "message": { "role": "assistant", "content": "1. Mountain peaks\n2. Alpine lakes" } }]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/search/photos"))
        .and(query_param("query", "Mountain peaks"))
        .and(query_param("per_page", "3"))
        .and(header("authorization", "Client-ID search-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total": 2,
            "results": [
                { "urls": { "regular": format!("{}/photos/peak.png", upstream.uri()) } },
                { "urls": { "regular": format!("{}/photos/gone.jpg", upstream.uri()) } }
            ]
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    // Provider trouble on the second term stops the search; the rest is padding
    Mock::given(method("GET"))
        .and(path("/search/photos"))
        .and(query_param("query", "Alpine lakes"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/photos/peak.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"))
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("GET"))
        .and(path("/photos/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&upstream)
        .await;

    let scratch = create_scratch_dir();
    let mut config = create_test_config(scratch.path());
    config.llm.base_url = upstream.uri().parse().unwrap();
    config.llm.api_key = Some("llm-key".to_string());
    config.image_search.base_url = upstream.uri().parse().unwrap();
    config.image_search.access_key = Some("search-key".to_string());

    let app = Application::new_with_pool(config, create_test_pool().await).unwrap();
    let (server, _) = app.into_test_server();
    let alice = register(&server, "alice", "alice@example.com").await;

    let request: SearchRequestResponse = server
        .post("/v1/requests")
        .json(&json!({"user": alice.user_id, "n": 3, "prompt": "mountains"}))
        .await
        .json();

    assert_eq!(request.status, RequestStatus::Done);
    let names: Vec<String> = request.images.iter().map(|p| file_name(p)).collect();
    assert_eq!(names, vec!["img_01.png", "error_img_02.txt", "placeholder_img_03.jpg"]);
    assert_eq!(std::fs::read(&request.images[0]).unwrap(), vec![0x89, b'P', b'N', b'G']);
    assert!(std::fs::read_to_string(&request.images[1]).unwrap().contains("gone.jpg"));
}

#[test_log::test(tokio::test)]
async fn test_openapi_json_endpoints() {
    let (server, _, _scratch) = create_test_app().await;

    let response = server.get("/api-docs/openapi.json").await;
    response.assert_status_ok();
    let content = response.text();
    assert!(content.contains("\"openapi\""));
    assert!(content.contains("SnapNSend API"));
    assert!(content.contains("/register"));
    assert!(content.contains("/requests/{request_id}"));

    let docs = server.get("/docs").await;
    docs.assert_status_ok();
    assert!(docs.text().contains("/api-docs/openapi.json") || docs.text().contains("openapi"));
}

#[test_log::test(tokio::test)]
async fn test_scratch_files_removed_with_test_app() {
    let (server, state, scratch) = create_test_app().await;
    register(&server, "alice", "alice@example.com").await;

    let emails = emails_dir(&state.config);
    assert!(Path::new(&emails).starts_with(scratch.path()));
    assert!(state.config.downloads.root.starts_with(scratch.path()));
    assert_eq!(std::fs::read_dir(&emails).unwrap().count(), 1);

    let root = scratch.path().to_path_buf();
    drop(scratch);
    assert!(!root.exists());
}
