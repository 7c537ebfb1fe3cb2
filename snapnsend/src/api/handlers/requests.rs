use crate::{
    AppState,
    api::models::requests::{MAX_IMAGE_COUNT, SearchRequestCreate, SearchRequestResponse},
    errors::Error,
    types::{RequestId, abbrev_uuid},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use tracing::instrument;

/// Reject counts outside `1..=50` and blank prompts. Returns the count and trimmed prompt.
fn validate_search_request(request: &SearchRequestCreate) -> Result<(usize, String), Error> {
    if !(1..=MAX_IMAGE_COUNT).contains(&request.n) {
        return Err(Error::BadRequest {
            message: format!("n must be between 1 and {MAX_IMAGE_COUNT}, got {}", request.n),
        });
    }

    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(Error::BadRequest {
            message: "prompt must not be empty".to_string(),
        });
    }

    let count = usize::try_from(request.n).map_err(|_| Error::BadRequest {
        message: format!("n must be between 1 and {MAX_IMAGE_COUNT}, got {}", request.n),
    })?;
    Ok((count, prompt.to_string()))
}

// POST /requests - Submit an image search
#[utoipa::path(
    post,
    path = "/requests",
    tag = "requests",
    summary = "Create image search request",
    description = "Run the image pipeline for a prompt and email the results to the user. \
        In `sync` mode the response carries the final state; in `async` mode it carries the pending record. \
        Requests without a known user are recorded with status `error`.",
    request_body = SearchRequestCreate,
    responses(
        (status = 201, description = "Request recorded", body = SearchRequestResponse),
        (status = 400, description = "Invalid image count or empty prompt"),
    )
)]
#[instrument(skip_all, fields(mode = ?request.mode, n = request.n))]
pub async fn create_request(
    State(state): State<AppState>,
    Json(request): Json<SearchRequestCreate>,
) -> Result<(StatusCode, Json<SearchRequestResponse>), Error> {
    let (count, prompt) = validate_search_request(&request)?;

    let record = state.orchestrator.submit(request.user, prompt, count, request.mode).await;

    Ok((StatusCode::CREATED, Json(record.into())))
}

// GET /requests/{request_id} - Get a request
#[utoipa::path(
    get,
    path = "/requests/{request_id}",
    tag = "requests",
    summary = "Get image search request",
    params(
        ("request_id" = String, Path, description = "Request ID (UUID)"),
    ),
    responses(
        (status = 200, description = "Current state of the request", body = SearchRequestResponse),
        (status = 404, description = "Request not found"),
    )
)]
#[instrument(skip(state), fields(request_id = %abbrev_uuid(&request_id)))]
pub async fn get_request(State(state): State<AppState>, Path(request_id): Path<RequestId>) -> Result<Json<SearchRequestResponse>, Error> {
    let record = state.store.get(request_id).ok_or_else(|| Error::NotFound {
        resource: "Request".to_string(),
        id: request_id.to_string(),
    })?;

    Ok(Json(record.into()))
}

// GET /requests - List requests
#[utoipa::path(
    get,
    path = "/requests",
    tag = "requests",
    summary = "List image search requests",
    description = "All requests since the service started, oldest first",
    responses(
        (status = 200, description = "List of requests", body = [SearchRequestResponse]),
    )
)]
#[instrument(skip_all)]
pub async fn list_requests(State(state): State<AppState>) -> Json<Vec<SearchRequestResponse>> {
    Json(state.store.list().into_iter().map(SearchRequestResponse::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{RequestMode, RequestStatus};
    use crate::test_utils::*;
    use serde_json::json;

    fn create(n: i64, prompt: &str) -> SearchRequestCreate {
        SearchRequestCreate {
            user: None,
            n,
            prompt: prompt.to_string(),
            mode: RequestMode::Sync,
        }
    }

    #[test]
    fn test_validate_search_request() {
        assert_eq!(validate_search_request(&create(1, " lakes ")).unwrap(), (1, "lakes".to_string()));
        assert_eq!(validate_search_request(&create(50, "lakes")).unwrap().0, 50);

        for bad in [create(0, "lakes"), create(51, "lakes"), create(-1, "lakes"), create(3, "   ")] {
            assert!(matches!(validate_search_request(&bad), Err(Error::BadRequest { .. })), "{bad:?}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_out_of_range_count_is_rejected_and_not_stored() {
        let (app, state, _scratch) = create_test_app().await;

        for n in [0, 51] {
            let response = app.post("/v1/requests").json(&json!({"n": n, "prompt": "mountains"})).await;
            response.assert_status_bad_request();
        }

        assert!(state.store.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_request_without_user_is_recorded_as_error() {
        let (app, state, _scratch) = create_test_app().await;

        let response = app.post("/v1/requests").json(&json!({"n": 2, "prompt": "mountains"})).await;

        response.assert_status(StatusCode::CREATED);
        let body: SearchRequestResponse = response.json();
        assert_eq!(body.status, RequestStatus::Error);
        assert_eq!(body.error.as_deref(), Some("Unauthorized: No user ID provided"));
        assert!(body.images.is_empty());
        assert_eq!(state.store.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_get_and_list_requests() {
        let (app, state, _scratch) = create_test_app().await;
        let user = create_test_user(&state.db, "alice", "alice@example.com").await;

        let first: SearchRequestResponse = app
            .post("/v1/requests")
            .json(&json!({"user": user.id, "n": 1, "prompt": "lakes"}))
            .await
            .json();
        let second: SearchRequestResponse = app
            .post("/v1/requests")
            .json(&json!({"user": user.id, "n": 2, "prompt": "rivers"}))
            .await
            .json();

        let response = app.get(&format!("/v1/requests/{}", second.request_id)).await;
        response.assert_status_ok();
        let fetched: SearchRequestResponse = response.json();
        assert_eq!(fetched.prompt, "rivers");
        assert_eq!(fetched.status, RequestStatus::Done);
        assert_eq!(fetched.images.len(), 2);

        let listed: Vec<SearchRequestResponse> = app.get("/v1/requests").await.json();
        let ids: Vec<_> = listed.iter().map(|r| r.request_id).collect();
        assert_eq!(ids, vec![first.request_id, second.request_id]);

        app.get(&format!("/v1/requests/{}", RequestId::new_v4()))
            .await
            .assert_status_not_found();
    }
}
