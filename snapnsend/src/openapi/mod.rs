//! OpenAPI documentation for the HTTP API.
//!
//! Paths are declared relative to the API prefix; [`api_doc`] adds the configured prefix as the
//! document's server so the generated spec matches the mounted routes.

use utoipa::OpenApi;
use utoipa::openapi::ServerBuilder;

use crate::api;
use crate::pipeline::{RequestMode, RequestStatus};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "SnapNSend API",
        description = "Turn a text prompt into a set of related images and email them to a registered user."
    ),
    paths(
        api::handlers::health::health,
        api::handlers::users::register,
        api::handlers::users::list_users,
        api::handlers::users::get_user,
        api::handlers::requests::create_request,
        api::handlers::requests::get_request,
        api::handlers::requests::list_requests,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::models::users::RegisterRequest,
            api::models::users::RegisterResponse,
            api::models::users::UserResponse,
            api::models::requests::SearchRequestCreate,
            api::models::requests::SearchRequestResponse,
            RequestMode,
            RequestStatus,
        )
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "users", description = "User registration and lookup"),
        (name = "requests", description = "Image search requests and their status"),
    )
)]
pub struct ApiDoc;

/// The OpenAPI document with `api_prefix` as its only server.
pub fn api_doc(api_prefix: &str) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![ServerBuilder::new().url(api_prefix).description(Some("SnapNSend API")).build()]);
    doc
}
