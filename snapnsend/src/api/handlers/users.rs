use crate::{
    AppState,
    api::models::{
        pagination::Pagination,
        users::{MAX_USER_NAME_CHARS, RegisterRequest, RegisterResponse, UserResponse},
    },
    db::{
        handlers::{Repository, Users, users::UserFilter},
        models::users::UserCreateDBRequest,
    },
    errors::Error,
    types::{UserId, abbrev_uuid},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use tracing::{info, instrument, warn};

/// Check a registration body, returning the trimmed values to store.
fn validate_registration(request: RegisterRequest) -> Result<UserCreateDBRequest, Error> {
    let create = UserCreateDBRequest::from(request);

    if create.user_name.is_empty() {
        return Err(Error::BadRequest {
            message: "user_name must not be empty".to_string(),
        });
    }
    if create.user_name.chars().count() > MAX_USER_NAME_CHARS {
        return Err(Error::BadRequest {
            message: format!("user_name must be at most {MAX_USER_NAME_CHARS} characters"),
        });
    }
    if create.user_mail.parse::<lettre::Address>().is_err() {
        return Err(Error::BadRequest {
            message: format!("'{}' is not a valid email address", create.user_mail),
        });
    }

    Ok(create)
}

// POST /register - Register a new user
#[utoipa::path(
    post,
    path = "/register",
    tag = "users",
    summary = "Register user",
    description = "Create a user and send a confirmation email. An email failure does not fail the registration.",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = RegisterResponse),
        (status = 400, description = "Invalid name or email"),
        (status = 409, description = "Email or user name already registered"),
        (status = 500, description = "Internal server error"),
    )
)]
#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), Error> {
    let create = validate_registration(request)?;

    let user = {
        let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
        let mut repo = Users::new(&mut conn);

        if repo.get_user_by_email(&create.user_mail).await?.is_some() {
            return Err(Error::Conflict {
                message: "Email already registered".to_string(),
            });
        }
        if repo.get_user_by_username(&create.user_name).await?.is_some() {
            return Err(Error::Conflict {
                message: "Username already taken".to_string(),
            });
        }

        // A concurrent registration can still win the race; the UNIQUE constraint maps to 409
        repo.create(&create).await?
    };

    info!(user_id = %abbrev_uuid(&user.id), "Registered user");

    let error = match state.notifier.send_registration_email(&user).await {
        Ok(()) => None,
        Err(e) => {
            warn!(error = %e, "Registration email failed");
            Some(format!("Failed to send registration email: {e}"))
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            status: "done".to_string(),
            error,
        }),
    ))
}

// GET /users - List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    summary = "List users",
    description = "List registered users, newest first",
    params(Pagination),
    responses(
        (status = 200, description = "List of users", body = [UserResponse]),
        (status = 500, description = "Internal server error"),
    )
)]
#[instrument(skip_all)]
pub async fn list_users(State(state): State<AppState>, Query(pagination): Query<Pagination>) -> Result<Json<Vec<UserResponse>>, Error> {
    let (skip, limit) = pagination.params();
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let users = Users::new(&mut conn).list(&UserFilter::new(skip, limit)).await?;

    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

// GET /users/{user_id} - Get a user
#[utoipa::path(
    get,
    path = "/users/{user_id}",
    tag = "users",
    summary = "Get user",
    params(
        ("user_id" = String, Path, description = "User ID (UUID)"),
    ),
    responses(
        (status = 200, description = "User information", body = UserResponse),
        (status = 404, description = "User not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[instrument(skip(state), fields(user_id = %abbrev_uuid(&user_id)))]
pub async fn get_user(State(state): State<AppState>, Path(user_id): Path<UserId>) -> Result<Json<UserResponse>, Error> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = Users::new(&mut conn).get_by_id(user_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })?;

    Ok(Json(UserResponse::from(user)))
}
