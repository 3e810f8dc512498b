use axum::{
    Extension, Json,
    extract::State,
    http::{StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    app::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
    },
    auth::{User, service::Registration},
    sessions::{
        SessionContext,
        resolver::{expired_session_cookie, session_cookie},
    },
};

pub fn routes_with_openapi() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/auth",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(register))
            .routes(utoipa_axum::routes!(activate))
            .routes(utoipa_axum::routes!(login))
            .routes(utoipa_axum::routes!(logout))
            .routes(utoipa_axum::routes!(me))
            .routes(utoipa_axum::routes!(delete_account)),
    )
}

#[derive(Deserialize, ToSchema)]
struct RegisterReq {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub address: String,
}

/// Create an inactive account and mail its activation link.
#[utoipa::path(
    post,
    path = "/register",
    tags = ["Auth"],
    request_body = RegisterReq,
    responses(
        (status = 201, description = "Register successfully, check your email", body = StdResponse<User, String>),
        (status = 400, description = "Invalid email or weak password"),
        (status = 409, description = "Email is already registered")
    )
)]
async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterReq>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth()
        .register(Registration {
            email: body.email,
            password: body.password,
            phone_number: body.phone_number,
            address: body.address,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(user),
            message: Some("Register successfully, check your email"),
        },
    ))
}

#[derive(Deserialize, ToSchema)]
struct ActivateReq {
    pub user_id: i32,
    pub token: String,
}

/// Activate an account with the token from its activation email.
#[utoipa::path(
    post,
    path = "/activate",
    tags = ["Auth"],
    request_body = ActivateReq,
    responses(
        (status = 200, description = "Activate successfully", body = StdResponse<User, String>),
        (status = 400, description = "Activation link is invalid")
    )
)]
async fn activate(
    State(state): State<AppState>,
    Json(body): Json<ActivateReq>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth().activate(body.user_id, &body.token).await?;

    Ok(StdResponse {
        data: Some(user),
        message: Some("Activate successfully"),
    })
}

#[derive(Deserialize, ToSchema)]
struct LoginReq {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
struct LoginRes {
    pub user: User,
    /// The user's cart after the visitor's anonymous cart was folded in.
    pub cart_id: i32,
    #[schema(value_type = String, example = "19.98")]
    pub cart_total: Decimal,
}

/// Log in on the current session. The session moves under a new key, sent
/// back as a cookie, and its anonymous cart is merged into the user's cart.
#[utoipa::path(
    post,
    path = "/login",
    tags = ["Auth"],
    security(("sessionCookie" = [])),
    request_body = LoginReq,
    responses(
        (status = 200, description = "Login successfully", body = StdResponse<LoginRes, String>),
        (status = 401, description = "Invalid credentials or inactive account")
    )
)]
async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
    Json(body): Json<LoginReq>,
) -> Result<impl IntoResponse, AppError> {
    let logged_in = state
        .auth()
        .login(&session, &body.email, &body.password)
        .await?;

    let settings = &state.config.session;
    let cookie = session_cookie(
        &settings.cookie_name,
        &logged_in.session_key,
        settings.ttl,
        settings.secure,
    );

    Ok((
        [(SET_COOKIE, cookie)],
        StdResponse {
            data: Some(LoginRes {
                user: logged_in.user,
                cart_id: logged_in.cart.id,
                cart_total: logged_in.cart.total(),
            }),
            message: Some("Login successfully"),
        },
    ))
}

/// End the current session.
#[utoipa::path(
    post,
    path = "/logout",
    tags = ["Auth"],
    security(("sessionCookie" = [])),
    responses(
        (status = 200, description = "Logout successfully")
    )
)]
async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    state.auth().logout(&session).await?;

    Ok((
        [(
            SET_COOKIE,
            expired_session_cookie(&state.config.session.cookie_name),
        )],
        StdResponse::<(), _> {
            data: None,
            message: Some("Logout successfully"),
        },
    ))
}

/// Fetch the logged in user.
#[utoipa::path(
    get,
    path = "/me",
    tags = ["Auth"],
    security(("sessionCookie" = [])),
    responses(
        (status = 200, description = "Get user successfully", body = StdResponse<User, String>),
        (status = 401, description = "Not logged in")
    )
)]
async fn me(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth()
        .current_user(&session)
        .await?
        .ok_or(AppError::Unauthorized)?;

    Ok(StdResponse {
        data: Some(user),
        message: Some("Get user successfully"),
    })
}

/// Delete the logged in user together with their carts, sessions and orders.
#[utoipa::path(
    delete,
    path = "/account",
    tags = ["Auth"],
    security(("sessionCookie" = [])),
    responses(
        (status = 200, description = "Delete account successfully"),
        (status = 401, description = "Not logged in")
    )
)]
async fn delete_account(
    State(state): State<AppState>,
    Extension(session): Extension<SessionContext>,
) -> Result<impl IntoResponse, AppError> {
    super::require_user(&session)?;

    state.auth().delete_account(&session).await?;

    Ok((
        [(
            SET_COOKIE,
            expired_session_cookie(&state.config.session.cookie_name),
        )],
        StdResponse::<(), _> {
            data: None,
            message: Some("Delete account successfully"),
        },
    ))
}
