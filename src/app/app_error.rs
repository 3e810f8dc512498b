use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::{auth::AuthError, carts::CartError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Envelope shared by every JSON response.
#[derive(Serialize, ToSchema, Debug)]
pub struct StdResponse<T, M> {
    pub data: Option<T>,
    pub message: Option<M>,
}

impl<T, M> IntoResponse for StdResponse<T, M>
where
    T: Serialize,
    M: Serialize,
{
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = match &self {
            AppError::Other(err) => {
                error!("Request failed: {err:?}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (
            status,
            Json(StdResponse::<(), String> {
                data: None,
                message: Some(message),
            }),
        )
            .into_response()
    }
}

impl From<CartError> for AppError {
    fn from(err: CartError) -> Self {
        match err {
            CartError::NotFound(_) => AppError::NotFound,
            CartError::InvalidArgument(message) => AppError::BadRequest(message),
            CartError::Conflict => {
                AppError::Conflict("The cart was modified concurrently, try again".into())
            }
            CartError::Store(err) => AppError::Other(err),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::Inactive => AppError::Unauthorized,
            AuthError::EmailTaken => AppError::Conflict(err.to_string()),
            AuthError::InvalidEmail
            | AuthError::WeakPassword(_)
            | AuthError::InvalidActivation => {
                AppError::BadRequest(err.to_string())
            }
            AuthError::Cart(err) => err.into(),
            AuthError::Other(err) => AppError::Other(err),
        }
    }
}
