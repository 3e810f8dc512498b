use thiserror::Error;

use crate::carts::CartError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is not active")]
    Inactive,

    #[error("Activation link is invalid")]
    InvalidActivation,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Invalid email address")]
    InvalidEmail,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error(transparent)]
    Cart(#[from] CartError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;
