//! Accounts and logins.

pub mod errors;
pub mod password;
pub mod service;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

pub use errors::{AuthError, AuthResult};
pub use service::{AuthService, LoggedIn};

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub phone_number: String,
    pub address: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// A user to register. Users start inactive until `activation_token` is
/// presented back.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub phone_number: String,
    pub address: String,
    pub activation_token: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`AuthError::EmailTaken`] when the email is registered.
    async fn create_user(&self, user: NewUser) -> AuthResult<User>;

    async fn find_user(&self, id: i32) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>>;

    /// Activates an inactive user whose pending token is `token`. The token
    /// is single use; `None` when nothing matched.
    async fn activate_user(&self, id: i32, token: &str) -> Result<Option<User>>;

    /// Deletes the user with their carts, sessions and orders.
    async fn delete_user(&self, id: i32) -> Result<bool>;
}
