//! Registration, activation, login and logout.

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use super::{
    AuthError, AuthResult, NewUser, User, UserStore,
    password::{hash_password, validate_password, verify_password},
};
use crate::{
    app::config::Config,
    carts::{CartEngine, CartStore, models::Cart},
    mailer::{Email, Mailer},
    sessions::{SessionContext, SessionKey, SessionStore},
};

#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub phone_number: String,
    pub address: String,
}

/// Lower-cases the domain part and checks the overall shape.
pub fn normalize_email(email: &str) -> AuthResult<String> {
    let email = email.trim();
    let (local, domain) = email.rsplit_once('@').ok_or(AuthError::InvalidEmail)?;

    let valid = !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace);

    if !valid {
        return Err(AuthError::InvalidEmail);
    }

    Ok(format!("{local}@{}", domain.to_lowercase()))
}

pub struct AuthService<'s, S: ?Sized> {
    store: &'s S,
    mailer: &'s dyn Mailer,
    config: &'s Config,
}

/// Outcome of a successful login.
#[derive(Debug)]
pub struct LoggedIn {
    pub user: User,
    /// The user's cart, with the visitor's anonymous cart folded in.
    pub cart: Cart,
    /// The rotated session key; the key used before login no longer works.
    pub session_key: SessionKey,
}

impl<'s, S> AuthService<'s, S>
where
    S: UserStore + SessionStore + CartStore + ?Sized,
{
    pub fn new(store: &'s S, mailer: &'s dyn Mailer, config: &'s Config) -> Self {
        Self {
            store,
            mailer,
            config,
        }
    }

    /// Creates an inactive account and mails its activation link.
    pub async fn register(&self, registration: Registration) -> AuthResult<User> {
        let email = normalize_email(&registration.email)?;
        validate_password(&registration.password)?;

        let password_hash =
            hash_password(&registration.password, Some(self.config.auth.bcrypt_cost)).await?;
        let activation_token = Uuid::new_v4().simple().to_string();

        let user = self
            .store
            .create_user(NewUser {
                email,
                password_hash,
                phone_number: registration.phone_number.trim().to_string(),
                address: registration.address.trim().to_string(),
                activation_token: activation_token.clone(),
            })
            .await?;

        self.mailer
            .send(activation_email(
                &user,
                &activation_token,
                &self.config.auth.public_url,
            ))
            .await
            .context("Failed to send the activation email")?;

        info!(user_id = user.id, "Registered user");

        Ok(user)
    }

    pub async fn activate(&self, user_id: i32, token: &str) -> AuthResult<User> {
        let user = self
            .store
            .activate_user(user_id, token)
            .await?
            .ok_or(AuthError::InvalidActivation)?;

        info!(user_id, "Activated user");

        Ok(user)
    }

    /// Verifies the credentials, moves the session under a fresh key bound to
    /// the user and folds the visitor's anonymous cart into the user's cart.
    pub async fn login(
        &self,
        session: &SessionContext,
        email: &str,
        password: &str,
    ) -> AuthResult<LoggedIn> {
        let email = normalize_email(email).map_err(|_| AuthError::InvalidCredentials)?;

        let credentials = self
            .store
            .find_user_by_email(&email)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if !verify_password(password, &credentials.password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }

        if !credentials.user.is_active {
            return Err(AuthError::Inactive);
        }

        let user = credentials.user;
        let session_key = self
            .store
            .rotate_session(&session.key, Some(user.id), self.config.session.ttl)
            .await?;

        let cart = CartEngine::new(self.store)
            .with_conflict_attempts(self.config.carts.conflict_attempts)
            .merge_on_login(&session_key, user.id)
            .await?;

        info!(user_id = user.id, cart_id = cart.id, "User logged in");

        Ok(LoggedIn {
            user,
            cart,
            session_key,
        })
    }

    pub async fn logout(&self, session: &SessionContext) -> AuthResult<()> {
        self.store.delete_session(&session.key).await?;

        if let Some(user_id) = session.user_id() {
            info!(user_id, "User logged out");
        }

        Ok(())
    }

    pub async fn current_user(&self, session: &SessionContext) -> AuthResult<Option<User>> {
        match session.user_id() {
            Some(user_id) => Ok(self.store.find_user(user_id).await?),
            None => Ok(None),
        }
    }

    /// Deletes the caller's account; carts, sessions and orders go with it.
    pub async fn delete_account(&self, session: &SessionContext) -> AuthResult<()> {
        let user_id = session.user_id().ok_or(AuthError::InvalidCredentials)?;

        self.store.delete_user(user_id).await?;
        self.store.delete_session(&session.key).await?;

        info!(user_id, "Deleted account");

        Ok(())
    }
}

fn activation_email(user: &User, token: &str, public_url: &str) -> Email {
    Email {
        to: user.email.clone(),
        subject: "Confirm your registration".into(),
        body: format!(
            "Follow the link to activate your account: {public_url}/activate/{}/{token}",
            user.id
        ),
    }
}
