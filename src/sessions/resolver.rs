//! Binds every inbound request to a session.
//!
//! The middleware only establishes *who* is calling. Handlers that need a
//! cart resolve it themselves through [`crate::carts::CartEngine`].

use axum::{
    extract::{Request, State},
    http::{
        HeaderMap, HeaderValue,
        header::{COOKIE, SET_COOKIE},
    },
    middleware::Next,
    response::Response,
};
use chrono::TimeDelta;
use tracing::debug;

use super::{Identity, Session, SessionKey};
use crate::app::{app_error::AppError, app_state::AppState};

/// The caller's session as seen by a handler.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub key: SessionKey,
    pub identity: Identity,
    /// Whether the key was minted while handling this request.
    pub is_new: bool,
}

impl SessionContext {
    pub fn from_session(session: Session, is_new: bool) -> Self {
        Self {
            identity: session.identity(),
            key: session.key,
            is_new,
        }
    }

    pub fn user_id(&self) -> Option<i32> {
        self.identity.user_id()
    }
}

/// Extracts the session key from the `Cookie` headers.
pub fn session_key_from_headers(headers: &HeaderMap, cookie_name: &str) -> Option<SessionKey> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .and_then(|(_, value)| SessionKey::parse(value.trim()))
}

/// The cookie lives exactly as long as the session it carries.
pub fn session_cookie(
    cookie_name: &str,
    key: &SessionKey,
    ttl: TimeDelta,
    secure: bool,
) -> String {
    let mut cookie = format!(
        "{cookie_name}={key}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        ttl.num_seconds()
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

pub fn expired_session_cookie(cookie_name: &str) -> String {
    format!("{cookie_name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Ensures a session exists and hands a [`SessionContext`] to the handler.
pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let settings = &state.config.session;
    let presented = session_key_from_headers(request.headers(), &settings.cookie_name);

    let ensured = state
        .store
        .ensure_session(presented.as_ref(), settings.ttl)
        .await?;
    let context = SessionContext::from_session(ensured.session, ensured.created);

    if context.is_new {
        debug!(session_created = true, "Minted a new session");
    }

    let set_cookie = context.is_new.then(|| {
        session_cookie(
            &settings.cookie_name,
            &context.key,
            settings.ttl,
            settings.secure,
        )
    });

    request.extensions_mut().insert(context);
    let mut response = next.run(request).await;

    if let Some(cookie) = set_cookie {
        // A handler that ended or rotated the session already set its own cookie.
        if !response.headers().contains_key(SET_COOKIE) {
            let value = HeaderValue::from_str(&cookie).map_err(anyhow::Error::from)?;
            response.headers_mut().append(SET_COOKIE, value);
        }
    }

    Ok(response)
}
