//! Sessions and caller identity.

pub mod purge;
pub mod resolver;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub use purge::spawn_session_purge;
pub use resolver::{SessionContext, session_middleware};

/// Two weeks, the lifetime of a session that is never rotated.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 14 * 24 * 60 * 60;

pub fn default_session_ttl() -> TimeDelta {
    TimeDelta::seconds(DEFAULT_SESSION_TTL_SECS)
}

/// Opaque, server-issued session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    const LEN: usize = 32;

    /// Mints a fresh random key.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Accepts a key only if it has the shape of one we minted.
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == Self::LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Anonymous(SessionKey),
    Authenticated(i32),
}

impl Identity {
    pub fn user_id(&self) -> Option<i32> {
        match self {
            Identity::Authenticated(user_id) => Some(*user_id),
            Identity::Anonymous(_) => None,
        }
    }
}

/// A stored session record.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: SessionKey,
    pub user_id: Option<i32>,
    pub data: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn identity(&self) -> Identity {
        match self.user_id {
            Some(user_id) => Identity::Authenticated(user_id),
            None => Identity::Anonymous(self.key.clone()),
        }
    }
}

/// Result of [`SessionStore::ensure_session`].
#[derive(Debug, Clone)]
pub struct EnsuredSession {
    pub session: Session,
    pub created: bool,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the live session for `key`, or creates one living for `ttl`
    /// under a newly minted key when `key` is absent, unknown or expired. An
    /// expired session is deleted together with its carts.
    async fn ensure_session(
        &self,
        key: Option<&SessionKey>,
        ttl: TimeDelta,
    ) -> Result<EnsuredSession>;

    /// Moves the session under a newly minted key, binds `user_id` to it and
    /// restarts its lifetime. Data and carts bound to the session follow it;
    /// the old key stops resolving.
    async fn rotate_session(
        &self,
        key: &SessionKey,
        user_id: Option<i32>,
        ttl: TimeDelta,
    ) -> Result<SessionKey>;

    async fn get_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>>;

    async fn set_session_value(&self, key: &SessionKey, name: &str, value: Value) -> Result<()>;

    /// Removes `name` from the session, returning the previous value.
    async fn take_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>>;

    /// Deletes the session. Carts still bound to it are deleted with it.
    async fn delete_session(&self, key: &SessionKey) -> Result<()>;

    /// Deletes every expired session and its carts, returning how many went.
    async fn purge_expired_sessions(&self) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_keys_parse_back() {
        let key = SessionKey::mint();
        assert_eq!(SessionKey::parse(key.as_str()), Some(key));
    }

    #[test]
    fn foreign_keys_are_rejected() {
        assert!(SessionKey::parse("").is_none());
        assert!(SessionKey::parse("not-a-session-key").is_none());
        assert!(SessionKey::parse("ABCDEF0123456789ABCDEF0123456789").is_none());
        assert!(SessionKey::parse("0123456789abcdef0123456789abcdef0").is_none());
    }

    #[test]
    fn identity_follows_bound_user() {
        let key = SessionKey::mint();
        let mut session = Session {
            key: key.clone(),
            user_id: None,
            data: Map::new(),
            created_at: Utc::now(),
            expires_at: Utc::now() + default_session_ttl(),
        };
        assert_eq!(session.identity(), Identity::Anonymous(key));

        session.user_id = Some(7);
        assert_eq!(session.identity(), Identity::Authenticated(7));
    }

    #[test]
    fn session_expires_at_its_deadline() {
        let now = Utc::now();
        let session = Session {
            key: SessionKey::mint(),
            user_id: None,
            data: Map::new(),
            created_at: now,
            expires_at: now + TimeDelta::minutes(5),
        };

        assert!(!session.is_expired(now));
        assert!(session.is_expired(now + TimeDelta::minutes(5)));
    }
}
