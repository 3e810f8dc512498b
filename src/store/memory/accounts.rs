use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use serde_json::{Map, Value};

use super::MemoryStore;
use crate::{
    auth::{AuthError, AuthResult, NewUser, User, UserCredentials, UserStore},
    carts::models::CartOwner,
    sessions::{EnsuredSession, Session, SessionKey, SessionStore},
};

#[async_trait]
impl SessionStore for MemoryStore {
    async fn ensure_session(
        &self,
        key: Option<&SessionKey>,
        ttl: TimeDelta,
    ) -> Result<EnsuredSession> {
        let mut tables = self.tables();
        let now = Utc::now();

        if let Some(key) = key {
            match tables.sessions.get(key) {
                Some(session) if !session.is_expired(now) => {
                    return Ok(EnsuredSession {
                        session: session.clone(),
                        created: false,
                    });
                }
                Some(_) => tables.delete_session(key),
                None => {}
            }
        }

        let key = tables.mint_session_key();
        let session = Session {
            key: key.clone(),
            user_id: None,
            data: Map::new(),
            created_at: now,
            expires_at: now + ttl,
        };
        tables.sessions.insert(key, session.clone());

        Ok(EnsuredSession {
            session,
            created: true,
        })
    }

    async fn rotate_session(
        &self,
        key: &SessionKey,
        user_id: Option<i32>,
        ttl: TimeDelta,
    ) -> Result<SessionKey> {
        let mut tables = self.tables();
        let now = Utc::now();

        if let Some(user_id) = user_id {
            if !tables.users.contains_key(&user_id) {
                return Err(anyhow!("user {user_id} does not exist"));
            }
        }

        let live = tables
            .sessions
            .get(key)
            .is_some_and(|session| !session.is_expired(now));
        if !live {
            return Err(anyhow!("session does not exist"));
        }

        let new_key = tables.mint_session_key();
        let mut session = tables
            .sessions
            .remove(key)
            .ok_or_else(|| anyhow!("session does not exist"))?;
        session.key = new_key.clone();
        session.user_id = user_id;
        session.expires_at = now + ttl;
        tables.sessions.insert(new_key.clone(), session);

        for cart in tables.carts.values_mut() {
            if matches!(&cart.owner, CartOwner::Session(owner) if owner == key) {
                cart.owner = CartOwner::Session(new_key.clone());
            }
        }

        Ok(new_key)
    }

    async fn get_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>> {
        Ok(self
            .tables()
            .sessions
            .get(key)
            .and_then(|session| session.data.get(name).cloned()))
    }

    async fn set_session_value(&self, key: &SessionKey, name: &str, value: Value) -> Result<()> {
        let mut tables = self.tables();

        let session = tables
            .sessions
            .get_mut(key)
            .ok_or_else(|| anyhow!("session does not exist"))?;
        session.data.insert(name.to_string(), value);

        Ok(())
    }

    async fn take_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>> {
        Ok(self
            .tables()
            .sessions
            .get_mut(key)
            .and_then(|session| session.data.remove(name)))
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        self.tables().delete_session(key);
        Ok(())
    }

    async fn purge_expired_sessions(&self) -> Result<u64> {
        let mut tables = self.tables();
        let now = Utc::now();

        let expired: Vec<SessionKey> = tables
            .sessions
            .values()
            .filter(|session| session.is_expired(now))
            .map(|session| session.key.clone())
            .collect();
        for key in &expired {
            tables.delete_session(key);
        }

        Ok(expired.len() as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, new: NewUser) -> AuthResult<User> {
        let mut tables = self.tables();

        if tables
            .users
            .values()
            .any(|credentials| credentials.user.email == new.email)
        {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            id: tables.next_id(),
            email: new.email,
            phone_number: new.phone_number,
            address: new.address,
            is_active: false,
            created_at: Utc::now(),
        };
        tables
            .activation_tokens
            .insert(user.id, new.activation_token);
        tables.users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );

        Ok(user)
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>> {
        Ok(self
            .tables()
            .users
            .get(&id)
            .map(|credentials| credentials.user.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        Ok(self
            .tables()
            .users
            .values()
            .find(|credentials| credentials.user.email == email)
            .cloned())
    }

    async fn activate_user(&self, id: i32, token: &str) -> Result<Option<User>> {
        let mut tables = self.tables();

        if tables.activation_tokens.get(&id).map(String::as_str) != Some(token) {
            return Ok(None);
        }

        let Some(credentials) = tables.users.get_mut(&id) else {
            return Ok(None);
        };
        credentials.user.is_active = true;
        let user = credentials.user.clone();
        tables.activation_tokens.remove(&id);

        Ok(Some(user))
    }

    async fn delete_user(&self, id: i32) -> Result<bool> {
        let mut tables = self.tables();

        if tables.users.remove(&id).is_none() {
            return Ok(false);
        }
        tables.activation_tokens.remove(&id);

        let sessions: Vec<SessionKey> = tables
            .sessions
            .values()
            .filter(|session| session.user_id == Some(id))
            .map(|session| session.key.clone())
            .collect();
        for key in &sessions {
            tables.delete_session(key);
        }

        tables.delete_carts_where(|owner| *owner == CartOwner::User(id));
        tables.orders.retain(|_, order| order.user_id != id);

        Ok(true)
    }
}
