use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper,
    result::{DatabaseErrorKind, Error as DieselError},
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde_json::{Map, Value};

use super::PgStore;
use crate::{
    auth::{AuthError, AuthResult, NewUser, User, UserCredentials, UserStore},
    models::{CreateSessionEntity, CreateUserEntity, SessionEntity, UserEntity},
    schema::{sessions, users},
    sessions::{EnsuredSession, Session, SessionKey, SessionStore},
};

impl TryFrom<SessionEntity> for Session {
    type Error = anyhow::Error;

    fn try_from(entity: SessionEntity) -> Result<Self> {
        let key = SessionKey::parse(&entity.session_key).context("Malformed session key")?;

        Ok(Session {
            key,
            user_id: entity.user_id,
            data: into_map(entity.data),
            created_at: entity.created_at,
            expires_at: entity.expires_at,
        })
    }
}

impl From<UserEntity> for UserCredentials {
    fn from(entity: UserEntity) -> Self {
        UserCredentials {
            user: User {
                id: entity.id,
                email: entity.email,
                phone_number: entity.phone_number,
                address: entity.address,
                is_active: entity.is_active,
                created_at: entity.created_at,
            },
            password_hash: entity.password_hash,
        }
    }
}

fn into_map(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

impl PgStore {
    /// Read-modify-write of the session data under a row lock. Returns what
    /// `edit` returned, or `None` when the session does not exist.
    async fn edit_session_data<T, F>(&self, key: &SessionKey, edit: F) -> Result<Option<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Map<String, Value>) -> T + Send + 'static,
    {
        let conn = &mut self.conn().await?;
        let key = key.as_str().to_string();

        conn.transaction(move |conn| {
            Box::pin(async move {
                let data: Option<Value> = sessions::table
                    .find(&key)
                    .select(sessions::data)
                    .for_update()
                    .get_result(conn)
                    .await
                    .optional()
                    .context("Failed to lock session")?;

                let Some(data) = data else {
                    return Ok::<_, anyhow::Error>(None);
                };

                let mut map = into_map(data);
                let result = edit(&mut map);

                diesel::update(sessions::table.find(&key))
                    .set((
                        sessions::data.eq(Value::Object(map)),
                        sessions::updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)
                    .await
                    .context("Failed to update session")?;

                Ok(Some(result))
            })
        })
        .await
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn ensure_session(
        &self,
        key: Option<&SessionKey>,
        ttl: TimeDelta,
    ) -> Result<EnsuredSession> {
        let conn = &mut self.conn().await?;
        let now = Utc::now();

        if let Some(key) = key {
            let existing: Option<SessionEntity> = sessions::table
                .find(key.as_str())
                .select(SessionEntity::as_select())
                .first(conn)
                .await
                .optional()
                .context("Failed to get session")?;

            match existing {
                Some(existing) if existing.expires_at > now => {
                    return Ok(EnsuredSession {
                        session: existing.try_into()?,
                        created: false,
                    });
                }
                // Anonymous carts bound to it go through ON DELETE CASCADE.
                Some(_) => {
                    diesel::delete(
                        sessions::table
                            .find(key.as_str())
                            .filter(sessions::expires_at.le(now)),
                    )
                    .execute(conn)
                    .await
                    .context("Failed to delete expired session")?;
                }
                None => {}
            }
        }

        let session: SessionEntity = diesel::insert_into(sessions::table)
            .values(CreateSessionEntity {
                session_key: SessionKey::mint().to_string(),
                expires_at: now + ttl,
            })
            .returning(SessionEntity::as_returning())
            .get_result(conn)
            .await
            .context("Failed to create session")?;

        Ok(EnsuredSession {
            session: session.try_into()?,
            created: true,
        })
    }

    async fn rotate_session(
        &self,
        key: &SessionKey,
        user_id: Option<i32>,
        ttl: TimeDelta,
    ) -> Result<SessionKey> {
        let conn = &mut self.conn().await?;
        let now = Utc::now();
        let new_key = SessionKey::mint();

        // Carts bound to the old key follow it through ON UPDATE CASCADE.
        let updated = diesel::update(
            sessions::table
                .find(key.as_str())
                .filter(sessions::expires_at.gt(now)),
        )
        .set((
            sessions::session_key.eq(new_key.as_str()),
            sessions::user_id.eq(user_id),
            sessions::expires_at.eq(now + ttl),
            sessions::updated_at.eq(now),
        ))
        .execute(conn)
        .await
        .context("Failed to rotate session")?;

        if updated == 0 {
            return Err(anyhow!("session does not exist"));
        }

        Ok(new_key)
    }

    async fn get_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>> {
        let conn = &mut self.conn().await?;

        let data: Option<Value> = sessions::table
            .find(key.as_str())
            .select(sessions::data)
            .first(conn)
            .await
            .optional()
            .context("Failed to get session data")?;

        Ok(data.and_then(|data| into_map(data).remove(name)))
    }

    async fn set_session_value(&self, key: &SessionKey, name: &str, value: Value) -> Result<()> {
        let name = name.to_string();

        self.edit_session_data(key, move |data| {
            data.insert(name, value);
        })
        .await?
        .ok_or_else(|| anyhow!("session does not exist"))
    }

    async fn take_session_value(&self, key: &SessionKey, name: &str) -> Result<Option<Value>> {
        let name = name.to_string();

        Ok(self
            .edit_session_data(key, move |data| data.remove(&name))
            .await?
            .flatten())
    }

    async fn delete_session(&self, key: &SessionKey) -> Result<()> {
        let conn = &mut self.conn().await?;

        diesel::delete(sessions::table.find(key.as_str()))
            .execute(conn)
            .await
            .context("Failed to delete session")?;

        Ok(())
    }

    async fn purge_expired_sessions(&self) -> Result<u64> {
        let conn = &mut self.conn().await?;

        let purged = diesel::delete(sessions::table.filter(sessions::expires_at.le(Utc::now())))
            .execute(conn)
            .await
            .context("Failed to purge expired sessions")?;

        Ok(purged as u64)
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn create_user(&self, new: NewUser) -> AuthResult<User> {
        let conn = &mut self.conn().await?;

        let created = diesel::insert_into(users::table)
            .values(CreateUserEntity {
                email: new.email,
                password_hash: new.password_hash,
                phone_number: new.phone_number,
                address: new.address,
                is_active: false,
                activation_token: Some(new.activation_token),
            })
            .returning(UserEntity::as_returning())
            .get_result(conn)
            .await;

        match created {
            Ok(entity) => Ok(UserCredentials::from(entity).user),
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                Err(AuthError::EmailTaken)
            }
            Err(err) => Err(AuthError::Other(
                anyhow::Error::from(err).context("Failed to create user"),
            )),
        }
    }

    async fn find_user(&self, id: i32) -> Result<Option<User>> {
        let conn = &mut self.conn().await?;

        let user: Option<UserEntity> = users::table
            .find(id)
            .select(UserEntity::as_select())
            .first(conn)
            .await
            .optional()
            .context("Failed to get user")?;

        Ok(user.map(|entity| UserCredentials::from(entity).user))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserCredentials>> {
        let conn = &mut self.conn().await?;

        let user: Option<UserEntity> = users::table
            .filter(users::email.eq(email))
            .select(UserEntity::as_select())
            .first(conn)
            .await
            .optional()
            .context("Failed to get user by email")?;

        Ok(user.map(UserCredentials::from))
    }

    async fn activate_user(&self, id: i32, token: &str) -> Result<Option<User>> {
        let conn = &mut self.conn().await?;

        let user: Option<UserEntity> = diesel::update(
            users::table
                .find(id)
                .filter(users::is_active.eq(false))
                .filter(users::activation_token.eq(token)),
        )
        .set((
            users::is_active.eq(true),
            users::activation_token.eq(None::<String>),
        ))
        .returning(UserEntity::as_returning())
        .get_result(conn)
        .await
        .optional()
        .context("Failed to activate user")?;

        Ok(user.map(|entity| UserCredentials::from(entity).user))
    }

    async fn delete_user(&self, id: i32) -> Result<bool> {
        let conn = &mut self.conn().await?;

        // Sessions, carts and orders go with the user through ON DELETE CASCADE.
        let deleted = diesel::delete(users::table.find(id))
            .execute(conn)
            .await
            .context("Failed to delete user")?;

        Ok(deleted > 0)
    }
}
