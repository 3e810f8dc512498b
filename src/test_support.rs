//! Helpers shared by the unit tests.

use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::{
    app::config::{Config, StorageBackend},
    carts::CartStore,
    mailer::{Email, Mailer},
    sessions::{SessionContext, SessionStore, default_session_ttl},
    store::memory::MemoryStore,
};

/// In-memory configuration with the cheapest bcrypt cost.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.storage = StorageBackend::Memory;
    config.auth.bcrypt_cost = 4;
    config
}

/// Keeps every email instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Email>>,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().expect("mailer lock").clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: Email) -> Result<()> {
        self.sent.lock().expect("mailer lock").push(email);
        Ok(())
    }
}

/// A fresh anonymous visitor.
pub async fn anonymous(store: &MemoryStore) -> Result<SessionContext> {
    let ensured = store.ensure_session(None, default_session_ttl()).await?;
    Ok(SessionContext::from_session(ensured.session, ensured.created))
}

/// A fresh session already bound to `user_id`, as after a login.
pub async fn authenticated(store: &MemoryStore, user_id: i32) -> Result<SessionContext> {
    let visitor = anonymous(store).await?;
    login_without_merge(store, &visitor, user_id).await
}

/// Binds `user_id` to the visitor's session the way a login does, but
/// without the login merge.
pub async fn login_without_merge(
    store: &MemoryStore,
    visitor: &SessionContext,
    user_id: i32,
) -> Result<SessionContext> {
    let key = store
        .rotate_session(&visitor.key, Some(user_id), default_session_ttl())
        .await?;
    let ensured = store.ensure_session(Some(&key), default_session_ttl()).await?;
    Ok(SessionContext::from_session(ensured.session, false))
}

/// `(product_id, quantity)` of every line of a cart, in insertion order.
pub async fn line_quantities(store: &MemoryStore, cart_id: i32) -> Result<Vec<(i32, i32)>> {
    let (_, lines) = store
        .load_cart(cart_id)
        .await?
        .with_context(|| format!("cart {cart_id} does not exist"))?;

    Ok(lines
        .into_iter()
        .map(|line| (line.item.product_id, line.item.quantity))
        .collect())
}
