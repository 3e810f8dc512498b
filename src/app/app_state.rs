use std::sync::Arc;

use crate::{
    app::config::Config,
    auth::AuthService,
    carts::CartEngine,
    mailer::{Mailer, TracingMailer},
    store::Store,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub mailer: Arc<dyn Mailer>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            mailer: Arc::new(TracingMailer),
            config: Arc::new(config),
        }
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }

    /// Cart engine bound to this state's store and retry policy.
    pub fn carts(&self) -> CartEngine<'_, dyn Store> {
        CartEngine::new(self.store.as_ref())
            .with_conflict_attempts(self.config.carts.conflict_attempts)
    }

    pub fn auth(&self) -> AuthService<'_, dyn Store> {
        AuthService::new(self.store.as_ref(), self.mailer.as_ref(), &self.config)
    }
}
