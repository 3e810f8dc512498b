use anyhow::Result;
use storefront::{
    app::{app_state::AppState, bootstrap, config},
    routes,
    sessions::spawn_session_purge,
    store,
};

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;
    tracing::info!("Opening {} store...", config.storage);
    let store = store::open(&config).await?;

    let state = AppState::new(store, config);
    spawn_session_purge(state.store.clone(), state.config.session.purge_interval);
    let app = routes::app(&state);

    tracing::info!("Bootstrapping...");
    bootstrap::serve("Storefront", app, state).await
}
