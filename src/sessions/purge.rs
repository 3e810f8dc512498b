use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::SessionStore;

/// Deletes expired sessions, and the anonymous carts bound to them, every
/// `every` until the runtime shuts down.
pub fn spawn_session_purge<S>(store: Arc<S>, every: Duration) -> JoinHandle<()>
where
    S: SessionStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);

        loop {
            ticker.tick().await;

            match store.purge_expired_sessions().await {
                Ok(0) => debug!("No expired sessions to purge"),
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(err) => error!("Session purge failed: {err:?}"),
            }
        }
    })
}
