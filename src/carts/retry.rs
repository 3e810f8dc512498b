use std::future::Future;

use tracing::warn;

use super::errors::CartError;

/// Runs `op` until it stops failing with [`CartError::Conflict`], at most
/// `attempts` times. The last conflict is returned to the caller.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> Result<T, CartError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CartError>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_conflict() && attempt < attempts => {
                warn!(attempt, attempts, "Cart write conflicted, retrying");
                attempt += 1;
            }
            result => return result,
        }
    }
}
