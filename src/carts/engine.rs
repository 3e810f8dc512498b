//! Cart resolution and merging.
//!
//! A request never carries its cart around implicitly. Handlers ask the
//! engine for the cart of their [`SessionContext`] and thread the returned
//! value through whatever they do next.
//!
//! Resolution has three outcomes:
//!
//! 1. authenticated caller without a leftover session cart: the user's cart;
//! 2. authenticated caller whose session still owns a cart: that cart is
//!    merged into the user's cart first (this runs on every lookup, so the
//!    merge must tolerate a source that is already gone);
//! 3. anonymous caller: the session's cart.

use serde_json::Value;
use tracing::{debug, info};

use super::{
    errors::CartError,
    models::{Cart, CartLine, CartOwner, CartView, MergeOutcome},
    retry::retry_on_conflict,
    store::CartStore,
};
use crate::{
    money,
    sessions::{Identity, SessionContext, SessionKey, SessionStore},
};

/// Session entry remembering which anonymous cart a visitor was using, so a
/// login can pick it up.
pub const PENDING_CART_KEY: &str = "anonymous_cart_id";

pub const DEFAULT_CONFLICT_ATTEMPTS: u32 = 3;

pub struct CartEngine<'s, S: ?Sized> {
    pub(super) store: &'s S,
    pub(super) attempts: u32,
}

impl<'s, S> CartEngine<'s, S>
where
    S: CartStore + SessionStore + ?Sized,
{
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            attempts: DEFAULT_CONFLICT_ATTEMPTS,
        }
    }

    /// How many times a conflicting unit of work is attempted in total.
    pub fn with_conflict_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn conflict_attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the one authoritative cart for the caller.
    pub async fn resolve(&self, session: &SessionContext) -> Result<Cart, CartError> {
        retry_on_conflict(self.attempts, || self.resolve_once(session)).await
    }

    /// Resolves the caller's cart and reads it with its lines.
    pub async fn current(&self, session: &SessionContext) -> Result<CartView, CartError> {
        retry_on_conflict(self.attempts, || async {
            let cart = self.resolve_once(session).await?;
            self.snapshot(cart.id).await
        })
        .await
    }

    /// Merges `source_id` into `destination_id`. A source that no longer
    /// exists is not an error.
    pub async fn merge(
        &self,
        source_id: i32,
        destination_id: i32,
    ) -> Result<MergeOutcome, CartError> {
        if source_id == destination_id {
            return Err(CartError::InvalidArgument(
                "a cart cannot be merged into itself".into(),
            ));
        }

        let outcome = self.store.merge_carts(source_id, destination_id).await?;

        match &outcome {
            MergeOutcome::Merged {
                moved, coalesced, ..
            } => info!(
                source_id,
                destination_id, moved, coalesced, "Merged anonymous cart"
            ),
            MergeOutcome::SourceMissing => {
                debug!(source_id, destination_id, "Merge source already gone")
            }
        }

        Ok(outcome)
    }

    /// Login entry point, called by the authentication flow right after the
    /// user has been bound to the session.
    ///
    /// The remembered anonymous cart id is cleared from the session whether
    /// or not a cart is found under it.
    pub async fn merge_on_login(&self, key: &SessionKey, user_id: i32) -> Result<Cart, CartError> {
        let pending = self
            .store
            .take_session_value(key, PENDING_CART_KEY)
            .await?
            .as_ref()
            .and_then(pending_cart_id);

        retry_on_conflict(self.attempts, || async {
            let user_cart = self
                .store
                .get_or_create_cart(&CartOwner::User(user_id))
                .await?;

            let Some(source_id) = pending else {
                return Ok(user_cart);
            };

            // Only a cart without an owning user may be folded in; an id that
            // now points at somebody's account cart is ignored.
            let Some(source) = self.store.find_anonymous_cart(source_id).await? else {
                debug!(source_id, user_id, "No anonymous cart to merge on login");
                return Ok(user_cart);
            };

            match self.merge(source.id, user_cart.id).await? {
                MergeOutcome::Merged { cart, .. } => Ok(cart),
                MergeOutcome::SourceMissing => Ok(user_cart),
            }
        })
        .await
    }

    /// One resolution attempt, for callers that run their own conflict retry
    /// around a larger unit of work.
    pub(crate) async fn resolve_once(&self, session: &SessionContext) -> Result<Cart, CartError> {
        match &session.identity {
            Identity::Anonymous(key) => {
                let cart = self
                    .store
                    .get_or_create_cart(&CartOwner::Session(key.clone()))
                    .await?;
                self.remember_pending(key, cart.id).await?;
                Ok(cart)
            }
            Identity::Authenticated(user_id) => {
                let cart = self
                    .store
                    .get_or_create_cart(&CartOwner::User(*user_id))
                    .await?;

                let leftover = self
                    .store
                    .find_cart_by_owner(&CartOwner::Session(session.key.clone()))
                    .await?;

                let Some(leftover) = leftover else {
                    return Ok(cart);
                };

                let outcome = self.merge(leftover.id, cart.id).await?;
                self.store
                    .take_session_value(&session.key, PENDING_CART_KEY)
                    .await?;

                match outcome {
                    MergeOutcome::Merged { cart, .. } => Ok(cart),
                    MergeOutcome::SourceMissing => Ok(cart),
                }
            }
        }
    }

    /// A cart that vanished between resolution and reading was merged away by
    /// a concurrent request: resolving again will find its successor.
    ///
    /// A cached total that no longer matches the lines (a price changed since
    /// the last mutation) is recomputed before the cart is shown.
    pub(super) async fn snapshot(&self, cart_id: i32) -> Result<CartView, CartError> {
        let (cart, lines) = self
            .store
            .load_cart(cart_id)
            .await?
            .ok_or(CartError::Conflict)?;

        if money::sum(lines.iter().map(CartLine::price_minor)) == Some(cart.total_minor) {
            return Ok(CartView::new(&cart, lines));
        }

        debug!(cart_id, stale_total = cart.total_minor, "Recomputing stale cart total");
        self.store
            .recompute_total(cart_id)
            .await
            .map_err(|err| match err {
                CartError::NotFound(_) => CartError::Conflict,
                other => other,
            })?;

        let (cart, lines) = self
            .store
            .load_cart(cart_id)
            .await?
            .ok_or(CartError::Conflict)?;

        Ok(CartView::new(&cart, lines))
    }

    async fn remember_pending(&self, key: &SessionKey, cart_id: i32) -> Result<(), CartError> {
        let remembered = self
            .store
            .get_session_value(key, PENDING_CART_KEY)
            .await?
            .as_ref()
            .and_then(pending_cart_id);

        if remembered != Some(cart_id) {
            self.store
                .set_session_value(key, PENDING_CART_KEY, Value::from(cart_id))
                .await?;
        }

        Ok(())
    }
}

fn pending_cart_id(value: &Value) -> Option<i32> {
    value.as_i64().and_then(|id| i32::try_from(id).ok())
}
