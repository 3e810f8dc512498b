//! Cart persistence port.

use async_trait::async_trait;

use super::{
    errors::CartError,
    models::{Cart, CartItem, CartLine, CartOwner, MergeOutcome},
};

/// Every method is a single atomic unit of work. Implementations recompute
/// the cart total inside the same unit as the write that changed the lines.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Returns the cart owned by `owner`, creating an empty one if absent.
    /// An owner that does not exist (a session deleted concurrently) is a
    /// [`CartError::Conflict`].
    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart, CartError>;

    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, CartError>;

    /// Fetches a cart by id, but only if no user owns it.
    async fn find_anonymous_cart(&self, id: i32) -> Result<Option<Cart>, CartError>;

    /// Reads a cart and its lines as one consistent snapshot.
    async fn load_cart(&self, id: i32) -> Result<Option<(Cart, Vec<CartLine>)>, CartError>;

    /// Adds `quantity` units of a product, incrementing an existing line for
    /// the same product. Fails with `NotFound` for an unknown product and with
    /// `Conflict` when the cart disappeared underneath the call.
    async fn add_item(
        &self,
        cart_id: i32,
        product_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError>;

    /// Overwrites the quantity of a line that belongs to `cart_id`.
    async fn set_item_quantity(
        &self,
        cart_id: i32,
        item_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError>;

    /// Deletes a line that belongs to `cart_id`.
    async fn remove_item(&self, cart_id: i32, item_id: i32) -> Result<(), CartError>;

    /// Moves every line of `source_id` into `destination_id`, summing the
    /// quantities of lines for the same product, then deletes the source.
    /// A missing source yields [`MergeOutcome::SourceMissing`].
    async fn merge_carts(
        &self,
        source_id: i32,
        destination_id: i32,
    ) -> Result<MergeOutcome, CartError>;

    /// Recomputes the total from scratch and persists it.
    async fn recompute_total(&self, cart_id: i32) -> Result<Cart, CartError>;
}
