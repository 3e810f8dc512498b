//! Adding, updating and removing cart lines.

use serde_json::Value;
use tracing::info;

use super::{
    engine::CartEngine, errors::CartError, models::CartView, retry::retry_on_conflict,
    store::CartStore,
};
use crate::{
    catalog::Catalog,
    sessions::{SessionContext, SessionStore},
};

/// Parses a quantity that may arrive as a JSON number or a numeric string.
pub fn parse_quantity(value: &Value) -> Result<i64, CartError> {
    let parsed = match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    };

    parsed.ok_or_else(|| CartError::InvalidArgument(format!("quantity {value} is not an integer")))
}

fn positive_quantity(quantity: i64) -> Result<i32, CartError> {
    if quantity <= 0 {
        return Err(CartError::InvalidArgument(
            "quantity must be positive".into(),
        ));
    }

    i32::try_from(quantity)
        .map_err(|_| CartError::InvalidArgument(format!("quantity {quantity} is too large")))
}

impl<S> CartEngine<'_, S>
where
    S: CartStore + SessionStore + Catalog + ?Sized,
{
    /// Adds `quantity` units of a product to the caller's cart. Adding a
    /// product that is already in the cart increments its line.
    pub async fn add(
        &self,
        session: &SessionContext,
        product_id: i32,
        quantity: i64,
    ) -> Result<CartView, CartError> {
        let quantity = positive_quantity(quantity)?;

        let product = self
            .store
            .get_product(product_id)
            .await?
            .ok_or(CartError::NotFound("Product"))?;

        let view = retry_on_conflict(self.attempts, || async {
            let cart = self.resolve_once(session).await?;
            self.store.add_item(cart.id, product.id, quantity).await?;
            self.snapshot(cart.id).await
        })
        .await?;

        info!(cart_id = view.id, product_id, quantity, "Added product to cart");

        Ok(view)
    }
}

impl<S> CartEngine<'_, S>
where
    S: CartStore + SessionStore + ?Sized,
{
    /// Removes a line from the caller's cart. A line of any other cart is
    /// reported as `NotFound`.
    pub async fn remove(
        &self,
        session: &SessionContext,
        item_id: i32,
    ) -> Result<CartView, CartError> {
        let view = retry_on_conflict(self.attempts, || async {
            let cart = self.resolve_once(session).await?;
            self.store.remove_item(cart.id, item_id).await?;
            self.snapshot(cart.id).await
        })
        .await?;

        info!(cart_id = view.id, item_id, "Removed cart item");

        Ok(view)
    }

    /// Sets the quantity of a line. Zero or a negative amount removes it.
    pub async fn update_quantity(
        &self,
        session: &SessionContext,
        item_id: i32,
        quantity: &Value,
    ) -> Result<CartView, CartError> {
        let quantity = parse_quantity(quantity)?;

        if quantity <= 0 {
            return self.remove(session, item_id).await;
        }

        let quantity = positive_quantity(quantity)?;

        retry_on_conflict(self.attempts, || async {
            let cart = self.resolve_once(session).await?;
            self.store
                .set_item_quantity(cart.id, item_id, quantity)
                .await?;
            self.snapshot(cart.id).await
        })
        .await
    }
}
