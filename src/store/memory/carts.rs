use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use super::MemoryStore;
use crate::carts::{
    CartError, CartStore,
    models::{Cart, CartItem, CartLine, CartOwner, MergeOutcome},
};

#[async_trait]
impl CartStore for MemoryStore {
    async fn get_or_create_cart(&self, owner: &CartOwner) -> Result<Cart, CartError> {
        let mut tables = self.tables();

        if let Some(cart) = tables.cart_by_owner(owner) {
            return Ok(cart.clone());
        }

        if !tables.owner_exists(owner) {
            return Err(CartError::Conflict);
        }

        let now = Utc::now();
        let cart = Cart {
            id: tables.next_id(),
            owner: owner.clone(),
            total_minor: 0,
            created_at: now,
            updated_at: now,
        };
        tables.carts.insert(cart.id, cart.clone());

        Ok(cart)
    }

    async fn find_cart_by_owner(&self, owner: &CartOwner) -> Result<Option<Cart>, CartError> {
        Ok(self.tables().cart_by_owner(owner).cloned())
    }

    async fn find_anonymous_cart(&self, id: i32) -> Result<Option<Cart>, CartError> {
        Ok(self
            .tables()
            .carts
            .get(&id)
            .filter(|cart| matches!(cart.owner, CartOwner::Session(_)))
            .cloned())
    }

    async fn load_cart(&self, id: i32) -> Result<Option<(Cart, Vec<CartLine>)>, CartError> {
        let tables = self.tables();

        let Some(cart) = tables.carts.get(&id) else {
            return Ok(None);
        };

        Ok(Some((cart.clone(), tables.lines(id)?)))
    }

    async fn add_item(
        &self,
        cart_id: i32,
        product_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError> {
        let mut tables = self.tables();

        if !tables.carts.contains_key(&cart_id) {
            return Err(CartError::Conflict);
        }
        if !tables.products.contains_key(&product_id) {
            return Err(CartError::NotFound("Product"));
        }

        let existing = tables
            .cart_items
            .values_mut()
            .find(|item| item.cart_id == cart_id && item.product_id == product_id);

        let item = match existing {
            Some(item) => {
                item.quantity = item.quantity.checked_add(quantity).ok_or_else(|| {
                    CartError::InvalidArgument("quantity would overflow".into())
                })?;
                item.clone()
            }
            None => {
                let item = CartItem {
                    id: tables.next_id(),
                    cart_id,
                    product_id,
                    quantity,
                    added_at: Utc::now(),
                };
                tables.cart_items.insert(item.id, item.clone());
                item
            }
        };

        tables.recompute_total(cart_id)?;

        Ok(item)
    }

    async fn set_item_quantity(
        &self,
        cart_id: i32,
        item_id: i32,
        quantity: i32,
    ) -> Result<CartItem, CartError> {
        let mut tables = self.tables();

        if !tables.carts.contains_key(&cart_id) {
            return Err(CartError::Conflict);
        }

        let item = tables
            .cart_items
            .get_mut(&item_id)
            .filter(|item| item.cart_id == cart_id)
            .ok_or(CartError::NotFound("Cart item"))?;
        item.quantity = quantity;
        let item = item.clone();

        tables.recompute_total(cart_id)?;

        Ok(item)
    }

    async fn remove_item(&self, cart_id: i32, item_id: i32) -> Result<(), CartError> {
        let mut tables = self.tables();

        if !tables.carts.contains_key(&cart_id) {
            return Err(CartError::Conflict);
        }

        let belongs = tables
            .cart_items
            .get(&item_id)
            .is_some_and(|item| item.cart_id == cart_id);
        if !belongs {
            return Err(CartError::NotFound("Cart item"));
        }

        tables.cart_items.remove(&item_id);
        tables.recompute_total(cart_id)?;

        Ok(())
    }

    async fn merge_carts(
        &self,
        source_id: i32,
        destination_id: i32,
    ) -> Result<MergeOutcome, CartError> {
        let mut tables = self.tables();

        if !tables.carts.contains_key(&source_id) {
            return Ok(MergeOutcome::SourceMissing);
        }
        if !tables.carts.contains_key(&destination_id) {
            return Err(CartError::Conflict);
        }

        let source_items: Vec<CartItem> = tables
            .cart_items
            .values()
            .filter(|item| item.cart_id == source_id)
            .cloned()
            .collect();

        let (mut moved, mut coalesced) = (0, 0);

        for source_item in source_items {
            let target = tables.cart_items.values_mut().find(|item| {
                item.cart_id == destination_id && item.product_id == source_item.product_id
            });

            match target {
                Some(target) => {
                    target.quantity = target
                        .quantity
                        .checked_add(source_item.quantity)
                        .ok_or_else(|| anyhow!("merged quantity overflows"))?;
                    tables.cart_items.remove(&source_item.id);
                    coalesced += 1;
                }
                None => {
                    if let Some(item) = tables.cart_items.get_mut(&source_item.id) {
                        item.cart_id = destination_id;
                    }
                    moved += 1;
                }
            }
        }

        tables.delete_cart(source_id);
        let cart = tables.recompute_total(destination_id)?;

        Ok(MergeOutcome::Merged {
            cart,
            moved,
            coalesced,
        })
    }

    async fn recompute_total(&self, cart_id: i32) -> Result<Cart, CartError> {
        self.tables().recompute_total(cart_id)
    }
}
