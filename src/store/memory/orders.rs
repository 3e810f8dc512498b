use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;

use super::MemoryStore;
use crate::{
    carts::{
        CartError,
        models::{CartLine, CartOwner},
    },
    money,
    orders::{Order, OrderItem, OrderStatus, OrderStore},
};

#[async_trait]
impl OrderStore for MemoryStore {
    async fn place_order(&self, user_id: i32, cart_id: i32) -> Result<Order, CartError> {
        let mut tables = self.tables();

        let cart = tables.carts.get(&cart_id).ok_or(CartError::Conflict)?;
        if cart.owner != CartOwner::User(user_id) {
            return Err(CartError::NotFound("Cart"));
        }

        let lines = tables.lines(cart_id)?;
        if lines.is_empty() {
            return Err(CartError::InvalidArgument("cart is empty".into()));
        }

        let total_minor = money::sum(lines.iter().map(CartLine::price_minor))
            .ok_or_else(|| anyhow!("order total overflows"))?;

        let order = Order {
            id: tables.next_id(),
            user_id,
            status: OrderStatus::Processing,
            total_minor,
            created_at: Utc::now(),
            items: lines
                .into_iter()
                .map(|line| OrderItem {
                    product_id: line.item.product_id,
                    product_name: line.product_name,
                    quantity: line.item.quantity,
                    unit_price_minor: line.unit_price_minor,
                })
                .collect(),
        };
        tables.orders.insert(order.id, order.clone());

        tables.cart_items.retain(|_, item| item.cart_id != cart_id);
        tables.recompute_total(cart_id)?;

        Ok(order)
    }

    async fn orders_for_user(&self, user_id: i32) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self
            .tables()
            .orders
            .values()
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect();

        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(orders)
    }

    async fn order_for_user(&self, user_id: i32, order_id: i32) -> Result<Option<Order>> {
        Ok(self
            .tables()
            .orders
            .get(&order_id)
            .filter(|order| order.user_id == user_id)
            .cloned())
    }
}
