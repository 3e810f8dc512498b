use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};

use super::{
    PgStore,
    carts::{load_lines, lock_cart, recompute},
};
use crate::{
    carts::{CartError, models::CartLine},
    models::{CreateOrderEntity, CreateOrderItemEntity, OrderEntity, OrderItemEntity},
    money,
    orders::{Order, OrderItem, OrderStatus, OrderStore},
    schema::{cart_items, order_items, orders},
};

fn into_order(entity: OrderEntity, items: Vec<OrderItemEntity>) -> Result<Order> {
    Ok(Order {
        id: entity.id,
        user_id: entity.user_id,
        status: entity.status.parse()?,
        total_minor: entity.total_minor,
        created_at: entity.created_at,
        items: items
            .into_iter()
            .map(|item| OrderItem {
                product_id: item.product_id,
                product_name: item.product_name,
                quantity: item.quantity,
                unit_price_minor: item.unit_price_minor,
            })
            .collect(),
    })
}

#[async_trait]
impl OrderStore for PgStore {
    async fn place_order(&self, user_id: i32, cart_id: i32) -> Result<Order, CartError> {
        let conn = &mut self.conn().await?;

        conn.transaction(|conn| {
            Box::pin(async move {
                let cart = lock_cart(conn, cart_id).await?;
                if cart.user_id != Some(user_id) {
                    return Err(CartError::NotFound("Cart"));
                }

                let lines = load_lines(conn, cart_id).await?;
                if lines.is_empty() {
                    return Err(CartError::InvalidArgument("cart is empty".into()));
                }

                let total_minor = money::sum(lines.iter().map(CartLine::price_minor))
                    .ok_or_else(|| anyhow!("order total overflows"))?;

                let order: OrderEntity = diesel::insert_into(orders::table)
                    .values(CreateOrderEntity {
                        user_id,
                        status: OrderStatus::Processing.to_string(),
                        total_minor,
                    })
                    .returning(OrderEntity::as_returning())
                    .get_result(conn)
                    .await?;

                let items: Vec<CreateOrderItemEntity> = lines
                    .into_iter()
                    .map(|line| CreateOrderItemEntity {
                        order_id: order.id,
                        product_id: line.item.product_id,
                        product_name: line.product_name,
                        quantity: line.item.quantity,
                        unit_price_minor: line.unit_price_minor,
                    })
                    .collect();

                let items: Vec<OrderItemEntity> = diesel::insert_into(order_items::table)
                    .values(items)
                    .returning(OrderItemEntity::as_returning())
                    .get_results(conn)
                    .await?;

                diesel::delete(cart_items::table.filter(cart_items::cart_id.eq(cart_id)))
                    .execute(conn)
                    .await?;
                recompute(conn, cart_id).await?;

                Ok::<_, CartError>(into_order(order, items)?)
            })
        })
        .await
    }

    async fn orders_for_user(&self, user_id: i32) -> Result<Vec<Order>> {
        let conn = &mut self.conn().await?;

        let orders: Vec<OrderEntity> = orders::table
            .filter(orders::user_id.eq(user_id))
            .order_by((orders::created_at.desc(), orders::id.desc()))
            .select(OrderEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get orders")?;

        let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();

        let items: Vec<OrderItemEntity> = order_items::table
            .filter(order_items::order_id.eq_any(&order_ids))
            .order_by(order_items::id.asc())
            .select(OrderItemEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get order items")?;

        let mut group: HashMap<i32, Vec<OrderItemEntity>> = HashMap::new();
        for item in items {
            group.entry(item.order_id).or_default().push(item);
        }

        orders
            .into_iter()
            .map(|order| {
                let items = group.remove(&order.id).unwrap_or_default();
                into_order(order, items)
            })
            .collect()
    }

    async fn order_for_user(&self, user_id: i32, order_id: i32) -> Result<Option<Order>> {
        let conn = &mut self.conn().await?;

        let order: Option<OrderEntity> = orders::table
            .find(order_id)
            .filter(orders::user_id.eq(user_id))
            .select(OrderEntity::as_select())
            .first(conn)
            .await
            .optional()
            .context("Failed to get order")?;

        let Some(order) = order else {
            return Ok(None);
        };

        let items: Vec<OrderItemEntity> = order_items::table
            .filter(order_items::order_id.eq(order.id))
            .order_by(order_items::id.asc())
            .select(OrderItemEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get order items")?;

        into_order(order, items).map(Some)
    }
}
