//! Checkout and order history.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    carts::{CartEngine, CartError, CartStore, retry_on_conflict},
    money,
    sessions::{SessionContext, SessionStore},
};

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Processing,
    Shipping,
    Delivered,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Processing => "processing",
            OrderStatus::Shipping => "shipping",
            OrderStatus::Delivered => "delivered",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(OrderStatus::Processing),
            "shipping" => Ok(OrderStatus::Shipping),
            "delivered" => Ok(OrderStatus::Delivered),
            other => Err(anyhow!("unknown order status `{other}`")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: i32,
    pub user_id: i32,
    pub status: OrderStatus,
    pub total_minor: i64,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price_minor: i64,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct OrderView {
    pub id: i32,
    pub status: OrderStatus,
    #[schema(value_type = String, example = "42.50")]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderItemView>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct OrderItemView {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String, example = "8.50")]
    pub unit_price: Decimal,
}

impl From<Order> for OrderView {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            status: order.status,
            total: money::to_decimal(order.total_minor),
            created_at: order.created_at,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemView {
                    product_id: item.product_id,
                    unit_price: money::to_decimal(item.unit_price_minor),
                    product_name: item.product_name,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Turns the cart's lines into an order for `user_id` and empties the
    /// cart, atomically. An empty cart is `InvalidArgument`.
    async fn place_order(&self, user_id: i32, cart_id: i32) -> Result<Order, CartError>;

    /// Newest first.
    async fn orders_for_user(&self, user_id: i32) -> Result<Vec<Order>>;

    async fn order_for_user(&self, user_id: i32, order_id: i32) -> Result<Option<Order>>;
}

/// Places an order from the authenticated caller's cart.
pub async fn checkout<S>(
    carts: &CartEngine<'_, S>,
    store: &S,
    session: &SessionContext,
) -> Result<Order, CartError>
where
    S: CartStore + SessionStore + OrderStore + ?Sized,
{
    let user_id = session
        .user_id()
        .ok_or_else(|| CartError::InvalidArgument("checkout requires a logged in user".into()))?;

    let order = retry_on_conflict(carts.conflict_attempts(), || async {
        let cart = carts.resolve_once(session).await?;
        store.place_order(user_id, cart.id).await
    })
    .await?;

    info!(
        user_id,
        order_id = order.id,
        total_minor = order.total_minor,
        "Placed order"
    );

    Ok(order)
}
