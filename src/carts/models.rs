//! Cart models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{money, sessions::SessionKey};

/// The single identity a cart belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartOwner {
    User(i32),
    Session(SessionKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    pub id: i32,
    pub owner: CartOwner,
    pub total_minor: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    pub fn total(&self) -> Decimal {
        money::to_decimal(self.total_minor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartItem {
    pub id: i32,
    pub cart_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub added_at: DateTime<Utc>,
}

/// A line item joined with the product it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartLine {
    pub item: CartItem,
    pub product_name: String,
    pub unit_price_minor: i64,
}

impl CartLine {
    pub fn price_minor(&self) -> i64 {
        money::line_total(self.unit_price_minor, self.item.quantity).unwrap_or(i64::MAX)
    }
}

/// What a merge did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The source cart was folded into the destination and deleted.
    Merged {
        cart: Cart,
        moved: usize,
        coalesced: usize,
    },
    /// The source cart no longer exists; nothing to do.
    SourceMissing,
}

/// Cart as returned to clients.
#[derive(Serialize, ToSchema, Debug)]
pub struct CartView {
    pub id: i32,
    pub owner: OwnerKind,
    pub lines: Vec<CartLineView>,
    #[schema(value_type = String, example = "19.98")]
    pub total: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    User,
    Session,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct CartLineView {
    pub id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String, example = "9.99")]
    pub unit_price: Decimal,
    #[schema(value_type = String, example = "19.98")]
    pub price: Decimal,
    pub added_at: DateTime<Utc>,
}

impl CartView {
    pub fn new(cart: &Cart, lines: Vec<CartLine>) -> Self {
        let owner = match cart.owner {
            CartOwner::User(_) => OwnerKind::User,
            CartOwner::Session(_) => OwnerKind::Session,
        };

        Self {
            id: cart.id,
            owner,
            lines: lines
                .into_iter()
                .map(|line| CartLineView {
                    id: line.item.id,
                    product_id: line.item.product_id,
                    price: money::to_decimal(line.price_minor()),
                    unit_price: money::to_decimal(line.unit_price_minor),
                    quantity: line.item.quantity,
                    product_name: line.product_name,
                    added_at: line.item.added_at,
                })
                .collect(),
            total: cart.total(),
            created_at: cart.created_at,
            updated_at: cart.updated_at,
        }
    }
}
