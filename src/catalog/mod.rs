//! Read-only product catalog.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;

use crate::money;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: i32,
    pub category_id: i32,
    pub name: String,
    pub description: String,
    pub price_minor: i64,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub parent_id: Option<i32>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ProductView {
    pub id: i32,
    pub category_id: i32,
    pub name: String,
    pub description: String,
    #[schema(value_type = String, example = "9.99")]
    pub price: Decimal,
    pub stock_quantity: i32,
    pub created_at: DateTime<Utc>,
}

impl From<Product> for ProductView {
    fn from(product: Product) -> Self {
        Self {
            id: product.id,
            category_id: product.category_id,
            price: money::to_decimal(product.price_minor),
            name: product.name,
            description: product.description,
            stock_quantity: product.stock_quantity,
            created_at: product.created_at,
        }
    }
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: i32) -> Result<Option<Product>>;

    /// Newest first, optionally restricted to one category.
    async fn list_products(&self, category_id: Option<i32>) -> Result<Vec<Product>>;

    async fn list_categories(&self) -> Result<Vec<Category>>;
}
