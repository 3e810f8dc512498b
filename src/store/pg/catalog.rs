use anyhow::{Context, Result};
use async_trait::async_trait;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::RunQueryDsl;

use super::PgStore;
use crate::{
    catalog::{Catalog, Category, Product},
    models::{CategoryEntity, ProductEntity},
    schema::{categories, products},
};

impl From<ProductEntity> for Product {
    fn from(entity: ProductEntity) -> Self {
        Product {
            id: entity.id,
            category_id: entity.category_id,
            name: entity.name,
            description: entity.description,
            price_minor: entity.price_minor,
            stock_quantity: entity.stock_quantity,
            created_at: entity.created_at,
        }
    }
}

impl From<CategoryEntity> for Category {
    fn from(entity: CategoryEntity) -> Self {
        Category {
            id: entity.id,
            name: entity.name,
            description: entity.description,
            parent_id: entity.parent_id,
        }
    }
}

#[async_trait]
impl Catalog for PgStore {
    async fn get_product(&self, id: i32) -> Result<Option<Product>> {
        let conn = &mut self.conn().await?;

        let product: Option<ProductEntity> = products::table
            .find(id)
            .select(ProductEntity::as_select())
            .first(conn)
            .await
            .optional()
            .context("Failed to get product")?;

        Ok(product.map(Product::from))
    }

    async fn list_products(&self, category_id: Option<i32>) -> Result<Vec<Product>> {
        let conn = &mut self.conn().await?;

        let mut query = products::table
            .select(ProductEntity::as_select())
            .order_by((products::created_at.desc(), products::id.desc()))
            .into_boxed();
        if let Some(category_id) = category_id {
            query = query.filter(products::category_id.eq(category_id));
        }

        let products: Vec<ProductEntity> = query
            .load(conn)
            .await
            .context("Failed to get products")?;

        Ok(products.into_iter().map(Product::from).collect())
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let conn = &mut self.conn().await?;

        let categories: Vec<CategoryEntity> = categories::table
            .select(CategoryEntity::as_select())
            .order_by(categories::name.asc())
            .load(conn)
            .await
            .context("Failed to get categories")?;

        Ok(categories.into_iter().map(Category::from).collect())
    }
}
