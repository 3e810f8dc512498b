use anyhow::Result;
use async_trait::async_trait;

use super::MemoryStore;
use crate::catalog::{Catalog, Category, Product};

#[async_trait]
impl Catalog for MemoryStore {
    async fn get_product(&self, id: i32) -> Result<Option<Product>> {
        Ok(self.tables().products.get(&id).cloned())
    }

    async fn list_products(&self, category_id: Option<i32>) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = self
            .tables()
            .products
            .values()
            .filter(|product| category_id.is_none_or(|id| product.category_id == id))
            .cloned()
            .collect();

        products.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(products)
    }

    async fn list_categories(&self) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self.tables().categories.values().cloned().collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }
}
