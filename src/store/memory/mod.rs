//! In-process store.
//!
//! All tables live behind one mutex and every trait method holds it for its
//! whole duration, so each call is atomic just like a database transaction.
//! Foreign keys and cascades mirror the Postgres schema.

mod accounts;
mod carts;
mod catalog;
mod orders;

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use anyhow::anyhow;
use chrono::{TimeDelta, Utc};

use crate::{
    auth::{User, UserCredentials},
    carts::{
        CartError,
        models::{Cart, CartItem, CartLine, CartOwner},
    },
    catalog::{Category, Product},
    money,
    orders::Order,
    sessions::{Session, SessionKey},
};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    sequence: i32,
    users: BTreeMap<i32, UserCredentials>,
    activation_tokens: HashMap<i32, String>,
    sessions: HashMap<SessionKey, Session>,
    categories: BTreeMap<i32, Category>,
    products: BTreeMap<i32, Product>,
    carts: BTreeMap<i32, Cart>,
    cart_items: BTreeMap<i32, CartItem>,
    orders: BTreeMap<i32, Order>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store pre-filled with a small catalog for local runs.
    pub fn with_demo_catalog() -> Self {
        let store = Self::new();

        let drinks = store.insert_category("Drinks", None);
        let tea = store.insert_category("Tea", Some(drinks));
        let coffee = store.insert_category("Coffee", Some(drinks));

        store.insert_product(tea, "Sencha", 6_50, 40);
        store.insert_product(tea, "Assam", 5_20, 25);
        store.insert_product(coffee, "Espresso beans", 14_90, 12);
        store.insert_product(coffee, "Filter roast", 11_40, 18);

        store
    }

    pub fn insert_category(&self, name: &str, parent_id: Option<i32>) -> i32 {
        let mut tables = self.tables();
        let id = tables.next_id();
        tables.categories.insert(
            id,
            Category {
                id,
                name: name.to_string(),
                description: String::new(),
                parent_id,
            },
        );
        id
    }

    pub fn insert_product(
        &self,
        category_id: i32,
        name: &str,
        price_minor: i64,
        stock_quantity: i32,
    ) -> Product {
        let mut tables = self.tables();
        let id = tables.next_id();
        let product = Product {
            id,
            category_id,
            name: name.to_string(),
            description: String::new(),
            price_minor,
            stock_quantity,
            created_at: Utc::now(),
        };
        tables.products.insert(id, product.clone());
        product
    }

    /// Inserts an active user that cannot log in with any password.
    pub fn insert_user(&self, email: &str) -> i32 {
        let mut tables = self.tables();
        let id = tables.next_id();
        tables.users.insert(
            id,
            UserCredentials {
                user: User {
                    id,
                    email: email.to_string(),
                    phone_number: String::new(),
                    address: String::new(),
                    is_active: true,
                    created_at: Utc::now(),
                },
                password_hash: "!".into(),
            },
        );
        id
    }

    /// Token an inactive user must present to activate the account.
    pub fn pending_activation(&self, user_id: i32) -> Option<String> {
        self.tables().activation_tokens.get(&user_id).cloned()
    }

    /// Changes a price without touching the cached totals of carts holding
    /// the product.
    pub fn set_product_price(&self, product_id: i32, price_minor: i64) -> bool {
        match self.tables().products.get_mut(&product_id) {
            Some(product) => {
                product.price_minor = price_minor;
                true
            }
            None => false,
        }
    }

    /// Moves a session's deadline into the past.
    pub fn expire_session(&self, key: &SessionKey) -> bool {
        match self.tables().sessions.get_mut(key) {
            Some(session) => {
                session.expires_at = Utc::now() - TimeDelta::seconds(1);
                true
            }
            None => false,
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tables {
    fn next_id(&mut self) -> i32 {
        self.sequence += 1;
        self.sequence
    }

    fn mint_session_key(&self) -> SessionKey {
        let mut key = SessionKey::mint();
        while self.sessions.contains_key(&key) {
            key = SessionKey::mint();
        }
        key
    }

    fn owner_exists(&self, owner: &CartOwner) -> bool {
        match owner {
            CartOwner::User(user_id) => self.users.contains_key(user_id),
            CartOwner::Session(key) => self.sessions.contains_key(key),
        }
    }

    fn cart_by_owner(&self, owner: &CartOwner) -> Option<&Cart> {
        self.carts.values().find(|cart| &cart.owner == owner)
    }

    fn lines(&self, cart_id: i32) -> Result<Vec<CartLine>, CartError> {
        self.cart_items
            .values()
            .filter(|item| item.cart_id == cart_id)
            .map(|item| -> Result<CartLine, CartError> {
                let product = self
                    .products
                    .get(&item.product_id)
                    .ok_or_else(|| anyhow!("cart item {} has no product", item.id))?;

                Ok(CartLine {
                    item: item.clone(),
                    product_name: product.name.clone(),
                    unit_price_minor: product.price_minor,
                })
            })
            .collect()
    }

    fn recompute_total(&mut self, cart_id: i32) -> Result<Cart, CartError> {
        let lines = self.lines(cart_id)?;
        let total = money::sum(lines.iter().map(CartLine::price_minor))
            .ok_or_else(|| anyhow!("total of cart {cart_id} overflows"))?;

        let cart = self
            .carts
            .get_mut(&cart_id)
            .ok_or(CartError::NotFound("Cart"))?;
        cart.total_minor = total;
        cart.updated_at = Utc::now();

        Ok(cart.clone())
    }

    fn delete_cart(&mut self, cart_id: i32) {
        self.carts.remove(&cart_id);
        self.cart_items.retain(|_, item| item.cart_id != cart_id);
    }

    fn delete_carts_where<F>(&mut self, predicate: F)
    where
        F: Fn(&CartOwner) -> bool,
    {
        let doomed: Vec<i32> = self
            .carts
            .values()
            .filter(|cart| predicate(&cart.owner))
            .map(|cart| cart.id)
            .collect();

        for cart_id in doomed {
            self.delete_cart(cart_id);
        }
    }

    fn delete_session(&mut self, key: &SessionKey) {
        self.sessions.remove(key);
        self.delete_carts_where(|owner| matches!(owner, CartOwner::Session(k) if k == key));
    }
}
